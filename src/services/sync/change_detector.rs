use std::collections::{BTreeMap, HashMap};

use futures::{StreamExt, stream};
use tokio::sync::Mutex;
use tracing::instrument;

use crate::ports::catalog::CatalogService;

/// Playlist id -> fallback title. Playlists are processed in ascending id order.
pub type PlaylistSelection = BTreeMap<String, String>;

/// Last observed track count per playlist. Lives for the whole process and is only
/// written by change detection.
#[derive(Debug, Default)]
pub struct PlaylistTrackCountCache {
    counts: Mutex<HashMap<String, u64>>,
}

#[cfg(test)]
impl PlaylistTrackCountCache {
    pub async fn get(&self, playlist_id: &str) -> Option<u64> {
        self.counts.lock().await.get(playlist_id).copied()
    }

    pub async fn insert(&self, playlist_id: impl Into<String>, track_count: u64) {
        self.counts.lock().await.insert(playlist_id.into(), track_count);
    }

    pub async fn len(&self) -> usize {
        self.counts.lock().await.len()
    }
}

/// Result of the lightweight metadata fetch for one playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PlaylistCheck {
    playlist_id: String,
    title: String,
    track_count: u64,
    ok: bool,
}

/// Decides which playlists need a sync by comparing track counts with the cache.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    cache: PlaylistTrackCountCache,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn cache(&self) -> &PlaylistTrackCountCache {
        &self.cache
    }

    /// Returns the subset of `playlists` whose track count changed since the last check.
    ///
    /// Playlists missing from the cache are selected only when `sync_if_missing_in_cache`
    /// is set. A failed fetch excludes the playlist and leaves its cache entry alone; a
    /// successful one always refreshes the cache.
    #[instrument(skip(self, catalog, playlists), fields(num_playlists = playlists.len()))]
    pub async fn select_changed<C: CatalogService + ?Sized>(
        &self,
        catalog: &C,
        playlists: &PlaylistSelection,
        playlist_concurrency: usize,
        sync_if_missing_in_cache: bool,
    ) -> PlaylistSelection {
        let checks: Vec<PlaylistCheck> = stream::iter(playlists.iter())
            .map(|(playlist_id, fallback_title)| async move {
                match catalog.fetch_playlist_meta(playlist_id).await {
                    Ok(meta) => PlaylistCheck {
                        playlist_id: playlist_id.clone(),
                        title: meta.title.unwrap_or_else(|| fallback_title.clone()),
                        track_count: meta.track_count,
                        ok: true,
                    },
                    Err(e) => {
                        tracing::error!(
                            playlist_id = %playlist_id,
                            error = ?e,
                            "Failed to fetch playlist metadata",
                        );
                        PlaylistCheck {
                            playlist_id: playlist_id.clone(),
                            title: fallback_title.clone(),
                            track_count: 0,
                            ok: false,
                        }
                    }
                }
            })
            .buffer_unordered(playlist_concurrency.max(1))
            .collect()
            .await;

        let mut to_sync = PlaylistSelection::new();
        let mut counts = self.cache.counts.lock().await;
        for check in checks.into_iter().filter(|check| check.ok) {
            let changed = match counts.get(&check.playlist_id) {
                Some(previous) => *previous != check.track_count,
                None => sync_if_missing_in_cache,
            };

            tracing::debug!(
                playlist_id = %check.playlist_id,
                track_count = check.track_count,
                changed,
                "Checked playlist",
            );

            counts.insert(check.playlist_id.clone(), check.track_count);
            if changed {
                to_sync.insert(check.playlist_id, check.title);
            }
        }

        tracing::info!("{} of {} playlists need a sync", to_sync.len(), playlists.len());
        to_sync
    }
}
