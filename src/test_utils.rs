use std::sync::atomic::{AtomicUsize, Ordering};

use color_eyre::eyre::Result;
use tokio::sync::{Notify, Semaphore};

use crate::ports::catalog::CatalogTrack;
use crate::ports::materializer::{
    MaterializeRequest, SyncAction, TrackMaterializer, TrackSyncOutcome,
};

pub fn downloadable_track(id: i64, title: &str) -> CatalogTrack {
    CatalogTrack {
        id,
        title: Some(title.to_string()),
        downloadable: true,
        download_url: Some(format!("https://api.example.com/tracks/{}/download", id)),
        ..CatalogTrack::default()
    }
}

pub fn streamable_track(id: i64, title: &str) -> CatalogTrack {
    CatalogTrack {
        id,
        title: Some(title.to_string()),
        streamable: true,
        stream_url: Some(format!("https://api.example.com/tracks/{}/stream", id)),
        ..CatalogTrack::default()
    }
}

pub fn ineligible_track(id: i64) -> CatalogTrack {
    CatalogTrack {
        id,
        ..CatalogTrack::default()
    }
}

/// Materializer whose calls block until the test hands out permits, so a test can
/// act while a track is in flight.
pub struct GatedMaterializer {
    action: SyncAction,
    gate: Semaphore,
    started: AtomicUsize,
    started_notify: Notify,
}

impl GatedMaterializer {
    pub fn new(action: SyncAction) -> Self {
        Self {
            action,
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
            started_notify: Notify::new(),
        }
    }

    /// Let `n` blocked (or future) calls complete.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` calls have entered the materializer.
    pub async fn wait_started(&self, n: usize) {
        loop {
            let notified = self.started_notify.notified();
            if self.started() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait::async_trait]
impl TrackMaterializer for GatedMaterializer {
    async fn materialize(&self, request: MaterializeRequest) -> Result<TrackSyncOutcome> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.started_notify.notify_waiters();

        self.gate.acquire().await?.forget();

        Ok(TrackSyncOutcome::new(
            self.action,
            format!(
                "{}/{}/{}.mp3",
                request.directory.display(),
                request.playlist_title,
                request.track.display_title()
            ),
            None,
        ))
    }
}
