use color_eyre::eyre::Result;
use serde::{Deserialize, Serialize};

/// Decoupled representation of a remote track, as needed by the sync engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogTrack {
    pub id: i64,
    pub title: Option<String>,
    pub streamable: bool,
    pub downloadable: bool,
    pub stream_url: Option<String>,
    pub download_url: Option<String>,
    /// Concrete playable URL, only known once resolved through the catalog.
    pub http_mp3_128_url: Option<String>,
    pub artwork_url: Option<String>,
}

impl CatalogTrack {
    pub fn display_title(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| format!("track-{}", self.id))
    }
}

/// Lightweight playlist metadata used for change detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistMeta {
    pub title: Option<String>,
    pub track_count: u64,
}

/// Playlist entry returned when listing the user's library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPlaylist {
    pub id: String,
    pub title: String,
    pub track_count: u64,
    pub from_likes: bool,
}

/// Port trait wrapping the read-only catalog capabilities used by the sync engine.
///
/// Implementations live in `services::soundcloud::catalog` (production) or test mocks.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CatalogService: Send + Sync {
    async fn fetch_playlist_meta(&self, playlist_id: &str) -> Result<PlaylistMeta>;

    async fn fetch_playlist_tracks(&self, playlist_id: &str) -> Result<Vec<CatalogTrack>>;

    async fn resolve_stream_url(&self, track_id: i64) -> Result<String>;

    async fn list_playlists(&self) -> Result<Vec<CatalogPlaylist>>;
}
