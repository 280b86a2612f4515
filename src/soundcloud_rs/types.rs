use serde::{Deserialize, Serialize};

use crate::ports::catalog::{CatalogPlaylist, CatalogTrack};

/// SoundCloud OAuth token response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoundCloudTokenResponse {
    pub access_token: String,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

/// Authorize URL plus the state the redirect must echo back
#[derive(Debug, Clone)]
pub struct SoundCloudAuthResponse {
    pub auth_url: String,
    pub state: String,
}

/// PKCE material that has to survive until the code is exchanged
#[derive(Debug, Clone)]
pub struct OAuthSession {
    pub code_verifier: String,
    pub state: String,
    pub created_at: i64,
}

/// SoundCloud user profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoundCloudUser {
    pub id: i64,
    pub username: Option<String>,
    pub permalink: Option<String>,
}

/// SoundCloud track from API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SoundCloudTrack {
    pub id: i64,
    pub title: Option<String>,
    pub streamable: Option<bool>,
    pub downloadable: Option<bool>,
    pub stream_url: Option<String>,
    pub download_url: Option<String>,
    pub artwork_url: Option<String>,
    pub duration: Option<u64>,
}

impl From<SoundCloudTrack> for CatalogTrack {
    fn from(track: SoundCloudTrack) -> Self {
        CatalogTrack {
            id: track.id,
            title: track.title,
            streamable: track.streamable.unwrap_or(false),
            downloadable: track.downloadable.unwrap_or(false),
            stream_url: track.stream_url,
            download_url: track.download_url,
            http_mp3_128_url: None,
            artwork_url: track.artwork_url,
        }
    }
}

/// SoundCloud playlist from API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoundCloudPlaylist {
    pub id: i64,
    pub title: Option<String>,
    pub track_count: Option<u64>,
    pub artwork_url: Option<String>,
    pub tracks: Option<Vec<SoundCloudTrack>>,
}

impl SoundCloudPlaylist {
    pub fn into_catalog_playlist(self, from_likes: bool) -> CatalogPlaylist {
        CatalogPlaylist {
            id: self.id.to_string(),
            title: self.title.unwrap_or_else(|| format!("playlist-{}", self.id)),
            track_count: self.track_count.unwrap_or(0),
            from_likes,
        }
    }
}

/// Playable URLs for a track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoundCloudStreams {
    pub http_mp3_128_url: Option<String>,
    pub hls_mp3_128_url: Option<String>,
    pub hls_aac_160_url: Option<String>,
    pub preview_mp3_128_url: Option<String>,
}

/// One page of a `linked_partitioning` collection
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    pub collection: Vec<T>,
    pub next_href: Option<String>,
}

/// Collection endpoints answer with either a bare array or a linked page.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Collection<T> {
    Page(Page<T>),
    List(Vec<T>),
}

impl<T> Collection<T> {
    pub fn into_parts(self) -> (Vec<T>, Option<String>) {
        match self {
            Collection::Page(page) => (page.collection, page.next_href),
            Collection::List(items) => (items, None),
        }
    }
}
