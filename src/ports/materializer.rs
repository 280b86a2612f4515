use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::eyre::Result;
use serde::{Deserialize, Serialize};

use crate::ports::catalog::CatalogTrack;

/// What happened to a single track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Skipped,
    Downloaded,
    Streamed,
    Unsupported,
    Error,
    /// Anything the materializer reports that this build does not know about.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncAction::Skipped => "skipped",
            SyncAction::Downloaded => "downloaded",
            SyncAction::Streamed => "streamed",
            SyncAction::Unsupported => "unsupported",
            SyncAction::Error => "error",
            SyncAction::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Result of one track attempt. Produced once per track and applied once to progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSyncOutcome {
    pub action: SyncAction,
    pub path: String,
    pub reason: Option<String>,
}

impl TrackSyncOutcome {
    pub fn new(action: SyncAction, path: impl Into<String>, reason: Option<&str>) -> Self {
        Self {
            action,
            path: path.into(),
            reason: reason.map(str::to_string),
        }
    }

    pub fn canceled() -> Self {
        Self::new(SyncAction::Skipped, "", Some("canceled"))
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            action: SyncAction::Error,
            path: String::new(),
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MaterializeRequest {
    pub track: CatalogTrack,
    pub playlist_title: String,
    pub directory: PathBuf,
    pub token: String,
}

/// Port trait for the executor that performs the actual transfer to disk.
///
/// The materializer is authoritative on the outcome classification; an `Err`
/// means the transfer itself failed and is turned into an `error` outcome by the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TrackMaterializer: Send + Sync {
    async fn materialize(&self, request: MaterializeRequest) -> Result<TrackSyncOutcome>;
}

#[async_trait::async_trait]
impl<T: TrackMaterializer + ?Sized> TrackMaterializer for Arc<T> {
    async fn materialize(&self, request: MaterializeRequest) -> Result<TrackSyncOutcome> {
        (**self).materialize(request).await
    }
}
