//! Sync orchestration engine: change detection, the bounded playlist/track
//! pipeline, progress publishing and cooperative cancellation.

pub mod cancellation;
pub mod change_detector;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod track_task;

pub use change_detector::PlaylistSelection;
pub use orchestrator::{SyncOrchestrator, SyncRequest};
pub use progress::{Progress, SyncStatus};
