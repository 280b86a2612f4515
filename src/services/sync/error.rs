/// Orchestration-level failures. Any of these aborts the whole run with `status = error`.
///
/// Per-item failures never show up here; they are folded into track outcomes.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{stage} concurrency must be at least 1")]
    InvalidConcurrency { stage: &'static str },
    #[error("No target directory given for the sync")]
    MissingDirectory,
    #[error("Sync pipeline aborted: {0}")]
    Aborted(String),
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
