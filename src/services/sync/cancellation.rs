use std::sync::atomic::{AtomicUsize, Ordering};

/// High bit of the packed state carries the stop request, the rest counts active tasks.
const STOP_REQUESTED: usize = 1 << (usize::BITS - 1);

/// Cooperative stop/drain gate shared between the orchestrator and its track tasks.
///
/// The stop flag and the active-task count live in one atomic word, so once a stop is
/// requested no task can be admitted and the count can only go down.
#[derive(Debug, Default)]
pub struct CancellationController {
    state: AtomicUsize,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.state.fetch_or(STOP_REQUESTED, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.state.load(Ordering::SeqCst) & STOP_REQUESTED != 0
    }

    pub fn active_tasks(&self) -> usize {
        self.state.load(Ordering::SeqCst) & !STOP_REQUESTED
    }

    /// Stop was requested and every admitted task has finished.
    pub fn is_drained(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STOP_REQUESTED
    }

    /// Clear the stop flag for the next run. Active tasks are left untouched.
    pub fn clear(&self) {
        self.state.fetch_and(!STOP_REQUESTED, Ordering::SeqCst);
    }

    /// Admit a new task unless a stop has been requested.
    ///
    /// The returned guard keeps the task counted as active until it is dropped.
    pub fn admit(&self) -> Option<TaskGuard<'_>> {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if current & STOP_REQUESTED != 0 {
                return None;
            }
            match self.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(TaskGuard { controller: self }),
                Err(actual) => current = actual,
            }
        }
    }
}

#[derive(Debug)]
pub struct TaskGuard<'a> {
    controller: &'a CancellationController,
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.controller.state.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_counts_active_tasks() {
        let controller = CancellationController::new();
        let first = controller.admit().unwrap();
        let second = controller.admit().unwrap();
        assert_eq!(controller.active_tasks(), 2);

        drop(first);
        assert_eq!(controller.active_tasks(), 1);
        drop(second);
        assert_eq!(controller.active_tasks(), 0);
    }

    #[test]
    fn test_stop_refuses_new_tasks_and_drains() {
        let controller = CancellationController::new();
        let in_flight = controller.admit().unwrap();

        controller.request_stop();
        assert!(controller.is_stop_requested());
        assert!(controller.admit().is_none());
        assert_eq!(controller.active_tasks(), 1);
        assert!(!controller.is_drained());

        drop(in_flight);
        assert_eq!(controller.active_tasks(), 0);
        assert!(controller.is_drained());
    }

    #[test]
    fn test_clear_allows_new_run() {
        let controller = CancellationController::new();
        controller.request_stop();
        controller.clear();

        assert!(!controller.is_stop_requested());
        assert!(!controller.is_drained());
        assert!(controller.admit().is_some());
    }
}
