//! Per-execution cancellation/pause context registry.
//!
//! Grounded on the coordinator's handle-registry pattern (one lightweight
//! handle per tracked id, looked up by string key) but built from plain
//! `Arc<AtomicBool>` + `tokio::sync::Notify` rather than an actor with a
//! command channel — cancel/pause are simple flags, not a conversation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::debug;

use crate::error::EngineError;

/// A cancellable, pausable handle for one execution. Cheap to clone;
/// clones share the same underlying flags.
#[derive(Clone)]
pub struct ExecutionHandle {
    cancelled: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ExecutionHandle {
    fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)), paused: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Block the caller while this handle is paused, waking on resume or
    /// cancel. Call at phase/task checkpoints. Returns an error if the
    /// execution was cancelled, either before or during the wait.
    pub async fn wait_if_paused(&self) -> Result<(), EngineError> {
        loop {
            if self.is_cancelled() {
                return Err(EngineError::Cancelled(String::new()));
            }
            if !self.paused.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.notify.notified().await;
        }
    }

    pub fn check_cancelled(&self) -> Result<(), EngineError> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled(String::new()));
        }
        Ok(())
    }
}

/// Registry of in-flight execution handles, keyed by execution id.
#[derive(Default)]
pub struct ExecutionController {
    handles: Mutex<HashMap<String, ExecutionHandle>>,
}

impl ExecutionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, exec_id: impl Into<String>) -> ExecutionHandle {
        let exec_id = exec_id.into();
        let handle = ExecutionHandle::new();
        debug!(%exec_id, "ExecutionController::track");
        self.handles.lock().unwrap().insert(exec_id, handle.clone());
        handle
    }

    /// Cancel and remove the handle for `exec_id`, if tracked.
    pub fn untrack(&self, exec_id: &str) {
        debug!(exec_id, "ExecutionController::untrack");
        if let Some(handle) = self.handles.lock().unwrap().remove(exec_id) {
            handle.cancel();
        }
    }

    pub fn pause(&self, exec_id: &str) -> bool {
        match self.handles.lock().unwrap().get(exec_id) {
            Some(handle) => {
                handle.pause();
                true
            }
            None => false,
        }
    }

    pub fn resume(&self, exec_id: &str) -> bool {
        match self.handles.lock().unwrap().get(exec_id) {
            Some(handle) => {
                handle.resume();
                true
            }
            None => false,
        }
    }

    /// `Stop` is cancellation by another name.
    pub fn stop(&self, exec_id: &str) {
        self.untrack(exec_id);
    }

    pub fn get(&self, exec_id: &str) -> Option<ExecutionHandle> {
        self.handles.lock().unwrap().get(exec_id).cloned()
    }

    pub fn tracked_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn track_then_untrack_marks_handle_cancelled() {
        let controller = ExecutionController::new();
        let handle = controller.track("e1");
        assert!(!handle.is_cancelled());
        controller.untrack("e1");
        assert!(handle.is_cancelled());
        assert_eq!(controller.tracked_count(), 0);
    }

    #[tokio::test]
    async fn pause_then_resume_unblocks_wait_if_paused() {
        let controller = ExecutionController::new();
        let handle = controller.track("e1");
        controller.pause("e1");

        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.wait_if_paused().await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        controller.resume("e1");
        let result = waiter.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn cancelling_a_paused_execution_unblocks_with_error() {
        let controller = ExecutionController::new();
        let handle = controller.track("e1");
        controller.pause("e1");

        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.wait_if_paused().await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        controller.untrack("e1");
        let result = waiter.await.unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn pause_and_resume_on_unknown_id_return_false() {
        let controller = ExecutionController::new();
        assert!(!controller.pause("missing"));
        assert!(!controller.resume("missing"));
    }
}
