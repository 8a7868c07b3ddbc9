use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::errors::{LauncherError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferControl {
    Running,
    Paused,
    Cancelled,
}

/// Shared control signal for one queue item. Clones observe the same state.
#[derive(Clone, Debug)]
pub struct CancellationHandle {
    control: Arc<watch::Sender<TransferControl>>,
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationHandle {
    pub fn new() -> Self {
        let (control, _) = watch::channel(TransferControl::Running);
        Self {
            control: Arc::new(control),
        }
    }

    pub fn state(&self) -> TransferControl {
        *self.control.borrow()
    }

    pub fn cancel(&self) {
        self.control.send_replace(TransferControl::Cancelled);
    }

    pub fn pause(&self) {
        self.control.send_if_modified(|state| {
            if *state == TransferControl::Running {
                *state = TransferControl::Paused;
                true
            } else {
                false
            }
        });
    }

    pub fn resume(&self) {
        self.control.send_if_modified(|state| {
            if *state == TransferControl::Paused {
                *state = TransferControl::Running;
                true
            } else {
                false
            }
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == TransferControl::Cancelled
    }

    /// Synchronous checkpoint for blocking loops (per file, per entry).
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(LauncherError::Cancelled);
        }
        Ok(())
    }

    /// Returns once the item is running again, or `Cancelled`.
    pub async fn wait_for_running(&self) -> Result<()> {
        let mut control = self.control.subscribe();
        loop {
            let state = *control.borrow_and_update();
            match state {
                TransferControl::Running => return Ok(()),
                TransferControl::Paused => {
                    control
                        .changed()
                        .await
                        .map_err(|_| LauncherError::Config("transfer control closed".to_string()))?;
                }
                TransferControl::Cancelled => return Err(LauncherError::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cancel_is_sticky() {
        let handle = CancellationHandle::new();
        assert!(handle.check().is_ok());
        handle.cancel();
        handle.resume();
        handle.pause();
        assert_eq!(handle.state(), TransferControl::Cancelled);
        assert!(matches!(handle.check(), Err(LauncherError::Cancelled)));
    }

    #[tokio::test]
    async fn paused_transfer_waits_for_resume() {
        let handle = CancellationHandle::new();
        handle.pause();

        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.wait_for_running().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        handle.resume();
        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("waiter should finish")
            .expect("join waiter");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn cancelling_a_paused_transfer_releases_waiters() {
        let handle = CancellationHandle::new();
        handle.pause();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.wait_for_running().await });
        handle.cancel();
        let result = task.await.expect("join waiter");
        assert!(matches!(result, Err(LauncherError::Cancelled)));
    }
}
