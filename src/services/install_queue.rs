use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::errors::{LauncherError, Result};
use crate::models::InstallStatus;
use crate::utils::cancellation::CancellationHandle;

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueItemKind {
    Game {
        addon_ids: Vec<Uuid>,
        addon_versions: BTreeMap<Uuid, Option<String>>,
    },
    Tool {
        game_id: Option<Uuid>,
    },
}

/// One install/update request. Status and byte counters are atomics written by the
/// transfer pipeline and read by pollers without locking.
#[derive(Debug)]
pub struct QueueItem {
    pub id: Uuid,
    pub title: String,
    pub version: Option<String>,
    pub install_directory: PathBuf,
    pub cover_id: Option<Uuid>,
    pub icon_id: Option<Uuid>,
    pub queued_on: DateTime<Utc>,
    pub is_update: bool,
    pub kind: QueueItemKind,
    status: AtomicU8,
    bytes_downloaded: AtomicI64,
    total_bytes: AtomicI64,
    completed_on: OnceLock<DateTime<Utc>>,
    cancellation: CancellationHandle,
}

#[derive(Serialize, Clone, Debug)]
pub struct QueueItemSnapshot {
    pub id: Uuid,
    pub title: String,
    pub version: Option<String>,
    pub install_directory: PathBuf,
    pub cover_id: Option<Uuid>,
    pub icon_id: Option<Uuid>,
    pub queued_on: DateTime<Utc>,
    pub completed_on: Option<DateTime<Utc>>,
    pub is_update: bool,
    pub status: InstallStatus,
    pub is_active: bool,
    pub bytes_downloaded: i64,
    pub total_bytes: i64,
    pub progress: f64,
    #[serde(flatten)]
    pub kind: QueueItemKind,
}

pub fn progress_ratio(bytes_transferred: i64, total_bytes: i64) -> f64 {
    bytes_transferred as f64 / total_bytes as f64
}

impl QueueItem {
    pub fn game(
        id: Uuid,
        title: impl Into<String>,
        install_directory: impl Into<PathBuf>,
        addon_ids: Vec<Uuid>,
    ) -> Self {
        Self::with_kind(
            id,
            title,
            install_directory,
            QueueItemKind::Game {
                addon_ids,
                addon_versions: BTreeMap::new(),
            },
        )
    }

    pub fn tool(
        id: Uuid,
        title: impl Into<String>,
        install_directory: impl Into<PathBuf>,
        game_id: Option<Uuid>,
    ) -> Self {
        Self::with_kind(id, title, install_directory, QueueItemKind::Tool { game_id })
    }

    pub fn with_kind(
        id: Uuid,
        title: impl Into<String>,
        install_directory: impl Into<PathBuf>,
        kind: QueueItemKind,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            version: None,
            install_directory: install_directory.into(),
            cover_id: None,
            icon_id: None,
            queued_on: Utc::now(),
            is_update: false,
            kind,
            status: AtomicU8::new(InstallStatus::Queued as u8),
            bytes_downloaded: AtomicI64::new(0),
            total_bytes: AtomicI64::new(0),
            completed_on: OnceLock::new(),
            cancellation: CancellationHandle::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn as_update(mut self) -> Self {
        self.is_update = true;
        self
    }

    pub fn status(&self) -> InstallStatus {
        InstallStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or(InstallStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    pub fn bytes_downloaded(&self) -> i64 {
        self.bytes_downloaded.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> i64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// NaN while the total is unknown (zero).
    pub fn progress(&self) -> f64 {
        progress_ratio(self.bytes_downloaded(), self.total_bytes())
    }

    pub fn completed_on(&self) -> Option<DateTime<Utc>> {
        self.completed_on.get().copied()
    }

    pub fn cancellation(&self) -> &CancellationHandle {
        &self.cancellation
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn set_total_bytes(&self, total: i64) {
        self.total_bytes.store(total.max(0), Ordering::Relaxed);
    }

    pub fn set_bytes_downloaded(&self, bytes: i64) {
        self.bytes_downloaded.store(bytes.max(0), Ordering::Relaxed);
    }

    pub fn add_bytes_downloaded(&self, bytes: i64) {
        self.bytes_downloaded.fetch_add(bytes.max(0), Ordering::Relaxed);
    }

    pub fn set_status(&self, next: InstallStatus) -> Result<()> {
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            let from = InstallStatus::from_u8(current).unwrap_or(InstallStatus::Failed);
            if !from.can_transition_to(next) {
                return Err(LauncherError::InvalidTransition {
                    from: from.to_string(),
                    to: next.to_string(),
                });
            }
            match self.status.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        if next.is_terminal() {
            let _ = self.completed_on.set(Utc::now());
        }
        tracing::info!("{} ({}) -> {}", self.title, self.id, next);
        Ok(())
    }

    /// Ends the item after an error: `Canceled` when cancellation caused it, else `Failed`.
    pub fn fail(&self, err: &LauncherError) -> InstallStatus {
        let next = if err.is_cancelled() || self.cancellation.is_cancelled() {
            InstallStatus::Canceled
        } else {
            InstallStatus::Failed
        };
        if self.set_status(next).is_ok() {
            tracing::warn!("{} ({}) ended {}: {}", self.title, self.id, next, err);
        }
        self.status()
    }

    pub fn snapshot(&self) -> QueueItemSnapshot {
        let status = self.status();
        QueueItemSnapshot {
            id: self.id,
            title: self.title.clone(),
            version: self.version.clone(),
            install_directory: self.install_directory.clone(),
            cover_id: self.cover_id,
            icon_id: self.icon_id,
            queued_on: self.queued_on,
            completed_on: self.completed_on(),
            is_update: self.is_update,
            status,
            is_active: status.is_active(),
            bytes_downloaded: self.bytes_downloaded(),
            total_bytes: self.total_bytes(),
            progress: self.progress(),
            kind: self.kind.clone(),
        }
    }
}

/// Registry of queued items plus one async lock per install directory.
#[derive(Clone, Default)]
pub struct InstallQueue {
    items: Arc<Mutex<Vec<Arc<QueueItem>>>>,
    directory_locks: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl InstallQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, item: QueueItem) -> Result<Arc<QueueItem>> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| LauncherError::Config("install queue lock poisoned".to_string()))?;
        if let Some(existing) = items
            .iter()
            .find(|existing| existing.id == item.id && !existing.status().is_terminal())
        {
            tracing::debug!("{} already queued", existing.id);
            return Ok(existing.clone());
        }
        let item = Arc::new(item);
        items.push(item.clone());
        Ok(item)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<QueueItem>> {
        let items = self.items.lock().ok()?;
        items.iter().rev().find(|item| item.id == id).cloned()
    }

    pub fn snapshot(&self) -> Vec<QueueItemSnapshot> {
        match self.items.lock() {
            Ok(items) => items.iter().map(|item| item.snapshot()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn active(&self) -> Vec<Arc<QueueItem>> {
        match self.items.lock() {
            Ok(items) => items.iter().filter(|item| item.is_active()).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// The next item still waiting to start, in queue order.
    pub fn next_queued(&self) -> Option<Arc<QueueItem>> {
        let items = self.items.lock().ok()?;
        items
            .iter()
            .find(|item| item.status() == InstallStatus::Queued)
            .cloned()
    }

    pub fn cancel(&self, id: Uuid) -> Result<()> {
        let item = self
            .get(id)
            .ok_or_else(|| LauncherError::NotFound(format!("queue item {id}")))?;
        item.cancel();
        if item.status() == InstallStatus::Queued {
            item.set_status(InstallStatus::Canceled)?;
        }
        Ok(())
    }

    /// Drops completed, failed and canceled items; returns how many were removed.
    pub fn remove_finished(&self) -> usize {
        match self.items.lock() {
            Ok(mut items) => {
                let before = items.len();
                items.retain(|item| !item.status().is_terminal());
                before - items.len()
            }
            Err(_) => 0,
        }
    }

    /// Serializes work against one install directory. Hold the guard around moves.
    pub async fn lock_directory(&self, install_directory: &Path) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .directory_locks
                .lock()
                .map_err(|_| LauncherError::Config("directory lock table poisoned".to_string()))?;
            locks
                .entry(directory_key(install_directory))
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        Ok(lock.lock_owned().await)
    }
}

fn directory_key(path: &Path) -> PathBuf {
    let normalized = path.to_string_lossy().replace('\\', "/");
    let trimmed = normalized.trim_end_matches('/');
    if cfg!(windows) {
        PathBuf::from(trimmed.to_lowercase())
    } else {
        PathBuf::from(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn item() -> QueueItem {
        QueueItem::game(Uuid::new_v4(), "Quake", "/games/quake", vec![Uuid::new_v4()])
    }

    #[test]
    fn progress_is_nan_without_total_and_one_when_done() {
        let item = item();
        assert!(item.progress().is_nan());

        item.set_total_bytes(4096);
        item.add_bytes_downloaded(1024);
        assert_eq!(item.progress(), 0.25);

        item.set_bytes_downloaded(4096);
        assert_eq!(item.progress(), 1.0);
        assert!(progress_ratio(0, 0).is_nan());
    }

    #[test]
    fn lifecycle_walks_forward_and_stamps_completion() {
        let item = item();
        assert!(!item.is_active());
        item.set_status(InstallStatus::Starting).expect("start");
        assert!(item.is_active());
        item.set_status(InstallStatus::Moving).expect("skip download");
        assert!(item.set_status(InstallStatus::Downloading).is_err());
        assert!(item.completed_on().is_none());

        item.set_status(InstallStatus::Complete).expect("complete");
        assert!(!item.is_active());
        assert!(item.completed_on().is_some());
        assert!(item.set_status(InstallStatus::Failed).is_err());
    }

    #[test]
    fn cancelled_failures_end_canceled_not_failed() {
        let cancelled = item();
        cancelled.set_status(InstallStatus::Downloading).expect("download");
        cancelled.cancel();
        let io = LauncherError::Io(std::io::Error::new(std::io::ErrorKind::Other, "pipe closed"));
        assert_eq!(cancelled.fail(&io), InstallStatus::Canceled);

        let failed = item();
        failed.set_status(InstallStatus::Downloading).expect("download");
        assert_eq!(failed.fail(&io), InstallStatus::Failed);

        let aborted = item();
        aborted.set_status(InstallStatus::Moving).expect("move");
        assert_eq!(aborted.fail(&LauncherError::Cancelled), InstallStatus::Canceled);
    }

    #[test]
    fn snapshot_exposes_derived_fields() {
        let item = QueueItem::tool(Uuid::new_v4(), "Map Editor", "/tools/editor", None)
            .with_version("1.2")
            .as_update();
        item.set_status(InstallStatus::Downloading).expect("download");
        let snapshot = item.snapshot();

        assert!(snapshot.is_active);
        assert!(snapshot.progress.is_nan());
        assert_eq!(snapshot.kind, QueueItemKind::Tool { game_id: None });
        let json = serde_json::to_value(&snapshot).expect("serialize snapshot");
        assert_eq!(json["kind"], "tool");
        assert_eq!(json["status"], "downloading");
        assert_eq!(json["is_update"], true);
    }

    #[test]
    fn queue_cancels_and_removes_finished_items() {
        let queue = InstallQueue::new();
        let first = queue.enqueue(item()).expect("enqueue first");
        let second = queue.enqueue(item()).expect("enqueue second");
        let again = queue
            .enqueue(QueueItem::game(first.id, "Quake", "/games/quake", Vec::new()))
            .expect("enqueue duplicate");
        assert!(Arc::ptr_eq(&first, &again));

        second.set_status(InstallStatus::Starting).expect("start");
        assert_eq!(queue.active().len(), 1);
        assert_eq!(queue.next_queued().map(|item| item.id), Some(first.id));

        queue.cancel(first.id).expect("cancel queued");
        assert_eq!(first.status(), InstallStatus::Canceled);
        assert!(queue.cancel(Uuid::new_v4()).is_err());

        assert_eq!(queue.remove_finished(), 1);
        assert_eq!(queue.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn directory_lock_serializes_same_directory() {
        let queue = InstallQueue::new();
        let guard = queue
            .lock_directory(Path::new("/games/quake/"))
            .await
            .expect("first lock");

        let contender = queue.clone();
        let waiting = tokio::spawn(async move {
            contender
                .lock_directory(Path::new("/games/quake"))
                .await
                .map(|_| ())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        let other = queue
            .lock_directory(Path::new("/games/doom"))
            .await
            .expect("other directory is independent");
        drop(other);

        drop(guard);
        tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .expect("lock released")
            .expect("join contender")
            .expect("second lock");
    }
}
