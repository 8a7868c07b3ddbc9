use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Instrument, Span};
use uuid::Uuid;

use crate::config::{EngineConfig, DEFAULT_PRODUCT_MARKER};
use crate::errors::{LauncherError, Result};
use crate::models::{GameKind, GameManifest, InstallStatus, ScriptType};
use crate::services::file_list::{FileEntry, FileList, InstallResult};
use crate::services::install_queue::{InstallQueue, QueueItem};
use crate::services::manifest_service::ManifestStore;
use crate::services::save_archive_service::{RestoreReport, SaveArchiveService};
use crate::services::transfer_service::ContentSource;
use crate::utils::file::{delete_empty_directories, move_contents_with, MoveReport};
use crate::utils::paths::PathCodec;
use crate::utils::retry::{try_with_retry_async_while, RetryPolicy};

/// Runs manifest scripts on the engine's behalf. The engine only decides when.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, script_type: ScriptType, install_dir: &Path, entity_id: Uuid) -> Result<()>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UninstallReport {
    pub removed: usize,
    pub missing: usize,
    pub failed: usize,
}

/// Drives one queue item through download, materialization, scripts and completion.
///
/// Every step that touches the install directory holds that directory's lock from
/// the queue. A failing step ends the item as `Failed` (or `Canceled`).
#[derive(Clone)]
pub struct InstallService {
    queue: InstallQueue,
    scripts: Arc<dyn ScriptRunner>,
    codec: PathCodec,
    marker: String,
    retry: RetryPolicy,
    span: Span,
}

impl InstallService {
    pub fn new(queue: InstallQueue, scripts: Arc<dyn ScriptRunner>) -> Self {
        Self {
            queue,
            scripts,
            codec: PathCodec::system(),
            marker: DEFAULT_PRODUCT_MARKER.to_string(),
            retry: RetryPolicy::default(),
            span: tracing::info_span!("install"),
        }
    }

    pub fn from_config(queue: InstallQueue, scripts: Arc<dyn ScriptRunner>, config: &EngineConfig) -> Self {
        Self::new(queue, scripts)
            .with_marker(config.product_marker.clone())
            .with_retry_policy(config.retry_policy())
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_codec(mut self, codec: PathCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn queue(&self) -> &InstallQueue {
        &self.queue
    }

    fn manifests(&self, install_directory: &Path) -> ManifestStore {
        ManifestStore::with_marker(install_directory, self.marker.clone())
    }

    /// Fetches content for the item, retrying failed attempts from zero bytes.
    /// Cancellation is never retried.
    pub async fn download(
        &self,
        item: &QueueItem,
        source: &dyn ContentSource,
        url: &str,
        destination: &Path,
    ) -> Result<u64> {
        let result: Result<u64> = async {
            advance(item, InstallStatus::Downloading)?;
            try_with_retry_async_while(
                self.retry,
                |err: &LauncherError| !err.is_cancelled(),
                move || {
                    item.set_bytes_downloaded(0);
                    source.fetch_to_file(url, destination, item)
                },
            )
            .await
        }
        .instrument(self.span.clone())
        .await;
        settle(item, result)
    }

    /// Moves a staged title into its install directory and records its files and manifest.
    pub async fn install_base(
        &self,
        item: &QueueItem,
        staged: &Path,
        manifest: &GameManifest,
    ) -> Result<InstallResult> {
        let result: Result<InstallResult> = async {
            let _guard = self.queue.lock_directory(&item.install_directory).await?;
            advance(item, InstallStatus::Moving)?;
            let report = materialize(item, staged).await?;

            let mut installed = install_result_from(&item.install_directory, manifest, &report);
            installed.file_list.base_title.manifest = Some(manifest.clone());
            self.manifests(&item.install_directory)
                .write_async(manifest, Some(manifest.id))
                .await?;
            tracing::info!(
                "installed {} file(s) for {} into {:?}",
                installed.file_list.base_title.len(),
                manifest.title,
                item.install_directory
            );
            Ok(installed)
        }
        .instrument(self.span.clone())
        .await;
        settle(item, result)
    }

    /// Installs an addon, expansion, mod or redistributable over the base install and
    /// folds its files into `base` as a dependent.
    pub async fn install_dependent(
        &self,
        item: &QueueItem,
        staged: &Path,
        manifest: &GameManifest,
        base: &mut FileList,
    ) -> Result<()> {
        let result: Result<()> = async {
            let _guard = self.queue.lock_directory(&item.install_directory).await?;
            advance(item, dependent_status(manifest.kind))?;
            let report = materialize(item, staged).await?;

            let mut dependent = install_result_from(&item.install_directory, manifest, &report).file_list;
            dependent.base_title.manifest = Some(manifest.clone());
            base.merge_base_as_dependent(manifest.id, &dependent);
            self.manifests(&item.install_directory)
                .write_async(manifest, Some(manifest.id))
                .await?;
            tracing::info!(
                "installed dependent {} ({} file(s)) for {}",
                manifest.title,
                dependent.base_title.len(),
                item.title
            );
            Ok(())
        }
        .instrument(self.span.clone())
        .await;
        settle(item, result)
    }

    /// Restores a save archive into the install. Existing saves are kept as `.bak`.
    pub async fn restore_saves(
        &self,
        item: &QueueItem,
        archive: &Path,
        manifest: &GameManifest,
    ) -> Result<RestoreReport> {
        let result: Result<RestoreReport> = async {
            let _guard = self.queue.lock_directory(&item.install_directory).await?;
            advance(item, InstallStatus::DownloadingSaves)?;
            let service = SaveArchiveService::new(item.install_directory.clone(), self.codec.clone())
                .with_span(self.span.clone());
            let archive = archive.to_path_buf();
            let manifest = manifest.clone();
            let cancel = item.cancellation().clone();
            tokio::task::spawn_blocking(move || -> Result<RestoreReport> {
                let reader = File::open(&archive)?;
                service.restore(reader, &manifest, Some(&cancel))
            })
            .await
            .map_err(|err| LauncherError::Config(format!("save restore join error: {err}")))?
        }
        .instrument(self.span.clone())
        .await;
        settle(item, result)
    }

    /// Signals the runner for each manifest carrying an install script, base first.
    pub async fn run_scripts(&self, item: &QueueItem, manifests: &[GameManifest]) -> Result<usize> {
        let result: Result<usize> = async {
            advance(item, InstallStatus::RunningScripts)?;
            let mut ran = 0;
            for manifest in manifests {
                item.cancellation().check()?;
                if !manifest.has_script(ScriptType::Install) {
                    continue;
                }
                self.scripts
                    .run(ScriptType::Install, &item.install_directory, manifest.id)
                    .await?;
                ran += 1;
            }
            Ok(ran)
        }
        .instrument(self.span.clone())
        .await;
        settle(item, result)
    }

    pub fn finish(&self, item: &QueueItem) -> Result<()> {
        let result = item.set_status(InstallStatus::Complete);
        settle(item, result)
    }

    /// Removes every file the list owns, then the per-title manifests and emptied folders.
    pub async fn uninstall(&self, file_list: &FileList) -> Result<UninstallReport> {
        let install_directory = file_list
            .install_directory()
            .map(Path::to_path_buf)
            .ok_or_else(|| LauncherError::InvalidArgument("file list has no install directory".to_string()))?;

        async {
            let _guard = self.queue.lock_directory(&install_directory).await?;

            if let Some(manifest) = file_list.base_title.manifest.as_ref() {
                if manifest.has_script(ScriptType::Uninstall) {
                    if let Err(err) = self
                        .scripts
                        .run(ScriptType::Uninstall, &install_directory, manifest.id)
                        .await
                    {
                        tracing::warn!("uninstall script for {} failed: {}", manifest.id, err);
                    }
                }
            }

            let targets: Vec<PathBuf> = file_list
                .to_flat_distinct_entries()
                .map(|entry| resolve_local_path(&install_directory, entry))
                .collect();
            let directory = install_directory.clone();
            let report = tokio::task::spawn_blocking(move || {
                let report = remove_files(&targets);
                delete_empty_directories(&directory);
                report
            })
            .await
            .map_err(|err| LauncherError::Config(format!("uninstall join error: {err}")))?;

            let manifests = self.manifests(&install_directory);
            for id in std::iter::once(file_list.base_title.title_id).chain(file_list.dependents.keys().copied()) {
                if let Err(err) = manifests.delete(id) {
                    tracing::debug!("failed to delete manifest for {}: {}", id, err);
                }
            }
            delete_empty_directories(&install_directory);

            tracing::info!(
                "uninstalled {:?}: {} removed, {} missing, {} failed",
                install_directory,
                report.removed,
                report.missing,
                report.failed
            );
            Ok(report)
        }
        .instrument(self.span.clone())
        .await
    }
}

/// Moves only forward; repeating the current step (a second addon) is a no-op.
fn advance(item: &QueueItem, status: InstallStatus) -> Result<()> {
    item.cancellation().check()?;
    let current = item.status();
    if !current.is_terminal() && current >= status {
        return Ok(());
    }
    item.set_status(status)
}

fn settle<T>(item: &QueueItem, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        item.fail(err);
    }
    result
}

fn dependent_status(kind: GameKind) -> InstallStatus {
    match kind {
        GameKind::Redistributable => InstallStatus::InstallingRedistributables,
        GameKind::Mod => InstallStatus::InstallingMods,
        GameKind::Expansion | GameKind::StandaloneExpansion => InstallStatus::InstallingExpansions,
        GameKind::Game | GameKind::Tool => InstallStatus::InstallingAddons,
    }
}

async fn materialize(item: &QueueItem, staged: &Path) -> Result<MoveReport> {
    let source = staged.to_path_buf();
    let destination = item.install_directory.clone();
    let cancel = item.cancellation().clone();
    tokio::task::spawn_blocking(move || move_contents_with(&source, &destination, Some(&cancel)))
        .await
        .map_err(|err| LauncherError::Config(format!("materialize join error: {err}")))?
}

fn install_result_from(
    install_directory: &Path,
    manifest: &GameManifest,
    report: &MoveReport,
) -> InstallResult {
    let mut installed = InstallResult::new(install_directory, manifest.id);
    installed.file_list.base_title.add_files(report.moved.iter().map(|relative| {
        let entry_path = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        FileEntry::new(entry_path, install_directory.join(relative))
    }));
    installed
}

fn resolve_local_path(install_directory: &Path, entry: &FileEntry) -> PathBuf {
    if entry.local_path.as_os_str().is_empty() {
        return install_directory.join(&entry.entry_path);
    }
    if entry.local_path.is_absolute() {
        entry.local_path.clone()
    } else {
        install_directory.join(&entry.local_path)
    }
}

fn remove_files(targets: &[PathBuf]) -> UninstallReport {
    let mut report = UninstallReport::default();
    for path in targets {
        match std::fs::remove_file(path) {
            Ok(()) => report.removed += 1,
            Err(err) if err.kind() == io::ErrorKind::NotFound => report.missing += 1,
            Err(err) => {
                tracing::warn!("failed to remove {:?}: {}", path, err);
                report.failed += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ManifestScript;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<(ScriptType, PathBuf, Uuid)>>,
    }

    #[async_trait]
    impl ScriptRunner for RecordingRunner {
        async fn run(&self, script_type: ScriptType, install_dir: &Path, entity_id: Uuid) -> Result<()> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((script_type, install_dir.to_path_buf(), entity_id));
            Ok(())
        }
    }

    struct StaticSource(&'static str);

    #[async_trait]
    impl ContentSource for StaticSource {
        async fn fetch_to_file(&self, _url: &str, destination: &Path, item: &QueueItem) -> Result<u64> {
            tokio::fs::write(destination, self.0).await?;
            item.set_total_bytes(self.0.len() as i64);
            item.add_bytes_downloaded(self.0.len() as i64);
            Ok(self.0.len() as u64)
        }
    }

    /// Fails with a transient error until `failures` attempts have been made.
    struct FlakySource {
        failures: usize,
        attempts: AtomicUsize,
        error: fn() -> LauncherError,
    }

    impl FlakySource {
        fn new(failures: usize, error: fn() -> LauncherError) -> Self {
            Self {
                failures,
                attempts: AtomicUsize::new(0),
                error,
            }
        }
    }

    #[async_trait]
    impl ContentSource for FlakySource {
        async fn fetch_to_file(&self, _url: &str, destination: &Path, item: &QueueItem) -> Result<u64> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            item.set_total_bytes(7);
            item.add_bytes_downloaded(3);
            if attempt <= self.failures {
                return Err((self.error)());
            }
            tokio::fs::write(destination, "payload").await?;
            item.add_bytes_downloaded(4);
            Ok(7)
        }
    }

    fn temp_root() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("otoshi-install-test-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).expect("create temp root");
        dir
    }

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
        fs::write(path, contents).expect("write file");
    }

    fn service(runner: Arc<RecordingRunner>) -> InstallService {
        InstallService::new(InstallQueue::new(), runner)
            .with_codec(PathCodec::with_locations(Vec::new(), Vec::new()))
    }

    fn manifest_with_scripts(title: &str, kind: GameKind, scripts: &[ScriptType]) -> GameManifest {
        let mut manifest = GameManifest::new(Uuid::new_v4(), title);
        manifest.kind = kind;
        manifest.scripts = scripts
            .iter()
            .map(|script_type| ManifestScript {
                id: Uuid::new_v4(),
                script_type: *script_type,
                name: None,
                requires_admin: false,
            })
            .collect();
        manifest
    }

    #[tokio::test]
    async fn base_install_materializes_and_records_files() {
        let root = temp_root();
        let install_dir = root.join("install");
        let staged = root.join("staged");
        write(&staged.join("quake.exe"), "exe");
        write(&staged.join("id1/pak0.pak"), "pak");

        let runner = Arc::new(RecordingRunner::default());
        let service = service(runner);
        let item = service
            .queue()
            .enqueue(QueueItem::game(Uuid::new_v4(), "Quake", &install_dir, Vec::new()))
            .expect("enqueue");
        let manifest = GameManifest::new(item.id, "Quake");

        let file_list = service
            .install_base(&item, &staged, &manifest)
            .await
            .expect("install base")
            .file_list;

        assert_eq!(item.status(), InstallStatus::Moving);
        let entries: Vec<&str> = file_list
            .to_flat_distinct_entries()
            .map(|entry| entry.entry_path.as_str())
            .collect();
        assert_eq!(entries, vec!["id1/pak0.pak", "quake.exe"]);
        assert_eq!(fs::read_to_string(install_dir.join("id1/pak0.pak")).expect("read pak"), "pak");
        assert_eq!(
            ManifestStore::new(&install_dir)
                .read(Some(manifest.id))
                .expect("read manifest"),
            Some(manifest)
        );
    }

    #[tokio::test]
    async fn addons_merge_as_dependents_without_duplicates() {
        let root = temp_root();
        let install_dir = root.join("install");
        write(&root.join("base/data/shared.dat"), "base");
        write(&root.join("addon-a/data/shared.dat"), "a");
        write(&root.join("addon-a/data/a.dat"), "a");
        write(&root.join("addon-b/data/shared.dat"), "b");
        write(&root.join("addon-b/data/b.dat"), "b");

        let service = service(Arc::new(RecordingRunner::default()));
        let item = service
            .queue()
            .enqueue(QueueItem::game(Uuid::new_v4(), "Quake", &install_dir, Vec::new()))
            .expect("enqueue");
        let mut base = service
            .install_base(&item, &root.join("base"), &GameManifest::new(item.id, "Quake"))
            .await
            .expect("install base")
            .file_list;

        for name in ["addon-a", "addon-b"] {
            let manifest = manifest_with_scripts(name, GameKind::Expansion, &[]);
            service
                .install_dependent(&item, &root.join(name), &manifest, &mut base)
                .await
                .expect("install dependent");
        }

        assert_eq!(item.status(), InstallStatus::InstallingExpansions);
        assert_eq!(base.dependents.len(), 2);
        let mut entries: Vec<String> = base
            .to_flat_distinct_entries()
            .map(|entry| entry.entry_path.clone())
            .collect();
        entries.sort();
        assert_eq!(entries, vec!["data/a.dat", "data/b.dat", "data/shared.dat"]);
        assert_eq!(fs::read_to_string(install_dir.join("data/shared.dat")).expect("read"), "b");
        assert_eq!(fs::read_to_string(install_dir.join("data/shared.dat.bak")).expect("read"), "a");
        assert_eq!(fs::read_to_string(install_dir.join("data/shared.dat.bak.bak")).expect("read"), "base");
    }

    #[tokio::test]
    async fn scripts_run_only_where_declared_then_finish() {
        let root = temp_root();
        let runner = Arc::new(RecordingRunner::default());
        let service = service(runner.clone());
        let item = service
            .queue()
            .enqueue(QueueItem::game(Uuid::new_v4(), "Quake", root.join("install"), Vec::new()))
            .expect("enqueue");
        let with_script = manifest_with_scripts("Quake", GameKind::Game, &[ScriptType::Install]);
        let without = manifest_with_scripts("Mission Pack", GameKind::Expansion, &[ScriptType::Uninstall]);

        let ran = service
            .run_scripts(&item, &[with_script.clone(), without])
            .await
            .expect("run scripts");
        service.finish(&item).expect("finish");

        assert_eq!(ran, 1);
        assert_eq!(
            *runner.calls.lock().expect("calls lock"),
            vec![(ScriptType::Install, root.join("install"), with_script.id)]
        );
        assert_eq!(item.status(), InstallStatus::Complete);
        assert!(item.completed_on().is_some());
    }

    #[tokio::test]
    async fn cancelled_item_ends_canceled_and_keeps_staged_files() {
        let root = temp_root();
        let staged = root.join("staged");
        write(&staged.join("quake.exe"), "exe");

        let service = service(Arc::new(RecordingRunner::default()));
        let item = service
            .queue()
            .enqueue(QueueItem::game(Uuid::new_v4(), "Quake", root.join("install"), Vec::new()))
            .expect("enqueue");
        item.cancellation().cancel();

        let result = service
            .install_base(&item, &staged, &GameManifest::new(item.id, "Quake"))
            .await;

        assert!(matches!(result, Err(LauncherError::Cancelled)));
        assert_eq!(item.status(), InstallStatus::Canceled);
        assert!(staged.join("quake.exe").exists());
    }

    #[tokio::test]
    async fn missing_staged_directory_fails_item() {
        let root = temp_root();
        let service = service(Arc::new(RecordingRunner::default()));
        let item = service
            .queue()
            .enqueue(QueueItem::game(Uuid::new_v4(), "Quake", root.join("install"), Vec::new()))
            .expect("enqueue");

        let result = service
            .install_base(&item, &root.join("nope"), &GameManifest::new(item.id, "Quake"))
            .await;

        assert!(matches!(result, Err(LauncherError::NotFound(_))));
        assert_eq!(item.status(), InstallStatus::Failed);
    }

    #[tokio::test]
    async fn download_reports_progress_through_item() {
        let root = temp_root();
        let service = service(Arc::new(RecordingRunner::default()));
        let item = service
            .queue()
            .enqueue(QueueItem::game(Uuid::new_v4(), "Quake", root.join("install"), Vec::new()))
            .expect("enqueue");

        let written = service
            .download(&item, &StaticSource("payload"), "content/quake.zip", &root.join("quake.zip"))
            .await
            .expect("download");

        assert_eq!(written, 7);
        assert_eq!(item.status(), InstallStatus::Downloading);
        assert_eq!(item.progress(), 1.0);
    }

    #[tokio::test]
    async fn download_retries_transient_failures() {
        let root = temp_root();
        let service = service(Arc::new(RecordingRunner::default()))
            .with_retry_policy(RetryPolicy::new(3, Duration::ZERO));
        let item = service
            .queue()
            .enqueue(QueueItem::game(Uuid::new_v4(), "Quake", root.join("install"), Vec::new()))
            .expect("enqueue");
        let source = FlakySource::new(2, || LauncherError::Http("HTTP 503: busy".to_string()));

        let written = service
            .download(&item, &source, "content/quake.zip", &root.join("quake.zip"))
            .await
            .expect("download after retries");

        assert_eq!(written, 7);
        assert_eq!(source.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(item.bytes_downloaded(), 7);
        assert_eq!(item.status(), InstallStatus::Downloading);
    }

    #[tokio::test]
    async fn download_gives_up_after_policy_and_fails_item() {
        let root = temp_root();
        let service = service(Arc::new(RecordingRunner::default()))
            .with_retry_policy(RetryPolicy::new(2, Duration::ZERO));
        let item = service
            .queue()
            .enqueue(QueueItem::game(Uuid::new_v4(), "Quake", root.join("install"), Vec::new()))
            .expect("enqueue");
        let source = FlakySource::new(usize::MAX, || LauncherError::Http("HTTP 503: busy".to_string()));

        let result = service
            .download(&item, &source, "content/quake.zip", &root.join("quake.zip"))
            .await;

        assert!(matches!(result, Err(LauncherError::Http(_))));
        assert_eq!(source.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(item.status(), InstallStatus::Failed);
    }

    #[tokio::test]
    async fn cancelled_download_is_not_retried() {
        let root = temp_root();
        let service = service(Arc::new(RecordingRunner::default()))
            .with_retry_policy(RetryPolicy::new(5, Duration::ZERO));
        let item = service
            .queue()
            .enqueue(QueueItem::game(Uuid::new_v4(), "Quake", root.join("install"), Vec::new()))
            .expect("enqueue");
        let source = FlakySource::new(usize::MAX, || LauncherError::Cancelled);

        let result = service
            .download(&item, &source, "content/quake.zip", &root.join("quake.zip"))
            .await;

        assert!(matches!(result, Err(LauncherError::Cancelled)));
        assert_eq!(source.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(item.status(), InstallStatus::Canceled);
    }

    #[tokio::test]
    async fn items_cancelled_while_queued_report_cancelled() {
        let root = temp_root();
        write(&root.join("staged/quake.exe"), "exe");
        let service = service(Arc::new(RecordingRunner::default()));
        let item = service
            .queue()
            .enqueue(QueueItem::game(Uuid::new_v4(), "Quake", root.join("install"), Vec::new()))
            .expect("enqueue");
        service.queue().cancel(item.id).expect("cancel queued item");
        assert_eq!(item.status(), InstallStatus::Canceled);

        let download = service
            .download(&item, &StaticSource("payload"), "content/quake.zip", &root.join("quake.zip"))
            .await;
        let install = service
            .install_base(&item, &root.join("staged"), &GameManifest::new(item.id, "Quake"))
            .await;

        assert!(matches!(download, Err(LauncherError::Cancelled)));
        assert!(matches!(install, Err(LauncherError::Cancelled)));
        assert_eq!(item.status(), InstallStatus::Canceled);
        assert!(!root.join("quake.zip").exists());
        assert!(root.join("staged/quake.exe").exists());
    }

    #[tokio::test]
    async fn uninstall_removes_owned_files_and_prunes() {
        let root = temp_root();
        let install_dir = root.join("install");
        write(&root.join("staged/id1/pak0.pak"), "pak");
        write(&root.join("staged/quake.exe"), "exe");
        write(&install_dir.join("id1/config.cfg"), "user config");

        let runner = Arc::new(RecordingRunner::default());
        let service = service(runner.clone());
        let item = service
            .queue()
            .enqueue(QueueItem::game(Uuid::new_v4(), "Quake", &install_dir, Vec::new()))
            .expect("enqueue");
        let manifest = manifest_with_scripts("Quake", GameKind::Game, &[ScriptType::Uninstall]);
        let mut file_list = service
            .install_base(&item, &root.join("staged"), &manifest)
            .await
            .expect("install base")
            .file_list;
        file_list
            .base_title
            .add_file(FileEntry::new("id1/gone.pak", install_dir.join("id1/gone.pak")));

        let report = service.uninstall(&file_list).await.expect("uninstall");

        assert_eq!(report, UninstallReport { removed: 2, missing: 1, failed: 0 });
        assert!(!install_dir.join("quake.exe").exists());
        assert!(install_dir.join("id1/config.cfg").exists());
        assert!(!install_dir.join(DEFAULT_PRODUCT_MARKER).exists());
        assert_eq!(
            *runner.calls.lock().expect("calls lock"),
            vec![(ScriptType::Uninstall, install_dir.clone(), manifest.id)]
        );
    }

    #[tokio::test]
    async fn uninstall_requires_install_directory() {
        let service = service(Arc::new(RecordingRunner::default()));
        let result = service.uninstall(&FileList::empty()).await;
        assert!(matches!(result, Err(LauncherError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn restore_saves_moves_archive_into_install() {
        let root = temp_root();
        let source_install = root.join("old-install");
        write(&source_install.join("save/slot1.sav"), "cloud");
        let mut manifest = GameManifest::new(Uuid::new_v4(), "Quake");
        manifest.save_paths.push(crate::models::SavePathRule {
            id: Uuid::new_v4(),
            kind: crate::models::SavePathType::File,
            path: "save".to_string(),
            working_directory: "{InstallDir}".to_string(),
            is_regex: false,
        });
        let archive = root.join("saves.zip");
        SaveArchiveService::new(&source_install, PathCodec::with_locations(Vec::new(), Vec::new()))
            .pack_to_file(&archive, &manifest, None)
            .expect("pack saves");

        let install_dir = root.join("install");
        let service = service(Arc::new(RecordingRunner::default()));
        let item = service
            .queue()
            .enqueue(QueueItem::game(manifest.id, "Quake", &install_dir, Vec::new()))
            .expect("enqueue");

        let report = service
            .restore_saves(&item, &archive, &manifest)
            .await
            .expect("restore saves");

        assert_eq!(report.restored.len(), 1);
        assert_eq!(item.status(), InstallStatus::DownloadingSaves);
        assert_eq!(fs::read_to_string(install_dir.join("save/slot1.sav")).expect("read save"), "cloud");
    }
}
