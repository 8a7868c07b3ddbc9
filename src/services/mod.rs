pub mod api_client;
pub mod file_list;
pub mod install_queue;
pub mod install_service;
pub mod manifest_service;
pub mod save_archive_service;
pub mod transfer_service;
pub mod upload_service;

pub use api_client::ApiClient;
pub use file_list::{FileEntry, FileList, FileListEntry, InstallResult};
pub use install_queue::{InstallQueue, QueueItem, QueueItemKind, QueueItemSnapshot};
pub use install_service::{InstallService, ScriptRunner, UninstallReport};
pub use manifest_service::ManifestStore;
pub use save_archive_service::{CapturedFile, PackReport, RestoreReport, SaveArchiveService};
pub use transfer_service::{ContentSource, TransferService};
pub use upload_service::{upload_in_chunks, ChunkTransport, UploadChunk};
