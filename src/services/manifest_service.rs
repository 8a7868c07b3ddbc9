use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::DEFAULT_PRODUCT_MARKER;
use crate::errors::{LauncherError, Result};
use crate::models::GameManifest;
use crate::utils::file::write_atomic;

pub const MANIFEST_FILE: &str = "Manifest.json";

/// Reads and writes per-entity manifests under an install directory:
/// `{install}/.otoshi/{id}/Manifest.json`, or `{install}/Manifest.json` for a
/// freshly extracted install that has no per-id layout yet.
#[derive(Clone, Debug)]
pub struct ManifestStore {
    install_directory: PathBuf,
    marker: String,
}

impl ManifestStore {
    pub fn new(install_directory: impl Into<PathBuf>) -> Self {
        Self::with_marker(install_directory, DEFAULT_PRODUCT_MARKER)
    }

    pub fn with_marker(install_directory: impl Into<PathBuf>, marker: impl Into<String>) -> Self {
        Self {
            install_directory: install_directory.into(),
            marker: marker.into(),
        }
    }

    pub fn install_directory(&self) -> &Path {
        &self.install_directory
    }

    pub fn metadata_directory(&self, id: Uuid) -> PathBuf {
        self.install_directory
            .join(&self.marker)
            .join(id.to_string())
    }

    pub fn path(&self, id: Option<Uuid>) -> PathBuf {
        match id {
            Some(id) => self.metadata_directory(id).join(MANIFEST_FILE),
            None => self.install_directory.join(MANIFEST_FILE),
        }
    }

    pub fn exists(&self, id: Option<Uuid>) -> bool {
        self.path(id).is_file()
    }

    /// Missing per-id manifests read as `None`; a missing root manifest is `NotFound`.
    pub fn read(&self, id: Option<Uuid>) -> Result<Option<GameManifest>> {
        let path = self.path(id);
        if !path.is_file() {
            return match id {
                Some(_) => Ok(None),
                None => Err(LauncherError::NotFound(format!(
                    "manifest {}",
                    path.display()
                ))),
            };
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(Some(deserialize_manifest(&data)?))
    }

    pub fn write(&self, manifest: &GameManifest, id: Option<Uuid>) -> Result<PathBuf> {
        let path = self.path(id);
        let payload = serialize_manifest(manifest)?;
        write_atomic(&path, payload.as_bytes())?;
        tracing::debug!("wrote manifest {} to {:?}", manifest.id, path);
        Ok(path)
    }

    pub async fn read_async(&self, id: Option<Uuid>) -> Result<Option<GameManifest>> {
        let path = self.path(id);
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(Some(deserialize_manifest(&data)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => match id {
                Some(_) => Ok(None),
                None => Err(LauncherError::NotFound(format!(
                    "manifest {}",
                    path.display()
                ))),
            },
            Err(err) => Err(err.into()),
        }
    }

    pub async fn write_async(&self, manifest: &GameManifest, id: Option<Uuid>) -> Result<PathBuf> {
        let path = self.path(id);
        let payload = serialize_manifest(manifest)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, payload).await?;
        tokio::fs::rename(&temp_path, &path).await?;
        Ok(path)
    }

    /// Digest of the stored manifest, `None` where [`read`](Self::read) would give `None`.
    pub fn digest(&self, id: Option<Uuid>) -> Result<Option<String>> {
        match self.read(id)? {
            Some(manifest) => Ok(Some(manifest_digest(&manifest)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, id: Uuid) -> Result<()> {
        let dir = self.metadata_directory(id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// Byte-identical output for equal manifests.
pub fn serialize_manifest(manifest: &GameManifest) -> Result<String> {
    Ok(serde_json::to_string_pretty(manifest)?)
}

pub fn deserialize_manifest(data: &str) -> Result<GameManifest> {
    Ok(serde_json::from_str(data.trim_start_matches('\u{feff}'))?)
}

pub fn manifest_digest(manifest: &GameManifest) -> Result<String> {
    let payload = serialize_manifest(manifest)?;
    Ok(hex::encode(Sha256::digest(payload.as_bytes())))
}
