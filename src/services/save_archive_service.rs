use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use regex::Regex;
use tracing::Span;
use uuid::Uuid;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::DEFAULT_PRODUCT_MARKER;
use crate::errors::{LauncherError, Result};
use crate::models::{GameManifest, SavePathRule, SavePathType};
use crate::services::manifest_service::{deserialize_manifest, serialize_manifest};
use crate::utils::cancellation::CancellationHandle;
use crate::utils::file::{is_blank, is_safe_relative_path, move_contents_with};
use crate::utils::paths::PathCodec;

pub const ARCHIVE_MANIFEST_ENTRY: &str = "_manifest.json";
pub const ARCHIVE_FILES_PREFIX: &str = "Files";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedFile {
    pub rule_id: Uuid,
    pub source: PathBuf,
    pub archive_path: String,
}

#[derive(Clone, Debug, Default)]
pub struct PackReport {
    pub files: Vec<CapturedFile>,
    pub total_bytes: u64,
    pub unsupported_rules: Vec<Uuid>,
}

#[derive(Clone, Debug, Default)]
pub struct RestoreReport {
    pub restored: Vec<PathBuf>,
    pub backups: Vec<PathBuf>,
    pub unsupported_rules: Vec<Uuid>,
}

/// Packs save data selected by a manifest's save path rules into an uncompressed
/// zip, and restores such archives back into place.
#[derive(Clone, Debug)]
pub struct SaveArchiveService {
    install_directory: PathBuf,
    codec: PathCodec,
    span: Span,
}

impl SaveArchiveService {
    pub fn new(install_directory: impl Into<PathBuf>, codec: PathCodec) -> Self {
        let install_directory = install_directory.into();
        let span = tracing::info_span!("save_archive", install_dir = %install_directory.display());
        Self {
            install_directory,
            codec,
            span,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn working_directory(&self, rule: &SavePathRule) -> PathBuf {
        if rule.working_directory.trim().is_empty() {
            return self.install_directory.clone();
        }
        PathBuf::from(
            self.codec
                .expand(&rule.working_directory, &self.install_directory),
        )
    }

    fn literal_target(&self, rule: &SavePathRule, working_directory: &Path) -> PathBuf {
        let expanded = PathBuf::from(self.codec.expand(&rule.path, &self.install_directory));
        if expanded.is_absolute() {
            expanded
        } else {
            working_directory.join(expanded)
        }
    }

    /// Files selected by one rule, with their archive names.
    pub fn capture_rule(&self, rule: &SavePathRule) -> Result<Vec<CapturedFile>> {
        if rule.kind == SavePathType::Registry {
            return Err(LauncherError::NotImplemented(format!(
                "registry save path {}",
                rule.id
            )));
        }

        let working_directory = self.working_directory(rule);
        let (targets, root) = if rule.is_regex {
            (regex_targets(rule, &working_directory)?, working_directory)
        } else {
            let target = self.literal_target(rule, &working_directory);
            let root = capture_root(&working_directory, &target, target.is_file());
            (literal_targets(&target)?, root)
        };

        targets
            .into_iter()
            .map(|source| {
                let relative = source.strip_prefix(&root).map_err(|_| {
                    LauncherError::InvalidArgument(format!(
                        "save file {:?} is outside {:?}",
                        source, root
                    ))
                })?;
                Ok(CapturedFile {
                    rule_id: rule.id,
                    archive_path: archive_path(rule.id, relative),
                    source,
                })
            })
            .collect()
    }

    /// Directory a rule's staged files are moved back into. Mirrors the root
    /// `capture_rule` made their archive paths relative to.
    fn restore_root(&self, rule: &SavePathRule, rule_staging: &Path) -> PathBuf {
        let working_directory = self.working_directory(rule);
        if rule.is_regex {
            return working_directory;
        }
        let target = self.literal_target(rule, &working_directory);
        let target_is_file = target.is_file()
            || (!target.is_dir()
                && target
                    .file_name()
                    .map(|name| rule_staging.join(name).is_file())
                    .unwrap_or(false));
        capture_root(&working_directory, &target, target_is_file)
    }

    pub fn pack<W: Write + Seek>(
        &self,
        writer: W,
        manifest: &GameManifest,
        cancel: Option<&CancellationHandle>,
    ) -> Result<(W, PackReport)> {
        let _entered = self.span.enter();
        let mut zip = ZipWriter::new(writer);
        let mut report = PackReport::default();

        for rule in &manifest.save_paths {
            let captured = match self.capture_rule(rule) {
                Ok(captured) => captured,
                Err(LauncherError::NotImplemented(reason)) => {
                    tracing::warn!("skipping save path: {}", reason);
                    report.unsupported_rules.push(rule.id);
                    continue;
                }
                Err(err) => return Err(err),
            };

            for file in captured {
                if let Some(cancel) = cancel {
                    cancel.check()?;
                }
                let mut source = File::open(&file.source)?;
                let size = source.metadata()?.len();
                let options = FileOptions::default()
                    .compression_method(CompressionMethod::Stored)
                    .large_file(size >= u32::MAX as u64);
                zip.start_file(file.archive_path.as_str(), options)?;
                io::copy(&mut source, &mut zip)?;
                report.total_bytes += size;
                report.files.push(file);
            }
        }

        zip.start_file(
            ARCHIVE_MANIFEST_ENTRY,
            FileOptions::default().compression_method(CompressionMethod::Stored),
        )?;
        zip.write_all(serialize_manifest(manifest)?.as_bytes())?;

        let writer = zip.finish()?;
        tracing::info!(
            "packed {} save file(s), {} bytes for {}",
            report.files.len(),
            report.total_bytes,
            manifest.id
        );
        Ok((writer, report))
    }

    pub fn pack_to_file(
        &self,
        archive: &Path,
        manifest: &GameManifest,
        cancel: Option<&CancellationHandle>,
    ) -> Result<PackReport> {
        if let Some(parent) = archive.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(archive)?;
        let (file, report) = self.pack(file, manifest, cancel)?;
        file.sync_all()?;
        Ok(report)
    }

    /// Extracts `Files/{ruleId}/...` entries and moves each rule's files back to
    /// where they were captured from. Files already in place are kept as `.bak`.
    pub fn restore<R: Read + Seek>(
        &self,
        reader: R,
        manifest: &GameManifest,
        cancel: Option<&CancellationHandle>,
    ) -> Result<RestoreReport> {
        let _entered = self.span.enter();
        let staging = self
            .install_directory
            .join(DEFAULT_PRODUCT_MARKER)
            .join("staging")
            .join(Uuid::new_v4().to_string());
        fs::create_dir_all(&staging)?;

        let result = self.restore_from_staging(reader, manifest, cancel, &staging);
        if let Err(err) = fs::remove_dir_all(&staging) {
            tracing::debug!("failed to remove restore staging {:?}: {}", staging, err);
        }
        result
    }

    fn restore_from_staging<R: Read + Seek>(
        &self,
        reader: R,
        manifest: &GameManifest,
        cancel: Option<&CancellationHandle>,
        staging: &Path,
    ) -> Result<RestoreReport> {
        let mut archive = ZipArchive::new(reader)?;
        for index in 0..archive.len() {
            if let Some(cancel) = cancel {
                cancel.check()?;
            }
            let mut entry = archive.by_index(index)?;
            let name = entry.name().replace('\\', "/");
            if !name.starts_with(&format!("{ARCHIVE_FILES_PREFIX}/")) || entry.is_dir() {
                continue;
            }
            let entry_path = Path::new(&name);
            if !is_safe_relative_path(entry_path) {
                tracing::warn!("skipping unsafe archive entry {}", name);
                continue;
            }
            let out_path = staging.join(entry_path);
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&out_path)?;
            io::copy(&mut entry, &mut outfile)?;
        }

        let mut report = RestoreReport::default();
        for rule in &manifest.save_paths {
            if rule.kind == SavePathType::Registry {
                report.unsupported_rules.push(rule.id);
                continue;
            }
            let rule_staging = staging
                .join(ARCHIVE_FILES_PREFIX)
                .join(rule.id.to_string());
            if !rule_staging.is_dir() {
                continue;
            }
            let destination = self.restore_root(rule, &rule_staging);
            let moved = move_contents_with(&rule_staging, &destination, cancel)?;
            report
                .restored
                .extend(moved.moved.iter().map(|path| destination.join(path)));
            report
                .backups
                .extend(moved.backups.iter().map(|path| destination.join(path)));
        }

        tracing::info!(
            "restored {} save file(s) for {}",
            report.restored.len(),
            manifest.id
        );
        Ok(report)
    }
}

pub fn read_embedded_manifest<R: Read + Seek>(reader: R) -> Result<GameManifest> {
    let mut archive = ZipArchive::new(reader)?;
    let mut entry = match archive.by_name(ARCHIVE_MANIFEST_ENTRY) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(LauncherError::NotFound(ARCHIVE_MANIFEST_ENTRY.to_string()))
        }
        Err(err) => return Err(err.into()),
    };
    let mut data = String::new();
    entry.read_to_string(&mut data)?;
    deserialize_manifest(&data)
}

fn archive_path(rule_id: Uuid, relative: &Path) -> String {
    let relative = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    format!("{ARCHIVE_FILES_PREFIX}/{rule_id}/{relative}")
}

/// Rule patterns use `/`; on `\` hosts it becomes an escaped backslash.
pub fn portable_pattern(pattern: &str) -> String {
    if MAIN_SEPARATOR == '\\' {
        pattern.replace('/', "\\\\")
    } else {
        pattern.to_string()
    }
}

/// Literal targets outside the working directory are archived relative to
/// themselves (directories) or their parent (single files).
fn capture_root(working_directory: &Path, target: &Path, target_is_file: bool) -> PathBuf {
    if target.starts_with(working_directory) {
        return working_directory.to_path_buf();
    }
    if target_is_file {
        if let Some(parent) = target.parent() {
            return parent.to_path_buf();
        }
    }
    target.to_path_buf()
}

fn literal_targets(target: &Path) -> Result<Vec<PathBuf>> {
    if target.is_dir() {
        return walk_files(target);
    }
    if target.is_file() {
        return Ok(vec![target.to_path_buf()]);
    }
    tracing::debug!("save path {:?} does not exist", target);
    Ok(Vec::new())
}

fn regex_targets(rule: &SavePathRule, working_directory: &Path) -> Result<Vec<PathBuf>> {
    let pattern = Regex::new(&portable_pattern(&rule.path))?;
    if is_blank(working_directory) || !working_directory.is_dir() {
        tracing::debug!("save path working directory {:?} does not exist", working_directory);
        return Ok(Vec::new());
    }
    Ok(walk_files(working_directory)?
        .into_iter()
        .filter(|path| {
            path.strip_prefix(working_directory)
                .map(|relative| pattern.is_match(&relative.to_string_lossy()))
                .unwrap_or(false)
        })
        .collect())
}

fn walk_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}
