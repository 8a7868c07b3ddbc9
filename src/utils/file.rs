use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::errors::{LauncherError, Result};
use crate::utils::cancellation::CancellationHandle;

const BACKUP_SUFFIX: &str = ".bak";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MoveReport {
    /// Destination-relative paths of every file moved into place.
    pub moved: Vec<PathBuf>,
    /// Destination-relative paths the displaced files were renamed to.
    pub backups: Vec<PathBuf>,
}

pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let temp_path = path.with_extension("tmp");
    if let Some(parent) = temp_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(&temp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    fs::rename(temp_path, path)?;
    Ok(())
}

/// Rejects absolute paths and `..` components, e.g. in archive entry names.
pub fn is_safe_relative_path(path: &Path) -> bool {
    use std::path::Component;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::ParentDir => return false,
            _ => {}
        }
    }
    true
}

pub fn is_blank(path: &Path) -> bool {
    path.to_string_lossy().trim().is_empty()
}

/// Removes empty subdirectories of `path`, deepest first. Never fails; `path` itself is kept.
pub fn delete_empty_directories(path: &Path) {
    if is_blank(path) || !path.is_dir() {
        return;
    }

    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::debug!("skip empty-dir pruning in {:?}: {}", path, err);
            return;
        }
    };

    for entry in entries.flatten() {
        let is_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }
        let dir = entry.path();
        delete_empty_directories(&dir);

        let empty = fs::read_dir(&dir)
            .map(|mut children| children.next().is_none())
            .unwrap_or(false);
        if empty {
            if let Err(err) = fs::remove_dir(&dir) {
                tracing::debug!("failed to remove empty directory {:?}: {}", dir, err);
            }
        }
    }
}

pub fn move_contents(source: &Path, destination: &Path) -> Result<MoveReport> {
    move_contents_with(source, destination, None)
}

/// Moves everything under `source` into `destination`, keeping relative paths.
///
/// A file already present at the target is not overwritten: it and any existing
/// `.bak` chain shift one step (`a` -> `a.bak` -> `a.bak.bak`) before the new file
/// lands. Source files are removed as they move and emptied source folders pruned.
pub fn move_contents_with(
    source: &Path,
    destination: &Path,
    cancel: Option<&CancellationHandle>,
) -> Result<MoveReport> {
    if is_blank(source) {
        return Err(LauncherError::InvalidArgument(
            "source directory is required".to_string(),
        ));
    }
    if is_blank(destination) {
        return Err(LauncherError::InvalidArgument(
            "destination directory is required".to_string(),
        ));
    }
    if !source.is_dir() {
        return Err(LauncherError::NotFound(format!(
            "source directory {} does not exist",
            source.display()
        )));
    }

    fs::create_dir_all(destination)?;

    let mut report = MoveReport::default();
    move_directory(source, destination, Path::new(""), cancel, &mut report)?;
    tracing::debug!(
        "moved {} file(s) from {:?} to {:?} ({} backup(s))",
        report.moved.len(),
        source,
        destination,
        report.backups.len()
    );
    Ok(report)
}

fn move_directory(
    source_dir: &Path,
    dest_dir: &Path,
    relative: &Path,
    cancel: Option<&CancellationHandle>,
    report: &mut MoveReport,
) -> Result<()> {
    let mut entries = fs::read_dir(source_dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        if let Some(cancel) = cancel {
            cancel.check()?;
        }

        let name = entry.file_name();
        let source_path = entry.path();
        let dest_path = dest_dir.join(&name);
        let relative_path = relative.join(&name);

        if entry.file_type()?.is_dir() {
            if path_exists(&dest_path) && !dest_path.is_dir() {
                let backup = shift_backup_chain(&dest_path)?;
                report.backups.push(relative_sibling(&relative_path, &backup));
            }
            fs::create_dir_all(&dest_path)?;
            move_directory(&source_path, &dest_path, &relative_path, cancel, report)?;
            if let Err(err) = fs::remove_dir(&source_path) {
                tracing::debug!("source directory {:?} not pruned: {}", source_path, err);
            }
            continue;
        }

        if path_exists(&dest_path) {
            let backup = shift_backup_chain(&dest_path)?;
            tracing::info!("kept existing {:?} as {:?}", dest_path, backup);
            report.backups.push(relative_sibling(&relative_path, &backup));
        }
        move_file(&source_path, &dest_path)?;
        report.moved.push(relative_path);
    }

    Ok(())
}

fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn with_backup_suffix(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Frees `path` by shifting it and its `.bak` chain one slot down. Returns the path
/// the previous occupant of `path` now lives at.
fn shift_backup_chain(path: &Path) -> Result<PathBuf> {
    let mut chain = vec![path.to_path_buf()];
    loop {
        let next = with_backup_suffix(&chain[chain.len() - 1]);
        let free = !path_exists(&next);
        chain.push(next);
        if free {
            break;
        }
    }

    for index in (0..chain.len() - 1).rev() {
        fs::rename(&chain[index], &chain[index + 1])?;
    }

    Ok(chain[1].clone())
}

fn relative_sibling(relative: &Path, absolute: &Path) -> PathBuf {
    match (relative.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => parent.join(name),
        _ => relative.to_path_buf(),
    }
}

fn move_file(source: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Err(err) = fs::rename(source, destination) {
        tracing::debug!(
            "rename {:?} -> {:?} failed ({}), falling back to copy",
            source,
            destination,
            err
        );
        fs::copy(source, destination)?;
        fs::remove_file(source)?;
    }
    Ok(())
}
