use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::GameManifest;

/// Identity key for an entry path: separator- and case-insensitive.
pub fn entry_key(entry_path: &str) -> String {
    entry_path
        .replace('\\', "/")
        .trim_start_matches('/')
        .to_lowercase()
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub entry_path: String,
    pub local_path: PathBuf,
}

impl FileEntry {
    pub fn new(entry_path: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            entry_path: entry_path.into(),
            local_path: local_path.into(),
        }
    }
}

#[derive(Deserialize)]
struct FileListEntryRecord {
    title_id: Uuid,
    #[serde(default)]
    manifest: Option<GameManifest>,
    #[serde(default)]
    files: Vec<FileEntry>,
}

/// Files owned by exactly one title or addon.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(from = "FileListEntryRecord")]
pub struct FileListEntry {
    pub title_id: Uuid,
    pub manifest: Option<GameManifest>,
    files: Vec<FileEntry>,
    #[serde(skip)]
    keys: HashSet<String>,
}

impl From<FileListEntryRecord> for FileListEntry {
    fn from(record: FileListEntryRecord) -> Self {
        let mut entry = FileListEntry::new(record.title_id, record.manifest);
        entry.add_files(record.files);
        entry
    }
}

impl PartialEq for FileListEntry {
    fn eq(&self, other: &Self) -> bool {
        self.title_id == other.title_id
            && self.manifest == other.manifest
            && self.files == other.files
    }
}

impl FileListEntry {
    pub fn new(title_id: Uuid, manifest: Option<GameManifest>) -> Self {
        Self {
            title_id,
            manifest,
            files: Vec::new(),
            keys: HashSet::new(),
        }
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, entry_path: &str) -> bool {
        self.keys.contains(&entry_key(entry_path))
    }

    /// Returns false when the entry path is already present.
    pub fn add_file(&mut self, entry: FileEntry) -> bool {
        if !self.keys.insert(entry_key(&entry.entry_path)) {
            return false;
        }
        self.files.push(entry);
        true
    }

    pub fn add_files<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = FileEntry>,
    {
        entries
            .into_iter()
            .map(|entry| self.add_file(entry))
            .filter(|added| *added)
            .count()
    }

    /// Adopts `other.manifest` only when this entry has none; appends unseen files.
    pub fn merge(&mut self, other: &FileListEntry) {
        if self.manifest.is_none() {
            self.manifest = other.manifest.clone();
        }
        for entry in &other.files {
            self.add_file(entry.clone());
        }
    }
}

/// A title's files plus the file lists of its dependents (addons, expansions).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileList {
    pub install_directory: Option<PathBuf>,
    pub base_title: FileListEntry,
    #[serde(default)]
    pub dependents: BTreeMap<Uuid, FileList>,
}

impl Default for FileList {
    fn default() -> Self {
        Self::empty()
    }
}

impl FileList {
    pub fn new(install_directory: impl Into<PathBuf>, title_id: Uuid) -> Self {
        Self {
            install_directory: Some(install_directory.into()),
            base_title: FileListEntry::new(title_id, None),
            dependents: BTreeMap::new(),
        }
    }

    pub fn empty() -> Self {
        Self {
            install_directory: None,
            base_title: FileListEntry::new(Uuid::nil(), None),
            dependents: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.install_directory.is_none()
            && self.base_title.is_empty()
            && self.dependents.is_empty()
    }

    pub fn install_directory(&self) -> Option<&Path> {
        self.install_directory.as_deref()
    }

    pub fn merge_base(&mut self, other: &FileList) {
        self.base_title.merge(&other.base_title);
    }

    pub fn merge_base_as_dependent(&mut self, id: Uuid, other: &FileList) {
        let dependent = self.dependents.entry(id).or_insert_with(|| FileList {
            install_directory: other.install_directory.clone(),
            base_title: FileListEntry::new(id, other.base_title.manifest.clone()),
            dependents: BTreeMap::new(),
        });
        dependent.base_title.merge(&other.base_title);
    }

    /// Copies dependents this list lacks (base files included) and merges nested
    /// dependents recursively. Existing dependents are merged, never replaced.
    pub fn merge_dependents(&mut self, other: &FileList) {
        for (id, other_dependent) in &other.dependents {
            let dependent = self.dependents.entry(*id).or_insert_with(|| FileList {
                install_directory: other_dependent.install_directory.clone(),
                base_title: FileListEntry::new(*id, None),
                dependents: BTreeMap::new(),
            });
            dependent.merge_base(other_dependent);
            dependent.merge_dependents(other_dependent);
        }
    }

    pub fn merge(&mut self, other: &FileList) {
        self.merge_base(other);
        self.merge_dependents(other);
    }

    /// Base files first, then each direct dependent's base files; the first entry
    /// seen for an entry path wins.
    pub fn to_flat_distinct_entries(&self) -> impl Iterator<Item = &FileEntry> + '_ {
        let mut seen = HashSet::new();
        self.base_title
            .files()
            .iter()
            .chain(
                self.dependents
                    .values()
                    .flat_map(|dependent| dependent.base_title.files().iter()),
            )
            .filter(move |entry| seen.insert(entry_key(&entry.entry_path)))
    }
}

/// What an install or merge pass hands back to the orchestrator.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct InstallResult {
    pub install_directory: PathBuf,
    pub file_list: FileList,
}

impl InstallResult {
    pub fn new(install_directory: impl Into<PathBuf>, title_id: Uuid) -> Self {
        let install_directory = install_directory.into();
        Self {
            file_list: FileList::new(install_directory.clone(), title_id),
            install_directory,
        }
    }
}
