use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum InstallStatus {
    Queued = 0,
    Starting = 1,
    Downloading = 2,
    Moving = 3,
    InstallingRedistributables = 4,
    InstallingMods = 5,
    InstallingExpansions = 6,
    InstallingAddons = 7,
    RunningScripts = 8,
    DownloadingSaves = 9,
    Complete = 10,
    Failed = 11,
    Canceled = 12,
}

impl InstallStatus {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            InstallStatus::Starting
                | InstallStatus::Downloading
                | InstallStatus::Moving
                | InstallStatus::InstallingRedistributables
                | InstallStatus::InstallingMods
                | InstallStatus::InstallingExpansions
                | InstallStatus::InstallingAddons
                | InstallStatus::RunningScripts
                | InstallStatus::DownloadingSaves
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InstallStatus::Complete | InstallStatus::Failed | InstallStatus::Canceled
        )
    }

    /// Forward moves (skipping allowed) or any non-terminal state into `Failed`/`Canceled`.
    pub fn can_transition_to(self, next: InstallStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            InstallStatus::Failed | InstallStatus::Canceled => true,
            _ => next > self,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        let status = match value {
            0 => InstallStatus::Queued,
            1 => InstallStatus::Starting,
            2 => InstallStatus::Downloading,
            3 => InstallStatus::Moving,
            4 => InstallStatus::InstallingRedistributables,
            5 => InstallStatus::InstallingMods,
            6 => InstallStatus::InstallingExpansions,
            7 => InstallStatus::InstallingAddons,
            8 => InstallStatus::RunningScripts,
            9 => InstallStatus::DownloadingSaves,
            10 => InstallStatus::Complete,
            11 => InstallStatus::Failed,
            12 => InstallStatus::Canceled,
            _ => return None,
        };
        Some(status)
    }
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SavePathType {
    File,
    Registry,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SavePathRule {
    pub id: Uuid,
    #[serde(rename = "type", default = "default_save_path_type")]
    pub kind: SavePathType,
    pub path: String,
    #[serde(default)]
    pub working_directory: String,
    #[serde(default)]
    pub is_regex: bool,
}

fn default_save_path_type() -> SavePathType {
    SavePathType::File
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScriptType {
    Install,
    Uninstall,
    NameChange,
    KeyChange,
    DetectInstall,
    BeforeStart,
    AfterStop,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum GameKind {
    #[default]
    Game,
    Expansion,
    StandaloneExpansion,
    Mod,
    Redistributable,
    Tool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ManifestAction {
    pub name: String,
    pub path: String,
    pub arguments: Option<String>,
    pub working_directory: Option<String>,
    pub is_primary: bool,
    pub sort_order: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ManifestScript {
    pub id: Uuid,
    pub script_type: ScriptType,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub requires_admin: bool,
}

/// Portable metadata stored beside installed files and embedded in save archives.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default)]
pub struct GameManifest {
    pub id: Uuid,
    pub title: String,
    pub sort_title: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub kind: GameKind,
    pub base_game_id: Option<Uuid>,
    pub actions: Vec<ManifestAction>,
    pub save_paths: Vec<SavePathRule>,
    pub scripts: Vec<ManifestScript>,
    pub dependent_games: Vec<Uuid>,
    pub redistributables: Vec<Uuid>,
    pub custom_fields: BTreeMap<String, String>,
}

impl GameManifest {
    pub fn new(id: Uuid, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn has_script(&self, script_type: ScriptType) -> bool {
        self.scripts
            .iter()
            .any(|script| script.script_type == script_type)
    }
}
