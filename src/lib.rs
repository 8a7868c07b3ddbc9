//! Content engine for the Otoshi launcher: installs titles and their addons into
//! place, tracks which files each one owns, and packs save data for the catalog.

pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod services;
pub mod utils;

pub use config::EngineConfig;
pub use errors::{LauncherError, Result};
pub use models::{GameKind, GameManifest, InstallStatus, SavePathRule, SavePathType, ScriptType};
