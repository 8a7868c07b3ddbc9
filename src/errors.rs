use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Invalid save path pattern: {0}")]
    Regex(#[from] regex::Error),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Not implemented: {0}")]
    NotImplemented(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Upload {key} failed at byte {offset}: {source}")]
    Upload {
        key: String,
        offset: u64,
        #[source]
        source: Box<LauncherError>,
    },
    #[error("Config error: {0}")]
    Config(String),
}

impl LauncherError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            LauncherError::Cancelled => true,
            LauncherError::Upload { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LauncherError>;
