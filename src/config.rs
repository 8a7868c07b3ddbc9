use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{LauncherError, Result};
use crate::utils::paths::resolve_log_dir;
use crate::utils::retry::RetryPolicy;

pub const CONFIG_FILE: &str = "launcher.config.json";
pub const DEFAULT_PRODUCT_MARKER: &str = ".otoshi";
pub(crate) const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 1024 * 1024;
const MIN_UPLOAD_CHUNK_SIZE: usize = 4 * 1024;
const MAX_UPLOAD_CHUNK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub api_base_url: String,
    pub access_token: Option<String>,
    pub product_marker: String,
    pub retry_max_attempts: usize,
    pub retry_wait_ms: u64,
    pub upload_chunk_size: usize,
    pub http_timeout_secs: u64,
    pub log_dir: Option<PathBuf>,
    /// Default `tracing` filter; `RUST_LOG` still wins.
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:1337".to_string(),
            access_token: None,
            product_marker: DEFAULT_PRODUCT_MARKER.to_string(),
            retry_max_attempts: 3,
            retry_wait_ms: 500,
            upload_chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
            http_timeout_secs: 20,
            log_dir: None,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Reads `launcher.config.json` from `dir` if present, then applies `LAUNCHER_*` overrides.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        let mut config = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            serde_json::from_str::<EngineConfig>(&data)?
        } else {
            EngineConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = env_string(&lookup, "LAUNCHER_API_BASE_URL") {
            self.api_base_url = value;
        }
        if let Some(value) = env_string(&lookup, "LAUNCHER_ACCESS_TOKEN") {
            self.access_token = Some(value);
        }
        if let Some(value) = env_string(&lookup, "LAUNCHER_PRODUCT_MARKER") {
            self.product_marker = value;
        }
        if let Some(value) = env_usize(&lookup, "LAUNCHER_RETRY_MAX_ATTEMPTS") {
            self.retry_max_attempts = value.clamp(1, 10);
        }
        if let Some(value) = env_usize(&lookup, "LAUNCHER_RETRY_WAIT_MS") {
            self.retry_wait_ms = value.clamp(0, 30000) as u64;
        }
        if let Some(value) = env_usize(&lookup, "LAUNCHER_UPLOAD_CHUNK_SIZE") {
            self.upload_chunk_size = value.clamp(MIN_UPLOAD_CHUNK_SIZE, MAX_UPLOAD_CHUNK_SIZE);
        }
        if let Some(value) = env_usize(&lookup, "LAUNCHER_HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = value.clamp(1, 600) as u64;
        }
        if let Some(value) = env_string(&lookup, "LAUNCHER_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = env_string(&lookup, "LAUNCHER_LOG_LEVEL") {
            self.log_level = value;
        }
        if env_truthy(&lookup, "LAUNCHER_DISABLE_RETRY") {
            self.retry_max_attempts = 1;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.product_marker.trim().is_empty() {
            return Err(LauncherError::Config("product marker is empty".to_string()));
        }
        if self.upload_chunk_size == 0 {
            return Err(LauncherError::Config("upload chunk size is zero".to_string()));
        }
        Ok(())
    }

    /// The configured log directory, or `logs` under the launcher root.
    pub fn log_directory(&self) -> PathBuf {
        match self.log_dir.as_ref() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.clone(),
            _ => resolve_log_dir(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_wait_ms),
        )
    }
}

fn env_string<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_truthy<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> bool {
    lookup(key)
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
        })
        .unwrap_or(false)
}

fn env_usize<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Option<usize> {
    lookup(key).and_then(|value| value.trim().parse::<usize>().ok())
}
