use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::bootstrap::{DEFAULT_HOSTNAME, DEFAULT_ROOT_PASSWORD};
use crate::session::MAX_LOGIN_ATTEMPTS;

/// Runtime settings for a WorkNix machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorknixConfig {
    /// Directory holding the snapshot blobs
    pub data_dir: PathBuf,
    /// Hostname written to /etc/hostname on first boot
    pub hostname: String,
    /// Consecutive failed logins before the prompt exits
    pub max_login_attempts: u32,
    /// Root password used when no credential snapshot exists
    pub default_root_password: String,
    /// Log filter used when RUST_LOG is unset
    pub log_level: String,
}

impl Default for WorknixConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./worknix-data"),
            hostname: DEFAULT_HOSTNAME.to_string(),
            max_login_attempts: MAX_LOGIN_ATTEMPTS,
            default_root_password: DEFAULT_ROOT_PASSWORD.to_string(),
            log_level: String::from("info"),
        }
    }
}

impl WorknixConfig {
    /// Loads settings from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: WorknixConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if given and present, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) if p.exists() => Self::from_file(p),
            Some(p) => {
                tracing::warn!("Config file not found, using defaults: {}", p.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.max_login_attempts == 0 {
            anyhow::bail!("max_login_attempts must be at least 1");
        }
        if self.hostname.trim().is_empty() {
            anyhow::bail!("hostname must not be empty");
        }
        Ok(())
    }
}
