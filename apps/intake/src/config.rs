//! Intake configuration.
//!
//! Stored as TOML at `$FORMUPLOAD_CONFIG`, or by default:
//! - Linux/macOS: `~/.config/formupload/intake.toml`
//! - Windows: `%APPDATA%/formupload/intake.toml`

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "FORMUPLOAD_CONFIG";

/// Intake server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the API server binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// API server port (0 = auto-assign).
    #[serde(default)]
    pub port: u16,

    /// Root of the resumable transport's upload store.
    #[serde(default = "default_buffer_path")]
    pub buffer_path: String,

    /// Public transport URL advertised to clients.
    #[serde(default = "default_upload_endpoint")]
    pub upload_endpoint: String,

    /// Largest accepted upload in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_buffer_path() -> String {
    formupload_file_ops::default_buffer_path()
        .to_string_lossy()
        .into_owned()
}

fn default_upload_endpoint() -> String {
    formupload_intake::DEFAULT_UPLOAD_ENDPOINT.into()
}

fn default_max_upload_size() -> u64 {
    formupload_intake::DEFAULT_MAX_UPLOAD_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: 0,
            buffer_path: default_buffer_path(),
            upload_endpoint: default_upload_endpoint(),
            max_upload_size: default_max_upload_size(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or writes a default one if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            tracing::info!(path = %path.display(), "wrote default configuration");
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("formupload").join("intake.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("formupload")
            .join("intake.toml")
    }
}
