//! Configuration file handling
//!
//! The CLI keeps aliases and transfer defaults in one TOML file,
//! `config.toml` under the platform config directory (`mpx/`), or under
//! `$MPX_CONFIG_DIR` when set. The transfer engine itself never reads it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::alias::Alias;
use crate::controller::DEFAULT_TASK_COUNT;
use crate::error::{Error, Result};
use crate::planner::DEFAULT_PART_SIZE;

/// Current configuration schema version
pub const CONFIG_VERSION: u32 = 1;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "MPX_CONFIG_DIR";

const CONFIG_FILE: &str = "config.toml";

/// Transfer options used when the command line does not set them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferDefaults {
    pub part_size: u64,
    pub task_count: usize,
    pub checkpoint: bool,
}

impl Default for TransferDefaults {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            task_count: DEFAULT_TASK_COUNT,
            checkpoint: true,
        }
    }
}

/// Contents of `config.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub version: u32,
    #[serde(default)]
    pub defaults: TransferDefaults,
    #[serde(default)]
    pub aliases: Vec<Alias>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            defaults: TransferDefaults::default(),
            aliases: Vec::new(),
        }
    }
}

/// Loads and saves the configuration file
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    /// Manager for the default configuration location
    pub fn new() -> Result<Self> {
        Ok(Self {
            path: default_config_dir()?.join(CONFIG_FILE),
        })
    }

    /// Manager for an explicit file path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the configuration; a missing file yields the defaults
    pub fn load(&self) -> Result<Config> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => return Err(e.into()),
        };
        let config: Config = toml::from_str(&text)?;
        if config.version > CONFIG_VERSION {
            return Err(Error::Config(format!(
                "{} was written by a newer version (schema {})",
                self.path.display(),
                config.version
            )));
        }
        Ok(config)
    }

    /// Write the configuration, creating the directory if needed
    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(config)?;
        std::fs::write(&self.path, text)?;

        // The file holds secret keys
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %self.path.display(), "Saved configuration");
        Ok(())
    }
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    dirs::config_dir()
        .map(|dir| dir.join("mpx"))
        .ok_or_else(|| Error::Config("cannot determine the configuration directory".into()))
}
