//! The agent's configuration file.
//!
//! The file is JSON. Missing fields take their defaults, and a missing file is created with
//! every default written out so it can be edited in place.

use std::path::{Path, PathBuf};

use funserver_core::config::ManagerConfig;
use funserver_utils::DEFAULT_LOG_LEVEL;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{FunserverCliError, FunserverCliResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Application directory name inside the platform configuration directory.
pub const CONFIG_APP_DIRNAME: &str = "fun";

/// Filename of the agent configuration.
pub const CONFIG_FILENAME: &str = "config.json";

/// Subdirectory of the configuration directory holding the agent's own logs.
pub const LOG_SUBDIR: &str = "logs";

/// Filename of the agent's log file.
pub const AGENT_LOG_FILENAME: &str = "funserver.log";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Configuration of the `funserver` agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Log level used when neither `RUST_LOG` nor a level flag is given.
    pub log_level: String,

    /// File the agent also writes its logs to.
    pub log_file: Option<PathBuf>,

    /// Lifecycle manager configuration.
    pub manager: ManagerConfig,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl AgentConfig {
    /// Loads the configuration at `path`, creating it with defaults if it does not exist.
    pub async fn load(path: &Path) -> FunserverCliResult<Self> {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save(path).await?;
                tracing::info!("wrote default agent configuration to {}", path.display());
                return Ok(config);
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&contents).map_err(|source| FunserverCliError::InvalidConfig {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the configuration to `path` as pretty-printed JSON.
    pub async fn save(&self, path: &Path) -> FunserverCliResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).await?;
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The platform configuration directory of the agent.
///
/// `~/.config/fun` on Linux, `~/Library/Application Support/fun` on macOS and
/// `%APPDATA%\fun` on Windows.
pub fn get_config_dir_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_APP_DIRNAME)
}

/// The default location of the agent configuration file.
pub fn get_default_config_path() -> PathBuf {
    get_config_dir_path().join(CONFIG_FILENAME)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_file: Some(get_config_dir_path().join(LOG_SUBDIR).join(AGENT_LOG_FILENAME)),
            manager: ManagerConfig::default(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
