use std::{path::PathBuf, time::Duration};

use funserver_utils::{
    get_funserver_home_path, CONTAINERD_SUBDIR, DEFAULT_LOG_LEVEL, DEFAULT_PIPE_ADDRESS,
    ENGINE_LOG_FILENAME, ENGINE_SOCKET_FILENAME, ROOT_SUBDIR, STATE_SUBDIR,
};
use serde::{Deserialize, Serialize};

use crate::{address::ControlAddress, platform::HostOs};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How long the engine gets to create its control socket.
pub const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 30;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Configuration of the engine daemon started by the native backend.
///
/// All fields are passed verbatim to the engine as startup arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory for persistent engine data.
    pub root: PathBuf,

    /// Directory for engine runtime state.
    pub state: PathBuf,

    /// Address the engine listens on.
    pub address: ControlAddress,

    /// Optional path to a full engine configuration document.
    pub config: Option<PathBuf>,

    /// Engine log level.
    pub log_level: String,

    /// File the engine's stdout and stderr are appended to.
    pub log_file: PathBuf,

    /// Seconds to wait for the control address to become reachable.
    pub readiness_timeout_secs: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ServerConfig {
    /// Default configuration rooted at `home` for a host running `os`.
    pub fn with_home(home: impl Into<PathBuf>, os: HostOs) -> Self {
        let data_dir = home.into().join(CONTAINERD_SUBDIR);
        let address = match os {
            HostOs::Windows => ControlAddress::NamedPipe(DEFAULT_PIPE_ADDRESS.to_string()),
            _ => ControlAddress::UnixSocket(data_dir.join(ENGINE_SOCKET_FILENAME)),
        };

        Self {
            root: data_dir.join(ROOT_SUBDIR),
            state: data_dir.join(STATE_SUBDIR),
            address,
            config: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_file: data_dir.join(ENGINE_LOG_FILENAME),
            readiness_timeout_secs: DEFAULT_READINESS_TIMEOUT_SECS,
        }
    }

    /// The readiness timeout as a [`Duration`].
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for ServerConfig {
    fn default() -> Self {
        Self::with_home(get_funserver_home_path(), HostOs::current())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
