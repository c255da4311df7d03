use std::fmt;

use funserver_utils::{get_funserver_home_path, DEFAULT_NAMESPACE};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{address::ControlAddress, platform::HostOs};

use super::{LinuxKitVmConfig, ServerConfig, WslConfig};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Which halves of the runtime the manager brings up.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Start an engine backend, do not connect a client.
    Server,

    /// Connect to an engine someone else runs.
    #[default]
    Client,

    /// Start an engine backend and connect a client to it.
    Both,
}

/// Configuration of the lifecycle manager.
///
/// ## Examples
///
/// ```
/// use funserver_core::config::{ManagerConfig, RunMode};
///
/// let config = ManagerConfig::builder().run_mode(RunMode::Both).build();
/// assert!(config.run_mode.runs_server());
/// assert!(config.run_mode.runs_client());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct ManagerConfig {
    /// Which halves of the runtime to bring up.
    #[builder(default)]
    pub run_mode: RunMode,

    /// Native engine configuration.
    #[builder(default)]
    pub server: ServerConfig,

    /// WSL2 backend configuration.
    #[builder(default)]
    pub wsl: WslConfig,

    /// HyperKit VM backend configuration.
    #[builder(default)]
    pub linuxkit: LinuxKitVmConfig,

    /// Address the client connects to in client-only mode.
    #[builder(default = ServerConfig::default().address)]
    pub client_address: ControlAddress,

    /// Runtime namespace the client works in.
    #[builder(default = DEFAULT_NAMESPACE.to_string())]
    pub namespace: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RunMode {
    /// Returns `true` if an engine backend is started in this mode.
    pub fn runs_server(&self) -> bool {
        matches!(self, RunMode::Server | RunMode::Both)
    }

    /// Returns `true` if a runtime client is connected in this mode.
    pub fn runs_client(&self) -> bool {
        matches!(self, RunMode::Client | RunMode::Both)
    }
}

impl ManagerConfig {
    /// Default configuration rooted at `home` for a host running `os`.
    pub fn with_home(home: impl Into<std::path::PathBuf>, os: HostOs) -> Self {
        let home = home.into();
        let server = ServerConfig::with_home(&home, os);
        Self {
            run_mode: RunMode::default(),
            client_address: server.address.clone(),
            server,
            wsl: WslConfig::with_home(&home),
            linuxkit: LinuxKitVmConfig::with_home(&home),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::with_home(get_funserver_home_path(), HostOs::current())
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Server => write!(f, "server"),
            RunMode::Client => write!(f, "client"),
            RunMode::Both => write!(f, "both"),
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = crate::FunserverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(RunMode::Server),
            "client" => Ok(RunMode::Client),
            "both" => Ok(RunMode::Both),
            other => Err(crate::FunserverError::Config(format!(
                "unknown run mode '{other}', expected server, client or both"
            ))),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_mode_halves() {
        assert!(RunMode::Server.runs_server() && !RunMode::Server.runs_client());
        assert!(!RunMode::Client.runs_server() && RunMode::Client.runs_client());
        assert!(RunMode::Both.runs_server() && RunMode::Both.runs_client());
    }

    #[test]
    fn test_run_mode_parses_case_insensitively() {
        assert_eq!("BOTH".parse::<RunMode>().unwrap(), RunMode::Both);
        assert!("daemon".parse::<RunMode>().is_err());
    }

    #[test]
    fn test_manager_config_json_uses_lowercase_run_mode() {
        let config: ManagerConfig =
            serde_json::from_str(r#"{ "run_mode": "server", "namespace": "test" }"#).unwrap();

        assert_eq!(config.run_mode, RunMode::Server);
        assert_eq!(config.namespace, "test");
        assert_eq!(config.wsl, WslConfig::default());
    }

    #[test]
    fn test_client_address_defaults_to_server_address() {
        let config = ManagerConfig::with_home("/home/fun/.fun", HostOs::Linux);
        assert_eq!(config.client_address, config.server.address);
    }
}
