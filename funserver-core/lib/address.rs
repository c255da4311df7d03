//! Control addresses through which the engine is reached.

use std::{fmt, path::PathBuf, str::FromStr};

use funserver_utils::{is_named_pipe, GUEST_ENGINE_SOCKET};
use serde::{Deserialize, Serialize};

use crate::{
    backend::BackendKind,
    config::{LinuxKitVmConfig, ServerConfig, WslConfig},
    FunserverError,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// URI scheme of addresses that only exist inside a WSL distribution.
pub const WSL_ADDRESS_SCHEME: &str = "wsl://";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Where the engine listens.
///
/// Serialized as its string form: a filesystem path, a `\\.\pipe\...` name or a
/// `wsl://<distribution>/<path>` URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ControlAddress {
    /// A Unix domain socket on the host filesystem.
    UnixSocket(PathBuf),

    /// A Windows named pipe.
    NamedPipe(String),

    /// A socket inside a WSL distribution, not reachable from the host filesystem.
    WslVirtual {
        /// The distribution the socket lives in.
        distribution: String,

        /// Absolute socket path inside the distribution.
        socket: String,
    },
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ControlAddress {
    /// Returns `true` if readiness can be detected by checking the address exists.
    ///
    /// Named pipes and virtual WSL addresses can't be probed this way.
    pub fn is_probeable(&self) -> bool {
        matches!(self, ControlAddress::UnixSocket(_))
    }

    /// The socket path, for Unix socket addresses.
    pub fn socket_path(&self) -> Option<&std::path::Path> {
        match self {
            ControlAddress::UnixSocket(path) => Some(path),
            _ => None,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the address a backend of `kind` exposes the engine on.
///
/// `agent_pid` only matters for the bridged WSL pipe, whose name is unique per agent.
pub fn control_address_for(
    kind: BackendKind,
    server: &ServerConfig,
    wsl: &WslConfig,
    linuxkit: &LinuxKitVmConfig,
    agent_pid: u32,
) -> ControlAddress {
    match kind {
        BackendKind::Native => server.address.clone(),
        BackendKind::Wsl if wsl.bridge => ControlAddress::NamedPipe(wsl.bridge_pipe(agent_pid)),
        BackendKind::Wsl => ControlAddress::WslVirtual {
            distribution: wsl.distribution.clone(),
            socket: GUEST_ENGINE_SOCKET.to_string(),
        },
        BackendKind::HyperkitVm => ControlAddress::UnixSocket(linuxkit.engine_socket()),
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for ControlAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlAddress::UnixSocket(path) => write!(f, "{}", path.display()),
            ControlAddress::NamedPipe(name) => write!(f, "{}", name),
            ControlAddress::WslVirtual {
                distribution,
                socket,
            } => write!(f, "{}{}{}", WSL_ADDRESS_SCHEME, distribution, socket),
        }
    }
}

impl FromStr for ControlAddress {
    type Err = FunserverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(FunserverError::Config("empty control address".to_string()));
        }

        if let Some(rest) = s.strip_prefix(WSL_ADDRESS_SCHEME) {
            return match rest.split_once('/') {
                Some((distribution, socket)) if !distribution.is_empty() => {
                    Ok(ControlAddress::WslVirtual {
                        distribution: distribution.to_string(),
                        socket: format!("/{}", socket),
                    })
                }
                _ => Err(FunserverError::Config(format!(
                    "invalid wsl address '{s}', expected wsl://<distribution>/<path>"
                ))),
            };
        }

        if is_named_pipe(s) {
            return Ok(ControlAddress::NamedPipe(s.to_string()));
        }

        Ok(ControlAddress::UnixSocket(PathBuf::from(s)))
    }
}

impl From<ControlAddress> for String {
    fn from(address: ControlAddress) -> Self {
        address.to_string()
    }
}

impl TryFrom<String> for ControlAddress {
    type Error = FunserverError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
