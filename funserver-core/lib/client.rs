//! A thin handle on a running engine.
//!
//! The full container and image API lives in a separate runtime client. This handle only
//! establishes that an engine answers at an address and carries the namespace the runtime
//! client should work in.

use getset::Getters;

use crate::{address::ControlAddress, FunserverError, FunserverResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A connection handle for the engine at an address.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct EngineClient {
    /// Where the engine listens.
    address: ControlAddress,

    /// The runtime namespace.
    namespace: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl EngineClient {
    /// Creates a client for the engine at `address`.
    ///
    /// Fails if the address is known to be unreachable.
    pub fn connect(address: ControlAddress, namespace: impl Into<String>) -> FunserverResult<Self> {
        if !is_engine_reachable(&address) {
            return Err(FunserverError::Client {
                address,
                reason: "the control socket does not exist".to_string(),
            });
        }

        let namespace = namespace.into();
        tracing::info!("connected to engine at {} (namespace {})", address, namespace);
        Ok(Self { address, namespace })
    }

    /// Opens and immediately closes a connection to the engine.
    pub async fn ping(&self) -> FunserverResult<()> {
        let result: std::io::Result<()> = match &self.address {
            #[cfg(unix)]
            ControlAddress::UnixSocket(path) => {
                tokio::net::UnixStream::connect(path).await.map(|_| ())
            }
            #[cfg(windows)]
            ControlAddress::NamedPipe(name) => {
                tokio::net::windows::named_pipe::ClientOptions::new()
                    .open(name)
                    .map(|_| ())
            }
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "address can't be connected to from this host",
            )),
        };

        result.map_err(|e| FunserverError::Client {
            address: self.address.clone(),
            reason: e.to_string(),
        })
    }

    /// Releases the handle.
    pub fn close(self) {
        tracing::debug!("closed engine client for {}", self.address);
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns `true` unless `address` is a socket path that does not exist.
///
/// Pipes and WSL addresses can't be checked without connecting and are assumed reachable.
pub fn is_engine_reachable(address: &ControlAddress) -> bool {
    match address.socket_path() {
        Some(path) => path.exists(),
        None => true,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
