//! Engine backends.
//!
//! A backend is one strategy for getting a container engine running on this host:
//!
//! - [`NativeBackend`]: the engine runs as a child process of the agent.
//! - [`WslBackend`]: the engine runs inside a dedicated WSL2 distribution.
//! - [`HyperkitBackend`]: the engine runs inside a LinuxKit VM booted by HyperKit.
//!
//! All three implement [`Backend`] and are driven by the [`Manager`](crate::manager::Manager).

mod hyperkit;
mod native;
mod wsl;

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use funserver_utils::ProcessSignal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    address::ControlAddress,
    config::ManagerConfig,
    platform::{CapabilityProbe, HostOs},
    provision::BinaryCache,
    utils::CommandRunner,
    FunserverError, FunserverResult,
};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use hyperkit::*;
pub use native::*;
pub use wsl::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The closed set of backend strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// A local engine subprocess.
    Native,

    /// An engine inside a WSL2 distribution.
    Wsl,

    /// An engine inside a HyperKit-booted LinuxKit VM.
    HyperkitVm,
}

/// Whether a backend's engine is up, as far as the backend can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    /// The engine is not running.
    Stopped,

    /// The engine is running.
    Running,
}

/// How a stop went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The engine exited after the first, graceful signal.
    Graceful,

    /// Nothing was running.
    AlreadyStopped,

    /// The engine ignored the graceful signal and had to be stopped with `signal`.
    Escalated {
        /// The signal that finally stopped the engine.
        signal: ProcessSignal,

        /// How long the engine was given before escalating.
        grace: Duration,
    },
}

/// The lifecycle contract shared by all backends.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> BackendKind;

    /// Provisions and starts the engine, returning once it is reachable.
    async fn start(&mut self, cancel: &CancellationToken) -> FunserverResult<ControlAddress>;

    /// Stops the engine. Stopping a backend that is not running succeeds.
    async fn stop(&mut self, cancel: &CancellationToken) -> FunserverResult<StopOutcome>;

    /// Whether the engine is running.
    async fn status(&mut self) -> BackendStatus;

    /// The address the engine is reachable at once started.
    fn control_address(&self) -> ControlAddress;

    /// The file the engine's output goes to, if the backend keeps one on the host.
    fn log_file(&self) -> Option<PathBuf> {
        None
    }
}

/// Everything a backend may need from its environment.
#[derive(Clone)]
pub struct BackendContext {
    /// Manager configuration.
    pub config: ManagerConfig,

    /// The host OS.
    pub os: HostOs,

    /// Shared binary cache.
    pub cache: Arc<BinaryCache>,

    /// Capability probe.
    pub probe: Arc<dyn CapabilityProbe>,

    /// Runner for external commands.
    pub runner: Arc<dyn CommandRunner>,

    /// How long native stops wait before killing.
    pub stop_timeout: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl StopOutcome {
    /// The non-fatal escalation this outcome represents, if any.
    pub fn escalation(&self, process: &str) -> Option<FunserverError> {
        match self {
            StopOutcome::Escalated { grace, .. } => Some(FunserverError::ShutdownEscalation {
                process: process.to_string(),
                grace: *grace,
            }),
            _ => None,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an unstarted backend of `kind`.
pub fn create_backend(kind: BackendKind, ctx: &BackendContext) -> Box<dyn Backend> {
    match kind {
        BackendKind::Native => Box::new(NativeBackend::new(
            ctx.config.server.clone(),
            ctx.cache.clone(),
            ctx.os,
            ctx.stop_timeout,
        )),
        BackendKind::Wsl => Box::new(WslBackend::new(
            ctx.config.wsl.clone(),
            ctx.probe.clone(),
            ctx.runner.clone(),
            ctx.config.server.readiness_timeout(),
        )),
        BackendKind::HyperkitVm => Box::new(HyperkitBackend::new(
            ctx.config.linuxkit.clone(),
            ctx.cache.clone(),
            ctx.config.server.readiness_timeout(),
        )),
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Native => write!(f, "native"),
            BackendKind::Wsl => write!(f, "wsl"),
            BackendKind::HyperkitVm => write!(f, "hyperkit-vm"),
        }
    }
}
