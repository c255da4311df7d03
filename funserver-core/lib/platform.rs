//! Host platform detection and capability probes.
//!
//! Backend selection depends on facts about the host that can only be discovered by running
//! things (is WSL2 installed, is a hypervisor helper available). Those facts come from a
//! [`CapabilityProbe`], which tests replace with canned answers.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    provision::{BinaryCache, Component},
    utils::{args, CommandRunner},
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The operating system family of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostOs {
    /// Linux.
    Linux,

    /// macOS.
    MacOs,

    /// Windows.
    Windows,

    /// Any other Unix-like system.
    Other,
}

/// What the WSL probe found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WslStatus {
    /// `wsl.exe` exists and answered.
    pub installed: bool,

    /// The default WSL generation is 2.
    pub wsl2: bool,

    /// The raw probe output, for diagnostics.
    pub detail: String,
}

/// Answers the capability questions backend selection depends on.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// Probes WSL.
    async fn wsl(&self) -> WslStatus;

    /// Returns `true` if the HyperKit binary is installed, cached or bundled.
    async fn hyperkit_available(&self) -> bool;

    /// Returns `true` if the engine and runtime binaries can be found or extracted.
    async fn native_available(&self) -> bool;
}

/// Probe results relevant to one host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// WSL status. Only probed on Windows.
    pub wsl: WslStatus,

    /// HyperKit availability. Only probed on macOS.
    pub hyperkit: bool,

    /// Whether the native backend has the binaries it needs.
    pub native: bool,
}

/// Probes the real host.
pub struct SystemProbe {
    cache: Arc<BinaryCache>,
    runner: Arc<dyn CommandRunner>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HostOs {
    /// The OS this binary was compiled for.
    pub fn current() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(target_os = "linux")] {
                HostOs::Linux
            } else if #[cfg(target_os = "macos")] {
                HostOs::MacOs
            } else if #[cfg(windows)] {
                HostOs::Windows
            } else {
                HostOs::Other
            }
        }
    }

    /// Name of the OS subdirectory in the binary bundle.
    pub fn bundle_dir_name(&self) -> &'static str {
        match self {
            HostOs::Linux | HostOs::Other => "linux",
            HostOs::MacOs => "darwin",
            HostOs::Windows => "windows",
        }
    }
}

impl WslStatus {
    /// Returns `true` if the WSL2 backend can be used.
    pub fn is_available(&self) -> bool {
        self.installed && self.wsl2
    }

    /// Interprets the output of `wsl --status`.
    pub fn from_status_output(success: bool, output: &str) -> Self {
        let lower = output.to_lowercase();
        let wsl2 = lower.contains("wsl 2")
            || lower.contains("wsl2")
            || lower.contains("default version: 2");

        Self {
            installed: success,
            wsl2: success && wsl2,
            detail: output.trim().to_string(),
        }
    }
}

impl Capabilities {
    /// Runs only the probes that matter on `os`.
    pub async fn probe(probe: &dyn CapabilityProbe, os: HostOs, wsl_enabled: bool) -> Self {
        let wsl = match os {
            HostOs::Windows if wsl_enabled => probe.wsl().await,
            _ => WslStatus::default(),
        };

        let hyperkit = match os {
            HostOs::MacOs => probe.hyperkit_available().await,
            _ => false,
        };

        Self {
            wsl,
            hyperkit,
            native: probe.native_available().await,
        }
    }
}

impl SystemProbe {
    /// Creates a probe that checks `cache` for binaries and runs commands through `runner`.
    pub fn new(cache: Arc<BinaryCache>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { cache, runner }
    }

    fn component_available(&self, component: Component) -> bool {
        self.cache.resolve(component).is_some() || self.cache.is_bundled(component)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl CapabilityProbe for SystemProbe {
    async fn wsl(&self) -> WslStatus {
        match self.runner.output("wsl.exe", &args(["--status"])).await {
            Ok(output) => {
                let text = format!("{}\n{}", output.stdout, output.stderr);
                WslStatus::from_status_output(output.success, &text)
            }
            Err(e) => {
                tracing::debug!("wsl probe failed: {}", e);
                WslStatus {
                    detail: e.to_string(),
                    ..Default::default()
                }
            }
        }
    }

    async fn hyperkit_available(&self) -> bool {
        self.component_available(Component::Hypervisor)
    }

    async fn native_available(&self) -> bool {
        self.component_available(Component::Engine) && self.component_available(Component::Runtime)
    }
}

impl fmt::Display for HostOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostOs::Linux => write!(f, "linux"),
            HostOs::MacOs => write!(f, "macos"),
            HostOs::Windows => write!(f, "windows"),
            HostOs::Other => write!(f, "other"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
