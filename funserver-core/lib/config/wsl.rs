use std::path::PathBuf;

use funserver_utils::{get_funserver_home_path, WSL_MOUNTS_SUBDIR, WSL_SUBDIR};
use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Name of the dedicated distribution.
pub const DEFAULT_WSL_DISTRIBUTION: &str = "wsl-fun";

/// Minimal Ubuntu root filesystem imported as the distribution.
pub const DEFAULT_WSL_ROOTFS_URL: &str = "https://cloud-images.ubuntu.com/minimal/releases/focal/release/ubuntu-20.04-minimal-cloudimg-amd64-root.tar.xz";

/// Pipe prefix of the host end of the socket bridge. The agent's PID is appended.
pub const DEFAULT_WSL_BRIDGE_PIPE_PREFIX: &str = r"\\.\pipe\fun-containerd-wsl";

/// Where the host shared directory is mounted inside the distribution.
pub const WSL_GUEST_MOUNT_POINT: &str = "/mnt/fun-host";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Configuration of the WSL2 backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WslConfig {
    /// Whether the WSL2 backend may be selected on Windows.
    pub enabled: bool,

    /// Name of the dedicated distribution.
    pub distribution: String,

    /// Host directory shared with the distribution.
    pub mount_dir: PathBuf,

    /// Memory limit in MB.
    pub memory_mb: u32,

    /// Number of processors.
    pub cpus: u32,

    /// Swap size in MB.
    pub swap_mb: u32,

    /// Maximum virtual disk size in GB.
    pub disk_gb: u32,

    /// Optional custom kernel image for the WSL2 VM.
    pub kernel: Option<PathBuf>,

    /// Root filesystem tarball imported when the distribution does not exist.
    pub rootfs_url: String,

    /// Directory the distribution's virtual disk is imported into.
    pub install_dir: PathBuf,

    /// Host resource file, usually `%USERPROFILE%\.wslconfig`.
    pub wslconfig_path: PathBuf,

    /// Expose the guest engine socket on a host named pipe.
    pub bridge: bool,

    /// Prefix of the bridge pipe name.
    pub bridge_pipe_prefix: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl WslConfig {
    /// Default configuration rooted at `home`.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            enabled: true,
            distribution: DEFAULT_WSL_DISTRIBUTION.to_string(),
            mount_dir: home.join(WSL_MOUNTS_SUBDIR),
            memory_mb: 4096,
            cpus: 2,
            swap_mb: 2048,
            disk_gb: 10,
            kernel: None,
            rootfs_url: DEFAULT_WSL_ROOTFS_URL.to_string(),
            install_dir: home.join(WSL_SUBDIR).join(DEFAULT_WSL_DISTRIBUTION),
            wslconfig_path: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".wslconfig"),
            bridge: false,
            bridge_pipe_prefix: DEFAULT_WSL_BRIDGE_PIPE_PREFIX.to_string(),
        }
    }

    /// Name of the host pipe the bridge listens on for an agent with `pid`.
    pub fn bridge_pipe(&self, pid: u32) -> String {
        format!("{}-{}", self.bridge_pipe_prefix, pid)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for WslConfig {
    fn default() -> Self {
        Self::with_home(get_funserver_home_path())
    }
}
