use std::path::PathBuf;

use funserver_utils::{get_funserver_home_path, LINUXKIT_SUBDIR};
use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Context ID of the guest on the vsock bus.
pub const DEFAULT_GUEST_CID: u32 = 3;

/// Guest vsock port the engine socket is forwarded from.
pub const DEFAULT_ENGINE_VSOCK_PORT: u32 = 1024;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Configuration of the HyperKit/LinuxKit VM backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinuxKitVmConfig {
    /// Guest memory in MB.
    pub memory_mb: u32,

    /// Number of virtual CPUs.
    pub cpus: u32,

    /// Size of the data disk image in GB.
    pub disk_gb: u32,

    /// Name of the VM, used in logs.
    pub name: String,

    /// LinuxKit kernel image.
    pub kernel_path: PathBuf,

    /// LinuxKit initial ramdisk.
    pub initrd_path: PathBuf,

    /// Directory holding the PID file, disk image, console log and vsock sockets.
    pub state_dir: PathBuf,

    /// Guest context ID on the vsock bus.
    pub guest_cid: u32,

    /// Guest vsock port the engine socket is forwarded from.
    pub vsock_port: u32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LinuxKitVmConfig {
    /// Default configuration rooted at `home`.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let linuxkit_dir = home.into().join(LINUXKIT_SUBDIR);
        Self {
            memory_mb: 1024,
            cpus: 2,
            disk_gb: 10,
            name: "fun-containerd-vm".to_string(),
            kernel_path: linuxkit_dir.join("kernel"),
            initrd_path: linuxkit_dir.join("initrd.img"),
            state_dir: linuxkit_dir.join("state"),
            guest_cid: DEFAULT_GUEST_CID,
            vsock_port: DEFAULT_ENGINE_VSOCK_PORT,
        }
    }

    /// The hypervisor's PID file.
    pub fn pid_file(&self) -> PathBuf {
        self.state_dir.join("hyperkit.pid")
    }

    /// The raw data disk image.
    pub fn disk_image(&self) -> PathBuf {
        self.state_dir.join("disk.img")
    }

    /// The file the serial console is written to.
    pub fn console_log(&self) -> PathBuf {
        self.state_dir.join("console.log")
    }

    /// Host socket HyperKit creates for the forwarded guest port.
    ///
    /// HyperKit names it `<cid>.<port>`, both as 8 hex digits.
    pub fn engine_socket(&self) -> PathBuf {
        self.state_dir
            .join(format!("{:08x}.{:08x}", self.guest_cid, self.vsock_port))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for LinuxKitVmConfig {
    fn default() -> Self {
        Self::with_home(get_funserver_home_path())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_files_live_in_state_dir() {
        let config = LinuxKitVmConfig::with_home("/home/fun/.fun");

        assert_eq!(
            config.pid_file(),
            PathBuf::from("/home/fun/.fun/linuxkit/state/hyperkit.pid")
        );
        assert_eq!(
            config.disk_image(),
            PathBuf::from("/home/fun/.fun/linuxkit/state/disk.img")
        );
        assert_eq!(
            config.engine_socket(),
            PathBuf::from("/home/fun/.fun/linuxkit/state/00000003.00000400")
        );
    }
}
