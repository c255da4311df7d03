use std::fmt;

use serde::{Deserialize, Serialize};

use crate::platform::HostOs;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A binary or image the backends depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    /// The engine daemon, `containerd`.
    Engine,

    /// The low-level container runtime, `runc`.
    Runtime,

    /// The directory of CNI network plugins.
    NetworkPlugins,

    /// The macOS hypervisor helper, `hyperkit`.
    Hypervisor,

    /// The LinuxKit kernel image.
    Kernel,

    /// The LinuxKit initial ramdisk.
    Initrd,
}

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Directories CNI plugins are commonly installed in, checked after the cache.
pub const STANDARD_CNI_DIRS: &[&str] = &["/opt/cni/bin", "/usr/local/opt/cni/bin", r"C:\Program Files\cni"];

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Component {
    /// Every component, in the order the doctor command reports them.
    pub const ALL: [Component; 6] = [
        Component::Engine,
        Component::Runtime,
        Component::NetworkPlugins,
        Component::Hypervisor,
        Component::Kernel,
        Component::Initrd,
    ];

    /// Short name of the component.
    pub fn name(&self) -> &'static str {
        match self {
            Component::Engine => "containerd",
            Component::Runtime => "runc",
            Component::NetworkPlugins => "cni",
            Component::Hypervisor => "hyperkit",
            Component::Kernel => "kernel",
            Component::Initrd => "initrd.img",
        }
    }

    /// File name of the component on `os`.
    pub fn file_name(&self, os: HostOs) -> String {
        match (self, os) {
            (Component::Engine | Component::Runtime, HostOs::Windows) => {
                format!("{}.exe", self.name())
            }
            _ => self.name().to_string(),
        }
    }

    /// Path of the bundled source relative to the bundle root.
    ///
    /// Engine, runtime and CNI plugins live in the per-OS directory. The VM pieces only
    /// exist for macOS and sit in a `linuxkit` subdirectory.
    pub fn bundled_relative_path(&self, os: HostOs) -> String {
        match self {
            Component::Engine | Component::Runtime | Component::NetworkPlugins => {
                format!("{}/{}", os.bundle_dir_name(), self.file_name(os))
            }
            Component::Hypervisor | Component::Kernel | Component::Initrd => {
                format!("{}/linuxkit/{}", HostOs::MacOs.bundle_dir_name(), self.name())
            }
        }
    }

    /// Returns `true` for components that are a directory rather than a single file.
    pub fn is_directory(&self) -> bool {
        matches!(self, Component::NetworkPlugins)
    }

    /// Returns `true` if the cached copy must carry the executable bit.
    pub fn is_executable(&self) -> bool {
        !matches!(self, Component::Initrd | Component::NetworkPlugins)
    }

    /// Returns `true` if the component can also be found through a `PATH` lookup.
    pub fn is_on_path(&self) -> bool {
        matches!(
            self,
            Component::Engine | Component::Runtime | Component::Hypervisor
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_paths_follow_os_layout() {
        assert_eq!(
            Component::Engine.bundled_relative_path(HostOs::Linux),
            "linux/containerd"
        );
        assert_eq!(
            Component::Runtime.bundled_relative_path(HostOs::Windows),
            "windows/runc.exe"
        );
        assert_eq!(
            Component::NetworkPlugins.bundled_relative_path(HostOs::MacOs),
            "darwin/cni"
        );
        assert_eq!(
            Component::Kernel.bundled_relative_path(HostOs::MacOs),
            "darwin/linuxkit/kernel"
        );
    }

    #[test]
    fn test_only_binaries_need_the_executable_bit() {
        assert!(Component::Engine.is_executable());
        assert!(Component::Kernel.is_executable());
        assert!(!Component::Initrd.is_executable());
        assert!(Component::NetworkPlugins.is_directory());
    }
}
