//! Default values shared across the funserver crates.

use std::{path::PathBuf, sync::LazyLock};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Name of the per-user base directory, relative to the user's home directory.
pub const FUNSERVER_HOME_DIRNAME: &str = ".fun";

/// Subdirectory of the home directory holding the engine data.
pub const CONTAINERD_SUBDIR: &str = "containerd";

/// Subdirectory of the engine directory holding persistent engine data.
pub const ROOT_SUBDIR: &str = "root";

/// Subdirectory of the engine directory holding runtime state.
pub const STATE_SUBDIR: &str = "state";

/// Filename of the engine control socket.
pub const ENGINE_SOCKET_FILENAME: &str = "containerd.sock";

/// Filename of the engine log file.
pub const ENGINE_LOG_FILENAME: &str = "containerd.log";

/// Subdirectory of the home directory holding the LinuxKit kernel, initrd and VM state.
pub const LINUXKIT_SUBDIR: &str = "linuxkit";

/// Subdirectory of the home directory holding imported WSL distributions.
pub const WSL_SUBDIR: &str = "wsl";

/// Subdirectory of the home directory shared with the WSL distribution.
pub const WSL_MOUNTS_SUBDIR: &str = "wsl-mounts";

/// Application directory name inside the platform configuration directory.
pub const CACHE_APP_DIRNAME: &str = "funserver";

/// Subdirectory of the application directory holding extracted binaries.
pub const CACHE_BIN_SUBDIR: &str = "bin";

/// Directory next to the executable that holds the bundled binaries.
pub const BUNDLE_SUBDIR: &str = "binaries";

/// Default runtime namespace used by the client.
pub const DEFAULT_NAMESPACE: &str = "fun";

/// Default engine log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default named pipe the engine listens on when it runs natively on Windows.
pub const DEFAULT_PIPE_ADDRESS: &str = r"\\.\pipe\fun-containerd";

/// Prefix shared by all Windows named pipe addresses.
pub const NAMED_PIPE_PREFIX: &str = r"\\.\pipe\";

/// Engine socket path inside a Linux guest.
pub const GUEST_ENGINE_SOCKET: &str = "/run/containerd/containerd.sock";

/// The default funserver home directory.
pub static DEFAULT_FUNSERVER_HOME: LazyLock<PathBuf> = LazyLock::new(|| {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(FUNSERVER_HOME_DIRNAME)
});

/// The default directory extracted binaries are cached in.
pub static DEFAULT_CACHE_DIR: LazyLock<PathBuf> = LazyLock::new(|| {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(CACHE_APP_DIRNAME)
        .join(CACHE_BIN_SUBDIR)
});
