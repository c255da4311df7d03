//! Utility functions for working with environment variables.

use std::path::PathBuf;

use crate::{BUNDLE_SUBDIR, DEFAULT_CACHE_DIR, DEFAULT_FUNSERVER_HOME};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Environment variable for the funserver home directory
pub const FUNSERVER_HOME_ENV_VAR: &str = "FUNSERVER_HOME";

/// Environment variable for the extracted binary cache directory
pub const FUNSERVER_CACHE_DIR_ENV_VAR: &str = "FUNSERVER_CACHE_DIR";

/// Environment variable for the directory holding the bundled binaries
pub const FUNSERVER_BUNDLE_DIR_ENV_VAR: &str = "FUNSERVER_BUNDLE_DIR";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the path to the funserver home directory.
/// If the FUNSERVER_HOME environment variable is set, returns that path.
/// Otherwise, returns the default funserver home path.
pub fn get_funserver_home_path() -> PathBuf {
    if let Ok(funserver_home) = std::env::var(FUNSERVER_HOME_ENV_VAR) {
        PathBuf::from(funserver_home)
    } else {
        DEFAULT_FUNSERVER_HOME.to_owned()
    }
}

/// Returns the directory extracted binaries are cached in.
pub fn get_cache_dir_path() -> PathBuf {
    if let Ok(cache_dir) = std::env::var(FUNSERVER_CACHE_DIR_ENV_VAR) {
        PathBuf::from(cache_dir)
    } else {
        DEFAULT_CACHE_DIR.to_owned()
    }
}

/// Returns the directory holding the binaries bundled with the application.
///
/// Defaults to `binaries/` next to the running executable.
pub fn get_bundle_dir_path() -> PathBuf {
    if let Ok(bundle_dir) = std::env::var(FUNSERVER_BUNDLE_DIR_ENV_VAR) {
        return PathBuf::from(bundle_dir);
    }

    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(BUNDLE_SUBDIR)))
        .unwrap_or_else(|| PathBuf::from(BUNDLE_SUBDIR))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_home_path_respects_env_var() {
        std::env::set_var(FUNSERVER_HOME_ENV_VAR, "/tmp/fun-home");
        assert_eq!(get_funserver_home_path(), PathBuf::from("/tmp/fun-home"));

        std::env::remove_var(FUNSERVER_HOME_ENV_VAR);
        assert_eq!(get_funserver_home_path(), *DEFAULT_FUNSERVER_HOME);
    }

    #[test]
    #[serial]
    fn test_bundle_dir_defaults_next_to_executable() {
        std::env::remove_var(FUNSERVER_BUNDLE_DIR_ENV_VAR);
        let bundle_dir = get_bundle_dir_path();
        assert!(bundle_dir.ends_with(BUNDLE_SUBDIR));

        std::env::set_var(FUNSERVER_BUNDLE_DIR_ENV_VAR, "/opt/fun/binaries");
        assert_eq!(get_bundle_dir_path(), PathBuf::from("/opt/fun/binaries"));
        std::env::remove_var(FUNSERVER_BUNDLE_DIR_ENV_VAR);
    }
}
