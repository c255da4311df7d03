//! Utility functions for working with host and guest paths.

use std::path::Path;

use crate::{FunserverUtilsError, FunserverUtilsResult, NAMED_PIPE_PREFIX};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns `true` if the address names a Windows named pipe.
pub fn is_named_pipe(address: &str) -> bool {
    address.starts_with(NAMED_PIPE_PREFIX)
}

/// Converts a Windows host path into the path it is reachable at inside a WSL distribution.
///
/// ## Examples
///
/// - `C:\Users\foo` -> `/mnt/c/Users/foo`
/// - `\\wsl$\wsl-fun\var\lib` -> `/var/lib`
/// - `/already/unix` -> `/already/unix`
pub fn windows_to_wsl_path(path: &Path) -> FunserverUtilsResult<String> {
    let path_str = path.to_string_lossy();

    // Paths that already live inside a distribution
    for prefix in [r"\\wsl$\", r"\\wsl.localhost\"] {
        if let Some(rest) = path_str.strip_prefix(prefix) {
            let mut parts = rest.splitn(2, '\\');
            let _distro = parts.next();
            return match parts.next() {
                Some(inner) => Ok(format!("/{}", inner.replace('\\', "/"))),
                None => Err(FunserverUtilsError::PathTranslation(path.to_path_buf())),
            };
        }
    }

    let normalized = path_str.replace('\\', "/");
    let mut chars = normalized.chars();
    match (chars.next(), chars.next()) {
        (Some(drive), Some(':')) => {
            if !drive.is_ascii_alphabetic() {
                return Err(FunserverUtilsError::PathTranslation(path.to_path_buf()));
            }

            let rest = &normalized[2..];
            Ok(format!("/mnt/{}{}", drive.to_ascii_lowercase(), rest))
        }
        _ if normalized.starts_with('/') => Ok(normalized),
        _ => Err(FunserverUtilsError::PathTranslation(path.to_path_buf())),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_named_pipe() {
        assert!(is_named_pipe(r"\\.\pipe\fun-containerd"));
        assert!(!is_named_pipe("/run/containerd/containerd.sock"));
        assert!(!is_named_pipe("wsl://wsl-fun/run/containerd/containerd.sock"));
    }

    #[test]
    fn test_windows_to_wsl_path() {
        assert_eq!(
            windows_to_wsl_path(Path::new(r"C:\Users\fun\.fun\wsl-mounts")).unwrap(),
            "/mnt/c/Users/fun/.fun/wsl-mounts"
        );
        assert_eq!(
            windows_to_wsl_path(Path::new(r"D:\data")).unwrap(),
            "/mnt/d/data"
        );
        assert_eq!(
            windows_to_wsl_path(Path::new(r"\\wsl$\wsl-fun\var\lib")).unwrap(),
            "/var/lib"
        );
        assert_eq!(
            windows_to_wsl_path(Path::new("/home/fun/shared")).unwrap(),
            "/home/fun/shared"
        );
    }

    #[test]
    fn test_windows_to_wsl_path_rejects_relative_paths() {
        assert!(windows_to_wsl_path(Path::new(r"relative\dir")).is_err());
        assert!(windows_to_wsl_path(Path::new(r"1:\weird")).is_err());
    }
}
