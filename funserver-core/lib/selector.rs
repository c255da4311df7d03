//! Backend selection.
//!
//! Selection is a pure function of the run mode, the host OS and the capability probe
//! results, evaluated in that order. It never starts anything.

use crate::{
    backend::BackendKind,
    config::RunMode,
    platform::{Capabilities, HostOs},
    FunserverError, FunserverResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Steps shown when HyperKit can't be found on macOS.
pub const HYPERKIT_REMEDIATION: &str = "Install HyperKit with `brew install hyperkit`, or \
reinstall the application so its bundled hyperkit binary is present.";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The outcome of backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// The backend to start.
    pub primary: BackendKind,

    /// The backend to start instead if the primary fails.
    pub fallback: Option<BackendKind>,

    /// Warnings to surface to the user, such as a skipped preferred backend.
    pub notices: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Picks the backend to start.
///
/// Returns `Ok(None)` when the run mode does not start a server. On Windows, WSL2 is preferred
/// when enabled and available, with the native backend as fallback if its binaries are present.
/// On macOS the HyperKit VM is the only option. Everywhere else the engine runs natively.
pub fn select_backend(
    run_mode: RunMode,
    os: HostOs,
    wsl_enabled: bool,
    capabilities: &Capabilities,
) -> FunserverResult<Option<Selection>> {
    if !run_mode.runs_server() {
        return Ok(None);
    }

    let selection = match os {
        HostOs::Windows if wsl_enabled && capabilities.wsl.is_available() => Selection {
            primary: BackendKind::Wsl,
            fallback: capabilities.native.then_some(BackendKind::Native),
            notices: vec![],
        },
        HostOs::Windows if wsl_enabled => Selection {
            primary: BackendKind::Native,
            fallback: None,
            notices: vec![format!(
                "WSL2 is not available ({}), falling back to the native engine",
                describe_wsl(capabilities)
            )],
        },
        HostOs::MacOs if capabilities.hyperkit => Selection {
            primary: BackendKind::HyperkitVm,
            fallback: None,
            notices: vec![],
        },
        HostOs::MacOs => {
            return Err(FunserverError::Prerequisite {
                capability: "HyperKit".to_string(),
                reason: "hyperkit was not found in the bundle, the cache or on PATH".to_string(),
                remediation: HYPERKIT_REMEDIATION.to_string(),
            });
        }
        _ => Selection {
            primary: BackendKind::Native,
            fallback: None,
            notices: vec![],
        },
    };

    Ok(Some(selection))
}

fn describe_wsl(capabilities: &Capabilities) -> &'static str {
    if !capabilities.wsl.installed {
        "wsl is not installed"
    } else {
        "wsl is installed but not version 2"
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::WslStatus;

    fn caps(wsl_installed: bool, wsl2: bool, hyperkit: bool, native: bool) -> Capabilities {
        Capabilities {
            wsl: WslStatus {
                installed: wsl_installed,
                wsl2,
                detail: String::new(),
            },
            hyperkit,
            native,
        }
    }

    #[test]
    fn test_client_mode_selects_nothing() {
        let selection =
            select_backend(RunMode::Client, HostOs::Windows, true, &caps(true, true, true, true))
                .unwrap();
        assert_eq!(selection, None);
    }

    #[test]
    fn test_linux_always_runs_natively() {
        for mode in [RunMode::Server, RunMode::Both] {
            let selection = select_backend(mode, HostOs::Linux, true, &caps(true, true, true, false))
                .unwrap()
                .unwrap();
            assert_eq!(selection.primary, BackendKind::Native);
            assert_eq!(selection.fallback, None);
            assert!(selection.notices.is_empty());
        }
    }

    #[test]
    fn test_windows_prefers_wsl_with_native_fallback() {
        let selection =
            select_backend(RunMode::Server, HostOs::Windows, true, &caps(true, true, false, true))
                .unwrap()
                .unwrap();
        assert_eq!(selection.primary, BackendKind::Wsl);
        assert_eq!(selection.fallback, Some(BackendKind::Native));

        let selection =
            select_backend(RunMode::Server, HostOs::Windows, true, &caps(true, true, false, false))
                .unwrap()
                .unwrap();
        assert_eq!(selection.fallback, None);
    }

    #[test]
    fn test_windows_without_wsl2_falls_back_with_notice() {
        let selection =
            select_backend(RunMode::Both, HostOs::Windows, true, &caps(true, false, false, true))
                .unwrap()
                .unwrap();
        assert_eq!(selection.primary, BackendKind::Native);
        assert_eq!(selection.notices.len(), 1);
        assert!(selection.notices[0].contains("not version 2"));
    }

    #[test]
    fn test_windows_with_wsl_disabled_runs_natively_silently() {
        let selection =
            select_backend(RunMode::Server, HostOs::Windows, false, &caps(true, true, false, true))
                .unwrap()
                .unwrap();
        assert_eq!(selection.primary, BackendKind::Native);
        assert!(selection.notices.is_empty());
    }

    #[test]
    fn test_macos_requires_hyperkit() {
        let selection =
            select_backend(RunMode::Server, HostOs::MacOs, true, &caps(false, false, true, true))
                .unwrap()
                .unwrap();
        assert_eq!(selection.primary, BackendKind::HyperkitVm);

        let err =
            select_backend(RunMode::Server, HostOs::MacOs, true, &caps(false, false, false, true))
                .unwrap_err();
        assert!(err.is_prerequisite());
        assert!(err.to_string().contains("brew install hyperkit"));
    }
}
