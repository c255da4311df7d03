use std::{
    error::Error,
    fmt::{self, Display},
    path::PathBuf,
    time::Duration,
};
use thiserror::Error;

use crate::{address::ControlAddress, provision::Component};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a funserver-related operation.
pub type FunserverResult<T> = Result<T, FunserverError>;

/// An error that occurred while selecting, provisioning or supervising a backend.
#[derive(pretty_error_debug::Debug, Error)]
pub enum FunserverError {
    /// A required platform capability is absent.
    #[error("{capability} is not available: {reason}\n\n{remediation}")]
    Prerequisite {
        /// The missing capability, e.g. "WSL2".
        capability: String,

        /// What the probe reported.
        reason: String,

        /// Steps the user can take to fix it.
        remediation: String,
    },

    /// A bundled binary could not be found in the bundle or on the PATH.
    #[error("{component} is not available: no bundled binary at {bundled} and not found on PATH")]
    ComponentNotFound {
        /// The missing component.
        component: Component,

        /// Where the bundled binary was expected.
        bundled: PathBuf,
    },

    /// Extracting a bundled binary or downloading an image failed.
    #[error("failed to provision {what}: {reason}")]
    Provisioning {
        /// What was being provisioned.
        what: String,

        /// Why it failed.
        reason: String,
    },

    /// The control address never became reachable.
    #[error("timed out after {timeout:?} waiting for the engine at {address}")]
    ReadinessTimeout {
        /// The address that was polled.
        address: ControlAddress,

        /// How long we waited.
        timeout: Duration,
    },

    /// Spawning, signalling or waiting on a process failed.
    #[error("{process}: {reason}")]
    Process {
        /// The process involved.
        process: String,

        /// What went wrong.
        reason: String,
    },

    /// A process ignored the graceful stop signals and had to be killed.
    #[error("{process} did not exit within {grace:?} and was killed")]
    ShutdownEscalation {
        /// The process that was killed.
        process: String,

        /// The grace period that elapsed.
        grace: Duration,
    },

    /// The caller cancelled the operation.
    #[error("{0} was cancelled")]
    Cancelled(String),

    /// The runtime client could not reach the engine.
    #[error("no engine reachable at {address}: {reason}")]
    Client {
        /// The address the client tried.
        address: ControlAddress,

        /// Why it failed.
        reason: String,
    },

    /// The requested operation does not apply in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A configuration value is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An I/O error.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// An error from the utilities crate.
    #[error("utils error: {0}")]
    UtilsError(#[from] funserver_utils::FunserverUtilsError),

    /// An HTTP error while downloading.
    #[error("http request error: {0}")]
    HttpRequestError(#[from] reqwest::Error),

    /// Failure to join a spawned task.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// Custom error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FunserverError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> FunserverError {
        FunserverError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Creates a process error.
    pub fn process(process: impl Into<String>, reason: impl ToString) -> FunserverError {
        FunserverError::Process {
            process: process.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a provisioning error.
    pub fn provisioning(what: impl Into<String>, reason: impl ToString) -> FunserverError {
        FunserverError::Provisioning {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns `true` if the error means a platform capability is missing.
    pub fn is_prerequisite(&self) -> bool {
        matches!(self, FunserverError::Prerequisite { .. })
    }

    /// Returns `true` if the error happened while provisioning binaries or images.
    pub fn is_provisioning(&self) -> bool {
        matches!(
            self,
            FunserverError::Provisioning { .. } | FunserverError::ComponentNotFound { .. }
        )
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
