//! Error types for the funserver utilities.

use std::{
    error::Error,
    fmt::{self, Display},
    path::PathBuf,
};
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a funserver-utils related operation.
pub type FunserverUtilsResult<T> = Result<T, FunserverUtilsError>;

/// An error that occurred during a funserver-utils operation.
#[derive(pretty_error_debug::Debug, Error)]
pub enum FunserverUtilsError {
    /// An I/O error.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// The PID file did not contain a valid process id.
    #[error("invalid PID {content:?} in PID file {path}")]
    InvalidPidFile {
        /// The PID file that was read.
        path: PathBuf,

        /// The content that failed to parse.
        content: String,
    },

    /// A signal could not be delivered to a process.
    #[error("failed to send {signal} to process {pid}: {reason}")]
    SignalDelivery {
        /// The target process.
        pid: u32,

        /// The signal that was sent.
        signal: String,

        /// Why delivery failed.
        reason: String,
    },

    /// The path could not be translated for the guest.
    #[error("cannot translate path {0} into a guest path")]
    PathTranslation(PathBuf),

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

impl FunserverUtilsError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> FunserverUtilsError {
        FunserverUtilsError::Custom(AnyError {
            error: error.into(),
        })
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
