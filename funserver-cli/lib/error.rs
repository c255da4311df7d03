use std::{
    error::Error,
    fmt::{self, Display},
    path::PathBuf,
};
use thiserror::Error;

use funserver_core::FunserverError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a funserver CLI operation.
pub type FunserverCliResult<T> = Result<T, FunserverCliError>;

/// An error that occurred while running the funserver agent.
#[derive(pretty_error_debug::Debug, Error)]
pub enum FunserverCliError {
    /// An error from the lifecycle manager.
    #[error(transparent)]
    Core(#[from] FunserverError),

    /// The agent configuration file could not be parsed.
    #[error("invalid agent configuration at {path}: {source}")]
    InvalidConfig {
        /// The configuration file.
        path: PathBuf,

        /// The parse error.
        source: serde_json::Error,
    },

    /// A JSON serialization error.
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The tracing subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    Logging(String),

    /// An I/O error.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

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

impl FunserverCliError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> FunserverCliError {
        FunserverCliError::Custom(AnyError {
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
