//! `funserver-utils` is a library containing general utilities for the funserver project.
//!
//! It holds the pieces shared by the core lifecycle manager and the command line tool:
//! home and cache directory resolution, default paths, path translation between host and
//! guest, and process helpers for signalling and PID-file tracked processes.

#![warn(missing_docs)]

pub mod defaults;
pub mod env;
pub mod error;
pub mod path;
pub mod process;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use env::*;
pub use error::*;
pub use path::*;
pub use process::*;
