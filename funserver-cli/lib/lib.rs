//! `funserver-cli` is the command line agent of the funserver project.
//!
//! The `funserver` binary loads an [`AgentConfig`], sets up logging and drives a
//! [`funserver_core::manager::Manager`]: it can run the engine in the foreground, report its
//! status, diagnose the host and prepare the binary cache and LinuxKit image.

#![warn(missing_docs)]

mod args;
mod config;
mod error;
mod logging;
pub mod styles;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use args::*;
pub use config::*;
pub use error::*;
pub use logging::*;
pub use styles::AnsiStyles;
