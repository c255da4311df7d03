//! Utility functions and types.

pub mod command;

// Progress bars and spinners are only compiled for the command line tool.
#[cfg(feature = "cli-viz")]
pub mod viz;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use command::*;
