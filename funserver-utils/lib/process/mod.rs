//! Process helpers for signalling processes and tracking processes through PID files.

mod pidfile;
mod signal;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use pidfile::*;
pub use signal::*;
