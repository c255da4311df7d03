//! Configuration types and helpers.
//!
//! Every type here can be deserialized from the agent's JSON configuration document with
//! missing fields filled from defaults. Defaults are derived from the per-user funserver
//! home directory (see [`funserver_utils::get_funserver_home_path`]).

mod linuxkit;
mod manager;
mod server;
mod wsl;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use linuxkit::*;
pub use manager::*;
pub use server::*;
pub use wsl::*;
