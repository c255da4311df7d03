//! Binary provisioning.
//!
//! The application ships the runtime binaries it needs in a bundle next to its executable
//! (`<exe_dir>/binaries/<os>/...`). Before a backend starts, the binaries are copied into a
//! per-user cache directory so they can be executed from a stable, writable location.
//!
//! Provisioning is idempotent: a cached binary that exists with its executable bit set is
//! never written again. When a binary is neither bundled nor cached, the backends fall
//! back to whatever is installed on the `PATH`.

mod cache;
mod component;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use cache::*;
pub use component::*;
