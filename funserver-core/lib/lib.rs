//! `funserver-core` makes a container engine available on Linux, macOS and Windows.
//!
//! # Overview
//!
//! The host agent needs a container runtime everywhere it runs, but each platform gets one
//! differently. This crate hides that behind a single lifecycle manager that:
//! - decides which backend strategy fits the host
//! - provisions the binaries and images that backend needs
//! - starts it and waits until the engine is reachable
//! - exposes one control address for the runtime client
//! - tears everything down again, escalating signals when it has to
//!
//! # Backends
//!
//! - **Native**: the engine runs as a child process (Linux, and Windows without WSL2)
//! - **WSL**: the engine runs inside a dedicated WSL2 distribution (Windows)
//! - **HyperKit VM**: the engine runs inside a LinuxKit VM booted by HyperKit (macOS)
//!
//! # Modules
//!
//! - [`manager`] - The lifecycle manager
//! - [`selector`] - Backend selection from run mode, host OS and probe results
//! - [`backend`] - The three backend strategies
//! - [`provision`] - The cache of extracted runtime binaries
//! - [`readiness`] - Bounded waits for the engine to become reachable
//! - [`platform`] - Host OS detection and capability probes
//! - [`address`] - Control address formats
//! - [`client`] - A thin handle on a running engine
//! - [`linuxkit`] - LinuxKit image definitions for the VM backend
//! - [`config`] - Configuration types
//! - [`utils`] - Command running and terminal visualizations

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod address;
pub mod backend;
pub mod client;
pub mod config;
pub mod linuxkit;
pub mod manager;
pub mod platform;
pub mod provision;
pub mod readiness;
pub mod selector;
pub mod utils;

pub use error::*;
