use std::path::PathBuf;

use clap::{Parser, Subcommand};
use funserver_core::config::RunMode;

use crate::styles;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Keeps a container engine running on this host
#[derive(Debug, Parser)]
#[command(name = "funserver", author, styles=styles::styles())]
pub struct FunserverArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<FunserverSubcommand>,

    /// Path to the agent configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Show version
    #[arg(short = 'V', long)]
    pub version: bool,

    /// Show logs with error level
    #[arg(long, global = true)]
    pub error: bool,

    /// Show logs with warn level
    #[arg(long, global = true)]
    pub warn: bool,

    /// Show logs with info level
    #[arg(long, global = true)]
    pub info: bool,

    /// Show logs with debug level
    #[arg(long, global = true)]
    pub debug: bool,

    /// Show logs with trace level
    #[arg(long, global = true)]
    pub trace: bool,
}

/// Available subcommands for the agent
#[derive(Debug, Subcommand)]
pub enum FunserverSubcommand {
    /// Start the container engine and keep it running until interrupted
    #[command(name = "run")]
    Run {
        /// Which halves of the runtime to bring up
        #[arg(short, long, value_parser = parse_run_mode)]
        mode: Option<RunMode>,

        /// Disable the WSL2 backend on Windows
        #[arg(long)]
        no_wsl: bool,
    },

    /// Show whether an engine is reachable at the configured address
    #[command(name = "status")]
    Status,

    /// Probe the host and report which backend would be used
    #[command(name = "doctor")]
    Doctor,

    /// Copy the bundled binaries into the binary cache
    #[command(name = "extract")]
    Extract {
        /// Remove the cached binaries instead
        #[arg(long)]
        clean: bool,
    },

    /// Print the embedded engine's log file
    #[command(name = "logs")]
    Logs,

    /// Write the LinuxKit image definition for the VM backend
    #[command(name = "linuxkit-config")]
    LinuxkitConfig {
        /// Where to write the image definition
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Build the kernel and initrd with `linuxkit`
        #[arg(long)]
        build: bool,

        /// Install the built kernel and initrd where the VM boots them from
        #[arg(long, requires = "build")]
        install: bool,
    },
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FunserverArgs {
    /// The most verbose log level requested on the command line, if any.
    pub fn log_level(&self) -> Option<&'static str> {
        if self.trace {
            Some("trace")
        } else if self.debug {
            Some("debug")
        } else if self.info {
            Some("info")
        } else if self.warn {
            Some("warn")
        } else if self.error {
            Some("error")
        } else {
            None
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn parse_run_mode(value: &str) -> Result<RunMode, String> {
    value.parse::<RunMode>().map_err(|e| e.to_string())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_accepts_mode_and_global_flags() {
        let args =
            FunserverArgs::try_parse_from(["funserver", "run", "--mode", "both", "--debug"]).unwrap();

        assert_eq!(args.log_level(), Some("debug"));
        match args.subcommand {
            Some(FunserverSubcommand::Run { mode, no_wsl }) => {
                assert_eq!(mode, Some(RunMode::Both));
                assert!(!no_wsl);
            }
            other => panic!("unexpected subcommand: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_remain_readable_after_taking_subcommand() {
        let mut args =
            FunserverArgs::try_parse_from(["funserver", "--info", "logs"]).unwrap();

        let subcommand = args.subcommand.take();
        assert!(matches!(subcommand, Some(FunserverSubcommand::Logs)));
        assert_eq!(args.log_level(), Some("info"));
        assert!(args.config.is_none());
    }

    #[test]
    fn test_run_rejects_unknown_mode() {
        assert!(FunserverArgs::try_parse_from(["funserver", "run", "--mode", "sideways"]).is_err());
    }

    #[test]
    fn test_most_verbose_level_wins() {
        let args = FunserverArgs::try_parse_from(["funserver", "--warn", "--trace"]).unwrap();
        assert_eq!(args.log_level(), Some("trace"));

        let args = FunserverArgs::try_parse_from(["funserver", "status"]).unwrap();
        assert_eq!(args.log_level(), None);
    }

    #[test]
    fn test_install_requires_build() {
        assert!(FunserverArgs::try_parse_from(["funserver", "linuxkit-config", "--install"]).is_err());
        assert!(FunserverArgs::try_parse_from([
            "funserver",
            "linuxkit-config",
            "--build",
            "--install"
        ])
        .is_ok());
    }
}
