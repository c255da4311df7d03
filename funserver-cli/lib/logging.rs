//! Tracing setup for the agent.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{FunserverCliError, FunserverCliResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Crates whose logs the level flags apply to.
const LOG_TARGETS: &[&str] = &["funserver", "funserver_core", "funserver_utils", "funserver_cli"];

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds the log filter.
///
/// An explicit `level` wins over `RUST_LOG`, which wins over `fallback`.
pub fn log_filter(level: Option<&str>, fallback: &str) -> EnvFilter {
    if let Some(level) = level {
        return EnvFilter::new(directives(level));
    }

    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(fallback)))
}

/// Installs the global subscriber, logging to stderr and, if given, to `log_file`.
///
/// The returned guard flushes the file writer when dropped, so keep it alive until exit.
pub fn init_logging(
    level: Option<&str>,
    fallback: &str,
    log_file: Option<&Path>,
) -> FunserverCliResult<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)?;

            let file_name = path.file_name().ok_or_else(|| {
                FunserverCliError::Logging(format!("{} is not a file path", path.display()))
            })?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(log_filter(level, fallback))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| FunserverCliError::Logging(e.to_string()))?;

    Ok(guard)
}

fn directives(level: &str) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_directives_cover_every_crate() {
        let directives = directives("debug");
        for target in LOG_TARGETS {
            assert!(directives.contains(&format!("{target}=debug")));
        }
    }

    #[test]
    #[serial]
    fn test_explicit_level_overrides_env() {
        std::env::set_var("RUST_LOG", "warn");
        let filter = log_filter(Some("trace"), "info").to_string();
        std::env::remove_var("RUST_LOG");

        assert!(filter.contains("funserver_core=trace"));
    }

    #[test]
    #[serial]
    fn test_fallback_used_without_env() {
        std::env::remove_var("RUST_LOG");
        let filter = log_filter(None, "info").to_string();
        assert!(filter.contains("funserver_core=info"));
    }
}
