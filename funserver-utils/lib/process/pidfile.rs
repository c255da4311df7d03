//! Processes that are supervised from outside this process.
//!
//! A process started in detached mode outlives the invocation that launched it, so no
//! in-memory handle can be relied on. Its identity is persisted in a PID file and its
//! liveness is reconstructed from disk on every query.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::fs;

use crate::{is_process_alive, FunserverUtilsError, FunserverUtilsResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How often liveness is re-checked while waiting for a process to exit.
pub const LIVENESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A process identified only by the PID recorded in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalProcess {
    pid_file: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ExternalProcess {
    /// Creates a handle for the process tracked by `pid_file`.
    pub fn new(pid_file: impl Into<PathBuf>) -> Self {
        Self {
            pid_file: pid_file.into(),
        }
    }

    /// Returns the PID file path.
    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Reads the PID from the PID file.
    ///
    /// Returns `None` if the file does not exist.
    pub async fn read_pid(&self) -> FunserverUtilsResult<Option<u32>> {
        let content = match fs::read_to_string(&self.pid_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        content
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| FunserverUtilsError::InvalidPidFile {
                path: self.pid_file.clone(),
                content,
            })
    }

    /// Returns the PID if the file exists and the process it names is alive.
    ///
    /// An unreadable or invalid PID file is treated as "not running".
    pub async fn running_pid(&self) -> Option<u32> {
        match self.read_pid().await {
            Ok(Some(pid)) if is_process_alive(pid) => Some(pid),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("ignoring unreadable PID file: {}", e);
                None
            }
        }
    }

    /// Returns `true` if the tracked process is alive.
    pub async fn is_running(&self) -> bool {
        self.running_pid().await.is_some()
    }

    /// Records `pid` in the PID file, creating parent directories as needed.
    pub async fn write_pid(&self, pid: u32) -> FunserverUtilsResult<()> {
        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(&self.pid_file, pid.to_string()).await?;
        Ok(())
    }

    /// Removes the PID file if it exists.
    pub async fn remove_pid_file(&self) -> FunserverUtilsResult<()> {
        match fs::remove_file(&self.pid_file).await {
            Ok(()) => {
                tracing::info!("removed PID file at {}", self.pid_file.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_pid_file_is_not_running() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let process = ExternalProcess::new(temp_dir.path().join("vm.pid"));

        assert_eq!(process.read_pid().await?, None);
        assert!(!process.is_running().await);
        assert_eq!(process.running_pid().await, None);

        Ok(())
    }

    #[tokio::test]
    async fn test_pid_file_round_trip_tracks_liveness() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let process = ExternalProcess::new(temp_dir.path().join("state").join("vm.pid"));

        process.write_pid(std::process::id()).await?;
        assert_eq!(process.running_pid().await, Some(std::process::id()));

        process.remove_pid_file().await?;
        assert!(!process.pid_file().exists());
        assert!(!process.is_running().await);

        // Removing twice is fine
        process.remove_pid_file().await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_pid_file_is_reported() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let pid_file = temp_dir.path().join("vm.pid");
        fs::write(&pid_file, "not-a-pid").await?;

        let process = ExternalProcess::new(&pid_file);
        assert!(matches!(
            process.read_pid().await,
            Err(FunserverUtilsError::InvalidPidFile { .. })
        ));
        assert!(!process.is_running().await);

        Ok(())
    }
}
