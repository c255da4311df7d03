//! Running host commands.
//!
//! The WSL and LinuxKit backends drive external command line tools (`wsl.exe`, `linuxkit`,
//! `powershell`). They go through [`CommandRunner`] so the orchestration logic can be
//! exercised against a scripted runner.

use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::{FunserverError, FunserverResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Upper bound on how long a single short-lived command may run.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What a finished command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the command exited successfully.
    pub success: bool,

    /// Exit code, if the command exited normally.
    pub code: Option<i32>,

    /// Decoded standard output.
    pub stdout: String,

    /// Decoded standard error.
    pub stderr: String,
}

/// Runs external commands on behalf of the backends.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `program` to completion and collects its output.
    async fn output(&self, program: &str, args: &[String]) -> FunserverResult<CommandOutput>;

    /// Spawns `program` without waiting for it.
    ///
    /// The returned child is killed when dropped.
    fn spawn(&self, program: &str, args: &[String]) -> FunserverResult<Child>;
}

/// Runs commands on the host.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SystemRunner {
    /// Creates a runner that gives each command at most `timeout` to finish.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandOutput {
    /// Turns an unsuccessful output into a process error for `what`.
    pub fn check(self, what: &str) -> FunserverResult<Self> {
        if self.success {
            return Ok(self);
        }

        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        };

        Err(FunserverError::process(
            what,
            match self.code {
                Some(code) => format!("exited with code {code}: {detail}"),
                None => format!("terminated by signal: {detail}"),
            },
        ))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn output(&self, program: &str, args: &[String]) -> FunserverResult<CommandOutput> {
        tracing::debug!("running {} {}", program, args.join(" "));

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FunserverError::process(program, format!("failed to spawn: {e}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                FunserverError::process(program, format!("did not finish within {:?}", self.timeout))
            })??;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: decode_output(&output.stdout),
            stderr: decode_output(&output.stderr),
        })
    }

    fn spawn(&self, program: &str, args: &[String]) -> FunserverResult<Child> {
        tracing::debug!("spawning {} {}", program, args.join(" "));

        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FunserverError::process(program, format!("failed to spawn: {e}")))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Decodes command output that may be UTF-16LE.
///
/// `wsl.exe` writes most of its own messages as UTF-16LE while commands run inside a
/// distribution write UTF-8, so the encoding is sniffed from the bytes.
pub fn decode_output(bytes: &[u8]) -> String {
    let looks_utf16 = bytes.len() >= 2
        && bytes.len() % 2 == 0
        && (bytes.starts_with(&[0xFF, 0xFE])
            || bytes.iter().skip(1).step_by(2).filter(|b| **b == 0).count() * 2 >= bytes.len() / 2);

    if !looks_utf16 {
        return String::from_utf8_lossy(bytes).into_owned();
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    String::from_utf16_lossy(&units)
        .trim_start_matches('\u{feff}')
        .replace('\0', "")
}

/// Builds an argument vector from string slices.
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
