//! Signal delivery and liveness probes for processes identified by PID.

use std::fmt;

use crate::{FunserverUtilsError, FunserverUtilsResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A signal that can be sent to a process, ordered from most to least graceful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// Ask the process to stop (`SIGINT`).
    Interrupt,

    /// Tell the process to stop (`SIGTERM`).
    Terminate,

    /// Forcibly stop the process (`SIGKILL`).
    Kill,
}

/// What happened when a signal was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDelivery {
    /// The signal was delivered.
    Delivered,

    /// There is no such process.
    NoSuchProcess,
}

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The escalation ladder used when stopping a process that is not our child.
pub const SHUTDOWN_ESCALATION: [ProcessSignal; 3] = [
    ProcessSignal::Interrupt,
    ProcessSignal::Terminate,
    ProcessSignal::Kill,
];

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Sends `signal` to the process `pid`.
///
/// A process that does not exist is not an error; it is reported as
/// [`SignalDelivery::NoSuchProcess`] so callers can treat it as already stopped.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: ProcessSignal) -> FunserverUtilsResult<SignalDelivery> {
    use nix::{
        errno::Errno,
        sys::signal::{kill, Signal},
        unistd::Pid,
    };

    let nix_signal = match signal {
        ProcessSignal::Interrupt => Signal::SIGINT,
        ProcessSignal::Terminate => Signal::SIGTERM,
        ProcessSignal::Kill => Signal::SIGKILL,
    };

    match kill(Pid::from_raw(pid as i32), nix_signal) {
        Ok(()) => {
            tracing::debug!("sent {} to process {}", signal, pid);
            Ok(SignalDelivery::Delivered)
        }
        Err(Errno::ESRCH) => Ok(SignalDelivery::NoSuchProcess),
        Err(e) => Err(FunserverUtilsError::SignalDelivery {
            pid,
            signal: signal.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Sends `signal` to the process `pid`.
///
/// Windows has no POSIX signals: interrupt and terminate ask the process to close,
/// kill forces it.
#[cfg(not(unix))]
pub fn send_signal(pid: u32, signal: ProcessSignal) -> FunserverUtilsResult<SignalDelivery> {
    if !is_process_alive(pid) {
        return Ok(SignalDelivery::NoSuchProcess);
    }

    let mut command = std::process::Command::new("taskkill");
    if signal == ProcessSignal::Kill {
        command.arg("/F");
    }
    command.arg("/PID").arg(pid.to_string());

    let output = command.output()?;
    if output.status.success() {
        tracing::debug!("sent {} to process {}", signal, pid);
        Ok(SignalDelivery::Delivered)
    } else if !is_process_alive(pid) {
        Ok(SignalDelivery::NoSuchProcess)
    } else {
        Err(FunserverUtilsError::SignalDelivery {
            pid,
            signal: signal.to_string(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Returns `true` if a process with the given PID exists.
///
/// On unix this is the signal-zero probe. A process we are not allowed to signal still exists.
/// Zombies also count as alive until they are reaped by their parent.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::{errno::Errno, sys::signal::kill, unistd::Pid};

    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Returns `true` if a process with the given PID exists.
#[cfg(not(unix))]
pub fn is_process_alive(pid: u32) -> bool {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for ProcessSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessSignal::Interrupt => write!(f, "SIGINT"),
            ProcessSignal::Terminate => write!(f, "SIGTERM"),
            ProcessSignal::Kill => write!(f, "SIGKILL"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
