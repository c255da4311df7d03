//! Waiting for an engine to become reachable.
//!
//! Readiness is detected by polling: an address that lives on the host filesystem is ready
//! once it exists. Named pipes and addresses inside a WSL distribution can't be checked that
//! way; for those the wait degrades to sleeping for the full timeout and trusting the first
//! real client connection to surface any problem.

use std::{future::Future, path::Path, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{address::ControlAddress, FunserverError, FunserverResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How often readiness is re-checked.
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How readiness was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The address was observed to exist.
    Reachable,

    /// The address can't be probed; the full timeout elapsed and readiness is assumed.
    Assumed,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Waits for `address` to become reachable.
///
/// Returns as soon as a probeable address exists, fails with
/// [`FunserverError::ReadinessTimeout`] once `timeout` elapses, and with
/// [`FunserverError::Cancelled`] if `cancel` fires first.
pub async fn wait_for_ready(
    address: &ControlAddress,
    timeout: Duration,
    cancel: &CancellationToken,
) -> FunserverResult<Readiness> {
    let Some(path) = address.socket_path() else {
        tracing::debug!(
            "{} can't be probed, waiting {:?} before assuming it is ready",
            address,
            timeout
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(FunserverError::Cancelled(format!("waiting for {}", address)));
            }
            _ = tokio::time::sleep(timeout) => {}
        }

        return Ok(Readiness::Assumed);
    };

    let what = format!("waiting for {}", address);
    if poll_until(&what, timeout, READINESS_POLL_INTERVAL, cancel, || path_exists(path)).await? {
        tracing::info!("engine is reachable at {}", address);
        return Ok(Readiness::Reachable);
    }

    Err(FunserverError::ReadinessTimeout {
        address: address.clone(),
        timeout,
    })
}

/// Calls `check` every `interval` until it returns `true` or `timeout` elapses.
///
/// `check` runs once immediately. Returns `Ok(false)` on timeout and
/// [`FunserverError::Cancelled`] (naming `what`) if `cancel` fires. A `check` still running
/// at the deadline is abandoned and counts as not ready, so the wait never outlasts `timeout`.
pub async fn poll_until<F, Fut>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
    mut check: F,
) -> FunserverResult<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        let ready = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(FunserverError::Cancelled(what.to_string()));
            }
            ready = tokio::time::timeout_at(deadline, check()) => ready.unwrap_or(false),
        };

        if ready {
            return Ok(true);
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(FunserverError::Cancelled(what.to_string()));
            }
            _ = tokio::time::sleep_until((now + interval).min(deadline)) => {}
        }
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
