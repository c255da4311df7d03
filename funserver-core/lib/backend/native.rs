use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use funserver_utils::{send_signal, FunserverUtilsResult, ProcessSignal, SignalDelivery};
use tokio::{
    fs,
    process::{Child, Command},
    sync::oneshot,
};
use tokio_util::sync::CancellationToken;

use crate::{
    address::ControlAddress,
    config::ServerConfig,
    platform::HostOs,
    provision::{BinaryCache, Component},
    readiness::wait_for_ready,
    FunserverError, FunserverResult,
};

use super::{Backend, BackendKind, BackendStatus, StopOutcome};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How long the engine gets to exit after the interrupt signal.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the exit to be reported after a kill.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime type registered for a bundled `runc`.
pub const RUNC_RUNTIME_TYPE: &str = "io.containerd.runc.v2";

const ENGINE_PROCESS: &str = "containerd";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runs the engine as a child process of the agent.
pub struct NativeBackend {
    config: ServerConfig,
    cache: Arc<BinaryCache>,
    os: HostOs,
    stop_timeout: Duration,
    child: Option<Child>,
    signal: SignalFn,
}

type SignalFn = fn(u32, ProcessSignal) -> FunserverUtilsResult<SignalDelivery>;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl NativeBackend {
    /// Creates an unstarted native backend.
    pub fn new(
        config: ServerConfig,
        cache: Arc<BinaryCache>,
        os: HostOs,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            config,
            cache,
            os,
            stop_timeout,
            child: None,
            signal: send_signal,
        }
    }

    /// PID of the engine process, if one was started.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|child| child.id())
    }

    async fn prepare_dirs(&self, with_cni_conf: bool) -> FunserverResult<()> {
        fs::create_dir_all(&self.config.root).await?;
        fs::create_dir_all(&self.config.state).await?;

        if let Some(parent) = self.config.log_file.parent() {
            fs::create_dir_all(parent).await?;
        }

        if let Some(socket) = self.config.address.socket_path() {
            if let Some(parent) = socket.parent() {
                fs::create_dir_all(parent).await?;
            }

            // A socket left behind by a crashed engine would pass the readiness check at once
            match fs::remove_file(socket).await {
                Ok(()) => tracing::info!("removed stale engine socket at {}", socket.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if with_cni_conf {
            fs::create_dir_all(cni_conf_dir(&self.config)).await?;
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Backend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    async fn start(&mut self, cancel: &CancellationToken) -> FunserverResult<ControlAddress> {
        if self.status().await == BackendStatus::Running {
            return Ok(self.control_address());
        }

        if let Err(e) = self.cache.ensure_all_extracted().await {
            tracing::warn!(
                "could not extract every bundled binary, falling back to installed ones: {}",
                e
            );
        }

        let engine = self.cache.require(Component::Engine)?;
        let runtime = self.cache.require(Component::Runtime)?;
        let cni = self.cache.resolve(Component::NetworkPlugins);
        if cni.is_none() {
            tracing::warn!("no CNI plugins found, containers will start without networking");
        }

        let bundled_runtime = self.cache.contains(&runtime).then_some(runtime.as_path());
        let bundled_cni = cni.as_deref().filter(|dir| self.cache.contains(dir));

        self.prepare_dirs(bundled_cni.is_some()).await?;

        let args = engine_args(&self.config, bundled_runtime, bundled_cni);
        tracing::info!("starting {} on {}: {}", engine.display(), self.os, args.join(" "));

        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.log_file)?;

        let mut child = Command::new(&engine)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FunserverError::process(ENGINE_PROCESS, format!("failed to spawn: {e}")))?;

        tracing::info!(
            "started {} with PID {}",
            ENGINE_PROCESS,
            child.id().unwrap_or(0)
        );

        let address = self.control_address();
        let timeout = self.config.readiness_timeout();
        let ready = tokio::select! {
            ready = wait_for_ready(&address, timeout, cancel) => ready.map(|_| ()),
            status = child.wait() => Err(FunserverError::process(
                ENGINE_PROCESS,
                format!(
                    "exited before becoming ready ({}), see {}",
                    status.map(|s| s.to_string()).unwrap_or_else(|e| e.to_string()),
                    self.config.log_file.display()
                ),
            )),
        };

        if let Err(e) = ready {
            tracing::error!("{} failed to start: {}", ENGINE_PROCESS, e);
            kill_and_reap(&mut child).await;
            return Err(e);
        }

        self.child = Some(child);
        Ok(address)
    }

    async fn stop(&mut self, cancel: &CancellationToken) -> FunserverResult<StopOutcome> {
        let Some(mut child) = self.child.take() else {
            return Ok(StopOutcome::AlreadyStopped);
        };

        if let Some(status) = child.try_wait()? {
            tracing::info!("{} had already exited with {}", ENGINE_PROCESS, status);
            return Ok(StopOutcome::AlreadyStopped);
        }

        let Some(pid) = child.id() else {
            return Ok(StopOutcome::AlreadyStopped);
        };

        tracing::info!("stopping {} (PID {})", ENGINE_PROCESS, pid);
        match (self.signal)(pid, ProcessSignal::Interrupt) {
            Ok(SignalDelivery::Delivered) => {}
            Ok(SignalDelivery::NoSuchProcess) => {
                let _ = child.wait().await;
                return Ok(StopOutcome::AlreadyStopped);
            }
            Err(e) => {
                tracing::warn!("could not interrupt {}, killing it: {}", ENGINE_PROCESS, e);
                kill_and_reap(&mut child).await;
                return Ok(StopOutcome::Escalated {
                    signal: ProcessSignal::Kill,
                    grace: Duration::ZERO,
                });
            }
        }

        let (exit_tx, mut exit_rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = exit_tx.send(child.wait().await);
        });

        tokio::select! {
            status = &mut exit_rx => {
                match status {
                    Ok(Ok(status)) if !status.success() => {
                        tracing::warn!("{} exited with {}", ENGINE_PROCESS, status);
                    }
                    Ok(Err(e)) => tracing::warn!("failed to wait for {}: {}", ENGINE_PROCESS, e),
                    _ => tracing::info!("{} stopped", ENGINE_PROCESS),
                }

                Ok(StopOutcome::Graceful)
            }
            _ = tokio::time::sleep(self.stop_timeout) => {
                tracing::warn!(
                    "{} did not stop within {:?}, killing it",
                    ENGINE_PROCESS,
                    self.stop_timeout
                );

                (self.signal)(pid, ProcessSignal::Kill)?;
                if tokio::time::timeout(KILL_REAP_TIMEOUT, exit_rx).await.is_err() {
                    tracing::warn!("{} did not exit after being killed", ENGINE_PROCESS);
                }

                Ok(StopOutcome::Escalated {
                    signal: ProcessSignal::Kill,
                    grace: self.stop_timeout,
                })
            }
            _ = cancel.cancelled() => {
                tracing::warn!("stop of {} cancelled, killing it", ENGINE_PROCESS);

                (self.signal)(pid, ProcessSignal::Kill)?;
                if tokio::time::timeout(KILL_REAP_TIMEOUT, exit_rx).await.is_err() {
                    tracing::warn!("{} did not exit after being killed", ENGINE_PROCESS);
                }

                Err(FunserverError::Cancelled(format!("stopping {}", ENGINE_PROCESS)))
            }
        }
    }

    async fn status(&mut self) -> BackendStatus {
        match self.child.as_mut().map(|child| child.try_wait()) {
            Some(Ok(None)) => BackendStatus::Running,
            _ => BackendStatus::Stopped,
        }
    }

    fn control_address(&self) -> ControlAddress {
        self.config.address.clone()
    }

    fn log_file(&self) -> Option<PathBuf> {
        Some(self.config.log_file.clone())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds the engine's argument vector from `config`.
///
/// The runtime and CNI flags are only passed for binaries that came from the bundle; an
/// engine installed on the system already knows where its own runtime and plugins are.
pub fn engine_args(
    config: &ServerConfig,
    bundled_runtime: Option<&Path>,
    bundled_cni: Option<&Path>,
) -> Vec<String> {
    let mut args = vec![
        "--root".to_string(),
        config.root.display().to_string(),
        "--state".to_string(),
        config.state.display().to_string(),
        "--address".to_string(),
        config.address.to_string(),
        "--log-level".to_string(),
        config.log_level.clone(),
    ];

    if let Some(runtime) = bundled_runtime {
        args.extend([
            "--runtime-type".to_string(),
            RUNC_RUNTIME_TYPE.to_string(),
            "--runtime-engine".to_string(),
            runtime.display().to_string(),
        ]);
    }

    if let Some(cni) = bundled_cni {
        args.extend([
            "--cni-bin-dir".to_string(),
            cni.display().to_string(),
            "--cni-conf-dir".to_string(),
            cni_conf_dir(config).display().to_string(),
        ]);
    }

    if let Some(config_file) = &config.config {
        args.extend(["--config".to_string(), config_file.display().to_string()]);
    }

    args
}

async fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::warn!("failed to kill {}: {}", ENGINE_PROCESS, e);
    }

    if tokio::time::timeout(KILL_REAP_TIMEOUT, child.wait())
        .await
        .is_err()
    {
        tracing::warn!("{} did not exit after being killed", ENGINE_PROCESS);
    }
}

fn cni_conf_dir(config: &ServerConfig) -> PathBuf {
    config.root.join("cni").join("conf")
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
