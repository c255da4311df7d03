//! The container-runtime lifecycle manager.
//!
//! A [`Manager`] owns at most one running backend and at most one engine client. `start`
//! selects a backend for this host, brings it up and connects a client according to the run
//! mode. `stop` tears everything down again and is a no-op when nothing is running.
//!
//! All state lives behind a single async mutex, so concurrent `start`/`stop` calls are
//! serialized and the intermediate `Starting`/`Stopping` states are never observed by other
//! callers.

use std::{path::PathBuf, sync::Arc, time::Duration};

use getset::Getters;
use tokio::{io::AsyncWrite, sync::Mutex};
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

#[cfg(feature = "cli-viz")]
use crate::utils::viz;
use crate::{
    address::ControlAddress,
    backend::{create_backend, Backend, BackendContext, BackendKind, StopOutcome, DEFAULT_STOP_TIMEOUT},
    client::EngineClient,
    config::ManagerConfig,
    platform::{Capabilities, CapabilityProbe, HostOs, SystemProbe},
    provision::BinaryCache,
    selector::{select_backend, Selection},
    utils::{CommandRunner, SystemRunner},
    FunserverError, FunserverResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

#[cfg(feature = "cli-viz")]
const START_MSG: &str = "Start container engine";

#[cfg(feature = "cli-viz")]
const STOP_MSG: &str = "Stop container engine";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The manager's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStatus {
    /// Nothing is running.
    Stopped,

    /// A start is in progress.
    Starting,

    /// The backend and/or client are up.
    Running,

    /// A stop is in progress.
    Stopping,

    /// The last start or stop failed.
    Failed,
}

/// The parts of the host the manager interacts with.
///
/// Defaults talk to the real host. Tests swap in fakes.
#[derive(TypedBuilder)]
pub struct HostEnvironment {
    /// The host OS.
    #[builder(default = HostOs::current())]
    pub os: HostOs,

    /// The binary cache.
    #[builder(default = Arc::new(BinaryCache::from_env()))]
    pub cache: Arc<BinaryCache>,

    /// Runner for external commands.
    #[builder(default = Arc::new(SystemRunner::default()) as Arc<dyn CommandRunner>)]
    pub runner: Arc<dyn CommandRunner>,

    /// Capability probe. Defaults to probing the host through `cache` and `runner`.
    #[builder(default, setter(strip_option))]
    pub probe: Option<Arc<dyn CapabilityProbe>>,

    /// How long the native engine gets to stop before it is killed.
    #[builder(default = DEFAULT_STOP_TIMEOUT)]
    pub stop_timeout: Duration,
}

/// Describes the embedded engine.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ServerInfo {
    /// The backend running the engine.
    kind: BackendKind,

    /// Where the engine listens.
    address: ControlAddress,

    /// Where the engine's output goes, if kept on the host.
    log_file: Option<PathBuf>,
}

/// Selects, starts and stops the container engine for this host.
pub struct Manager {
    config: ManagerConfig,
    ctx: BackendContext,
    state: Mutex<ManagerState>,
}

struct ManagerState {
    status: LifecycleStatus,
    backend: Option<Box<dyn Backend>>,
    client: Option<EngineClient>,
    address: Option<ControlAddress>,
    notices: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Manager {
    /// Creates a manager for the real host.
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_environment(config, HostEnvironment::builder().build())
    }

    /// Creates a manager that interacts with the host through `env`.
    pub fn with_environment(config: ManagerConfig, env: HostEnvironment) -> Self {
        let probe = env.probe.unwrap_or_else(|| {
            Arc::new(SystemProbe::new(env.cache.clone(), env.runner.clone()))
        });

        let ctx = BackendContext {
            config: config.clone(),
            os: env.os,
            cache: env.cache,
            probe,
            runner: env.runner,
            stop_timeout: env.stop_timeout,
        };

        Self {
            config,
            ctx,
            state: Mutex::new(ManagerState {
                status: LifecycleStatus::Stopped,
                backend: None,
                client: None,
                address: None,
                notices: vec![],
            }),
        }
    }

    /// The manager's configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The host OS the manager selects backends for.
    pub fn os(&self) -> HostOs {
        self.ctx.os
    }

    /// The binary cache.
    pub fn cache(&self) -> &Arc<BinaryCache> {
        &self.ctx.cache
    }

    /// Selects a backend and runs it, then connects a client, as the run mode asks.
    ///
    /// Starting a running manager does nothing. A backend left behind by a failed stop is
    /// stopped first; if it still cannot be stopped, the start fails and the backend is kept.
    pub async fn start(&self, cancel: &CancellationToken) -> FunserverResult<()> {
        let mut state = self.state.lock().await;
        if state.status == LifecycleStatus::Running {
            tracing::debug!("manager already running");
            return Ok(());
        }

        if let Some(client) = state.client.take() {
            client.close();
        }

        if let Some(mut stale) = state.backend.take() {
            tracing::info!("stopping the {} backend left from an earlier run", stale.kind());
            if let Err(e) = stale.stop(cancel).await {
                tracing::error!("failed to stop the {} backend: {}", stale.kind(), e);
                state.backend = Some(stale);
                state.status = LifecycleStatus::Failed;
                return Err(e);
            }
            state.address = None;
        }

        state.status = LifecycleStatus::Starting;

        #[cfg(feature = "cli-viz")]
        let spinner = viz::create_spinner(START_MSG.to_string());

        match self.bring_up(&mut state, cancel).await {
            Ok(()) => {
                state.status = LifecycleStatus::Running;

                #[cfg(feature = "cli-viz")]
                viz::finish_with_success(&spinner);

                if let Some(address) = &state.address {
                    tracing::info!("container engine available at {}", address);
                }
                Ok(())
            }
            Err(e) => {
                state.status = LifecycleStatus::Failed;

                #[cfg(feature = "cli-viz")]
                viz::finish_with_error(&spinner);

                tracing::error!("failed to start the container engine: {}", e);
                Err(e)
            }
        }
    }

    /// Closes the client and stops the backend.
    ///
    /// Stopping a manager that is not running does nothing. An engine that had to be killed
    /// is reported as [`StopOutcome::Escalated`] and logged, not returned as an error.
    pub async fn stop(&self, cancel: &CancellationToken) -> FunserverResult<StopOutcome> {
        let mut state = self.state.lock().await;
        if state.backend.is_none() && state.client.is_none() {
            state.status = LifecycleStatus::Stopped;
            return Ok(StopOutcome::AlreadyStopped);
        }

        state.status = LifecycleStatus::Stopping;

        #[cfg(feature = "cli-viz")]
        let spinner = viz::create_spinner(STOP_MSG.to_string());

        if let Some(client) = state.client.take() {
            client.close();
        }

        let result = match state.backend.as_mut() {
            Some(backend) => {
                let kind = backend.kind();
                backend.stop(cancel).await.map(|outcome| (kind, outcome))
            }
            None => Ok((BackendKind::Native, StopOutcome::AlreadyStopped)),
        };

        match result {
            Ok((kind, outcome)) => {
                if let Some(escalation) = outcome.escalation(&format!("{kind} engine")) {
                    tracing::warn!("{}", escalation);
                }

                state.backend = None;
                state.address = None;
                state.status = LifecycleStatus::Stopped;

                #[cfg(feature = "cli-viz")]
                viz::finish_with_success(&spinner);

                tracing::info!("container engine stopped");
                Ok(outcome)
            }
            Err(e @ FunserverError::Cancelled(_)) => {
                // The engine was killed on the way out
                state.backend = None;
                state.address = None;
                state.status = LifecycleStatus::Stopped;

                #[cfg(feature = "cli-viz")]
                viz::finish_with_error(&spinner);

                Err(e)
            }
            Err(e) => {
                state.status = LifecycleStatus::Failed;

                #[cfg(feature = "cli-viz")]
                viz::finish_with_error(&spinner);

                tracing::error!("failed to stop the container engine: {}", e);
                Err(e)
            }
        }
    }

    /// The current lifecycle status.
    pub async fn status(&self) -> LifecycleStatus {
        self.state.lock().await.status
    }

    /// Returns `true` if the manager is running.
    pub async fn is_running(&self) -> bool {
        self.status().await == LifecycleStatus::Running
    }

    /// The address the engine is reachable at, once started.
    pub async fn control_address(&self) -> Option<ControlAddress> {
        self.state.lock().await.address.clone()
    }

    /// The kind of backend running the engine, if one is.
    pub async fn backend_kind(&self) -> Option<BackendKind> {
        self.state
            .lock()
            .await
            .backend
            .as_ref()
            .map(|backend| backend.kind())
    }

    /// The engine client, if the run mode connects one and the manager is running.
    pub async fn client(&self) -> Option<EngineClient> {
        self.state.lock().await.client.clone()
    }

    /// The embedded engine, if the run mode starts one and the manager is running.
    pub async fn server(&self) -> Option<ServerInfo> {
        let state = self.state.lock().await;
        let backend = state.backend.as_ref()?;
        Some(ServerInfo {
            kind: backend.kind(),
            address: state.address.clone()?,
            log_file: backend.log_file(),
        })
    }

    /// Warnings raised by the last start, such as a fallback from the preferred backend.
    pub async fn notices(&self) -> Vec<String> {
        self.state.lock().await.notices.clone()
    }

    /// Returns `true` if the run mode starts an engine of our own.
    pub fn is_using_embedded_server(&self) -> bool {
        self.config.run_mode.runs_server()
    }

    /// A one-line, human-readable description of the service.
    pub async fn service_status(&self) -> String {
        let state = self.state.lock().await;
        if state.status != LifecycleStatus::Running {
            return format!("not running ({:?})", state.status).to_lowercase();
        }

        if let (Some(backend), Some(address)) = (&state.backend, &state.address) {
            return format!("embedded server running ({} backend at {})", backend.kind(), address);
        }

        match &state.client {
            Some(client) => match client.ping().await {
                Ok(()) => format!("connected to external engine at {}", client.get_address()),
                Err(e) => format!("client initialized but not connected: {}", e),
            },
            None => "not running".to_string(),
        }
    }

    /// Copies the embedded engine's log to `writer`, returning the number of bytes copied.
    pub async fn engine_logs<W>(&self, writer: &mut W) -> FunserverResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let log_file = {
            let state = self.state.lock().await;
            match state.backend.as_ref() {
                Some(backend) => backend.log_file(),
                None if self.is_using_embedded_server() => Some(self.config.server.log_file.clone()),
                None => None,
            }
        };

        let Some(log_file) = log_file else {
            return Err(FunserverError::InvalidState(
                "the engine's logs are not kept on this host".to_string(),
            ));
        };

        let mut file = tokio::fs::File::open(&log_file).await?;
        Ok(tokio::io::copy(&mut file, writer).await?)
    }

    /// The version reported by the engine binary.
    pub async fn engine_version(&self) -> FunserverResult<String> {
        self.ctx.cache.engine_version().await
    }

    async fn bring_up(
        &self,
        state: &mut ManagerState,
        cancel: &CancellationToken,
    ) -> FunserverResult<()> {
        state.notices.clear();
        let run_mode = self.config.run_mode;

        if run_mode.runs_server() {
            let capabilities = Capabilities::probe(
                self.ctx.probe.as_ref(),
                self.ctx.os,
                self.config.wsl.enabled,
            )
            .await;
            tracing::debug!("host capabilities on {}: {:?}", self.ctx.os, capabilities);

            if let Some(selection) =
                select_backend(run_mode, self.ctx.os, self.config.wsl.enabled, &capabilities)?
            {
                for notice in &selection.notices {
                    tracing::warn!("{}", notice);
                }
                state.notices.extend(selection.notices.iter().cloned());

                let (backend, address) =
                    self.start_backend(&selection, &mut state.notices, cancel).await?;
                state.backend = Some(backend);
                state.address = Some(address);
            }
        }

        if run_mode.runs_client() {
            let address = state
                .address
                .clone()
                .unwrap_or_else(|| self.config.client_address.clone());

            match EngineClient::connect(address.clone(), self.config.namespace.clone()) {
                Ok(client) => {
                    state.client = Some(client);
                    state.address = Some(address);
                }
                Err(e) => {
                    if let Some(mut backend) = state.backend.take() {
                        if let Err(stop_err) = backend.stop(cancel).await {
                            tracing::warn!("failed to stop {} backend: {}", backend.kind(), stop_err);
                        }
                    }
                    state.address = None;
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    async fn start_backend(
        &self,
        selection: &Selection,
        notices: &mut Vec<String>,
        cancel: &CancellationToken,
    ) -> FunserverResult<(Box<dyn Backend>, ControlAddress)> {
        tracing::info!("starting {} backend on {}", selection.primary, self.ctx.os);
        let mut backend = create_backend(selection.primary, &self.ctx);

        let error = match backend.start(cancel).await {
            Ok(address) => return Ok((backend, address)),
            Err(e) => e,
        };

        match selection.fallback {
            Some(fallback) if !matches!(error, FunserverError::Cancelled(_)) => {
                let notice = format!(
                    "{} backend failed, falling back to the {} backend: {}",
                    selection.primary, fallback, error
                );
                tracing::warn!("{}", notice);
                notices.push(notice);

                let mut backend = create_backend(fallback, &self.ctx);
                let address = backend.start(cancel).await?;
                Ok((backend, address))
            }
            _ => Err(error),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
