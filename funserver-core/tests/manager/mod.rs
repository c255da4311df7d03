//! Lifecycle scenarios for the manager, driven by fake engine scripts.
//!
//! The fake engine is a shell script named like the real binary. It creates the file passed
//! as `--address` so readiness can be observed, and exits on `SIGINT`.

#![cfg(unix)]

use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use funserver_core::{
    address::ControlAddress,
    backend::{BackendKind, StopOutcome},
    config::{ManagerConfig, RunMode},
    manager::{HostEnvironment, LifecycleStatus, Manager},
    platform::{CapabilityProbe, HostOs, WslStatus},
    provision::{BinaryCache, Component},
    utils::{CommandOutput, CommandRunner},
    FunserverError, FunserverResult,
};
use funserver_utils::ProcessSignal;
use tempfile::TempDir;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const GRACEFUL_ENGINE: &str = r#"#!/bin/sh
addr=""
while [ $# -gt 0 ]; do
  case "$1" in
    --address) addr="$2"; shift 2 ;;
    --version) echo "containerd github.com/containerd/containerd v1.7.0-fake"; exit 0 ;;
    *) shift ;;
  esac
done
trap 'rm -f "$addr"; exit 0' INT TERM
echo "fake containerd listening on $addr"
touch "$addr"
while true; do sleep 0.1; done
"#;

const STUBBORN_ENGINE: &str = r#"#!/bin/sh
addr=""
while [ $# -gt 0 ]; do
  case "$1" in
    --address) addr="$2"; shift 2 ;;
    *) shift ;;
  esac
done
trap '' INT
touch "$addr"
while true; do sleep 0.1; done
"#;

const SHORT_LIVED_ENGINE: &str = r#"#!/bin/sh
addr=""
while [ $# -gt 0 ]; do
  case "$1" in
    --address) addr="$2"; shift 2 ;;
    *) shift ;;
  esac
done
touch "$addr"
sleep 0.2
"#;

const SILENT_ENGINE: &str = r#"#!/bin/sh
while true; do sleep 0.1; done
"#;

const CRASHING_ENGINE: &str = r#"#!/bin/sh
echo "fatal: cannot open root directory" >&2
exit 1
"#;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A scratch home with a fake `PATH` holding the engine binaries.
struct Fixture {
    temp_dir: TempDir,
}

/// Canned capability answers.
struct FakeProbe {
    wsl: WslStatus,
    native: bool,
    wsl_probes: AtomicUsize,
}

/// A `wsl.exe` that fails every command.
struct BrokenWsl;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Fixture {
    fn new() -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        std::fs::create_dir_all(temp_dir.path().join("path"))?;
        Ok(Self { temp_dir })
    }

    fn home(&self) -> &Path {
        self.temp_dir.path()
    }

    fn path_dir(&self) -> PathBuf {
        self.temp_dir.path().join("path")
    }

    fn install(&self, name: &str, script: &str) -> anyhow::Result<()> {
        let path = self.path_dir().join(name);
        std::fs::write(&path, script)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(())
    }

    fn install_engine(&self, os: HostOs, script: &str) -> anyhow::Result<()> {
        self.install(&Component::Engine.file_name(os), script)?;
        self.install(&Component::Runtime.file_name(os), "#!/bin/sh\nexit 0\n")
    }

    fn cache(&self, os: HostOs) -> Arc<BinaryCache> {
        Arc::new(
            BinaryCache::new(self.home().join("cache"), self.home().join("bundle"), os)
                .with_search_path(self.path_dir()),
        )
    }

    fn config(&self, os: HostOs, run_mode: RunMode) -> ManagerConfig {
        let mut config = ManagerConfig::with_home(self.home(), os);
        config.run_mode = run_mode;
        config.server.readiness_timeout_secs = 2;
        config.server.address =
            ControlAddress::UnixSocket(self.home().join("containerd").join("containerd.sock"));
        config.client_address = config.server.address.clone();
        config.wsl.wslconfig_path = self.home().join(".wslconfig");
        config
    }

    fn manager(&self, config: ManagerConfig, stop_timeout: Duration) -> Manager {
        let os = HostOs::Linux;
        Manager::with_environment(
            config,
            HostEnvironment::builder()
                .os(os)
                .cache(self.cache(os))
                .stop_timeout(stop_timeout)
                .build(),
        )
    }
}

impl FakeProbe {
    fn new(wsl: WslStatus, native: bool) -> Arc<Self> {
        Arc::new(Self {
            wsl,
            native,
            wsl_probes: AtomicUsize::new(0),
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl CapabilityProbe for FakeProbe {
    async fn wsl(&self) -> WslStatus {
        self.wsl_probes.fetch_add(1, Ordering::SeqCst);
        self.wsl.clone()
    }

    async fn hyperkit_available(&self) -> bool {
        false
    }

    async fn native_available(&self) -> bool {
        self.native
    }
}

#[async_trait]
impl CommandRunner for BrokenWsl {
    async fn output(&self, _program: &str, _args: &[String]) -> FunserverResult<CommandOutput> {
        Ok(CommandOutput {
            success: false,
            code: Some(1),
            stdout: String::new(),
            stderr: "The Windows Subsystem for Linux instance has terminated.".to_string(),
        })
    }

    fn spawn(&self, program: &str, _args: &[String]) -> FunserverResult<Child> {
        Err(FunserverError::process(program, "not available in tests"))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_linux_engine_from_path_starts_and_stops_gracefully() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    fixture.install_engine(HostOs::Linux, GRACEFUL_ENGINE)?;
    let config = fixture.config(HostOs::Linux, RunMode::Server);
    let expected_address = config.server.address.clone();
    let manager = fixture.manager(config, Duration::from_secs(5));
    let cancel = CancellationToken::new();

    manager.start(&cancel).await?;
    assert!(manager.is_running().await);
    assert_eq!(manager.control_address().await, Some(expected_address.clone()));
    assert_eq!(manager.backend_kind().await, Some(BackendKind::Native));
    assert!(manager.client().await.is_none());

    let server = manager.server().await.expect("server info");
    assert_eq!(server.get_address(), &expected_address);
    assert!(manager.service_status().await.contains("embedded server running"));

    // A second start is a no-op
    manager.start(&cancel).await?;
    assert!(manager.is_running().await);

    let started = Instant::now();
    assert_eq!(manager.stop(&cancel).await?, StopOutcome::Graceful);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(manager.status().await, LifecycleStatus::Stopped);
    assert_eq!(manager.control_address().await, None);
    assert!(manager.server().await.is_none());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_windows_without_wsl_falls_back_to_native() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    fixture.install_engine(HostOs::Windows, GRACEFUL_ENGINE)?;
    let probe = FakeProbe::new(WslStatus::default(), true);

    let manager = Manager::with_environment(
        fixture.config(HostOs::Windows, RunMode::Server),
        HostEnvironment::builder()
            .os(HostOs::Windows)
            .cache(fixture.cache(HostOs::Windows))
            .probe(probe.clone())
            .runner(Arc::new(BrokenWsl))
            .build(),
    );
    let cancel = CancellationToken::new();

    manager.start(&cancel).await?;
    assert!(manager.is_running().await);
    assert_eq!(manager.backend_kind().await, Some(BackendKind::Native));
    assert_eq!(probe.wsl_probes.load(Ordering::SeqCst), 1);

    let notices = manager.notices().await;
    assert_eq!(notices.len(), 1);
    assert!(notices[0].contains("falling back to the native engine"));

    manager.stop(&cancel).await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_failed_wsl_backend_falls_back_to_native() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    fixture.install_engine(HostOs::Windows, GRACEFUL_ENGINE)?;
    let available = WslStatus {
        installed: true,
        wsl2: true,
        detail: "Default Version: 2".to_string(),
    };

    let manager = Manager::with_environment(
        fixture.config(HostOs::Windows, RunMode::Server),
        HostEnvironment::builder()
            .os(HostOs::Windows)
            .cache(fixture.cache(HostOs::Windows))
            .probe(FakeProbe::new(available, true))
            .runner(Arc::new(BrokenWsl))
            .build(),
    );
    let cancel = CancellationToken::new();

    manager.start(&cancel).await?;
    assert_eq!(manager.backend_kind().await, Some(BackendKind::Native));

    let notices = manager.notices().await;
    assert!(notices
        .iter()
        .any(|n| n.contains("wsl backend failed, falling back to the native backend")));

    manager.stop(&cancel).await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_missing_engine_is_a_provisioning_error() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let manager = fixture.manager(
        fixture.config(HostOs::Linux, RunMode::Server),
        Duration::from_secs(5),
    );
    let cancel = CancellationToken::new();

    let err = manager.start(&cancel).await.unwrap_err();
    assert!(err.is_provisioning());
    assert!(err.to_string().contains("containerd"));
    assert_eq!(manager.status().await, LifecycleStatus::Failed);
    assert!(!manager.is_running().await);

    assert_eq!(manager.stop(&cancel).await?, StopOutcome::AlreadyStopped);
    assert_eq!(manager.status().await, LifecycleStatus::Stopped);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_stop_without_start_is_a_no_op() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let manager = fixture.manager(
        fixture.config(HostOs::Linux, RunMode::Both),
        Duration::from_secs(5),
    );

    assert_eq!(
        manager.stop(&CancellationToken::new()).await?,
        StopOutcome::AlreadyStopped
    );
    assert_eq!(manager.status().await, LifecycleStatus::Stopped);
    assert_eq!(manager.service_status().await, "not running (stopped)");
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_stubborn_engine_is_killed_and_escalation_reported() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    fixture.install_engine(HostOs::Linux, STUBBORN_ENGINE)?;
    let grace = Duration::from_millis(500);
    let manager = fixture.manager(fixture.config(HostOs::Linux, RunMode::Server), grace);
    let cancel = CancellationToken::new();

    manager.start(&cancel).await?;
    let outcome = manager.stop(&cancel).await?;

    assert_eq!(
        outcome,
        StopOutcome::Escalated {
            signal: ProcessSignal::Kill,
            grace,
        }
    );
    assert!(matches!(
        outcome.escalation("native engine"),
        Some(FunserverError::ShutdownEscalation { .. })
    ));
    assert_eq!(manager.status().await, LifecycleStatus::Stopped);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_cancelled_stop_kills_the_engine() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    fixture.install_engine(HostOs::Linux, STUBBORN_ENGINE)?;
    let manager = fixture.manager(
        fixture.config(HostOs::Linux, RunMode::Server),
        Duration::from_secs(30),
    );

    manager.start(&CancellationToken::new()).await?;

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        })
    };

    let started = Instant::now();
    let err = manager.stop(&cancel).await.unwrap_err();
    assert!(matches!(err, FunserverError::Cancelled(_)));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(manager.status().await, LifecycleStatus::Stopped);
    canceller.await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_stop_after_engine_exited_succeeds() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    fixture.install_engine(HostOs::Linux, SHORT_LIVED_ENGINE)?;
    let manager = fixture.manager(
        fixture.config(HostOs::Linux, RunMode::Server),
        Duration::from_secs(5),
    );
    let cancel = CancellationToken::new();

    manager.start(&cancel).await?;
    tokio::time::sleep(Duration::from_millis(800)).await;

    assert_eq!(manager.stop(&cancel).await?, StopOutcome::AlreadyStopped);
    assert_eq!(manager.status().await, LifecycleStatus::Stopped);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_engine_that_never_listens_times_out() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    fixture.install_engine(HostOs::Linux, SILENT_ENGINE)?;
    let mut config = fixture.config(HostOs::Linux, RunMode::Server);
    config.server.readiness_timeout_secs = 1;
    let manager = fixture.manager(config, Duration::from_secs(5));

    let started = Instant::now();
    let err = manager.start(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, FunserverError::ReadinessTimeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(manager.status().await, LifecycleStatus::Failed);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_engine_that_exits_early_reports_log_file() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    fixture.install_engine(HostOs::Linux, CRASHING_ENGINE)?;
    let config = fixture.config(HostOs::Linux, RunMode::Server);
    let log_file = config.server.log_file.clone();
    let manager = fixture.manager(config, Duration::from_secs(5));

    let err = manager.start(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, FunserverError::Process { .. }));
    assert!(err.to_string().contains(&log_file.display().to_string()));
    assert!(std::fs::read_to_string(&log_file)?.contains("cannot open root directory"));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_both_mode_connects_client_to_embedded_engine() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    fixture.install_engine(HostOs::Linux, GRACEFUL_ENGINE)?;
    let mut config = fixture.config(HostOs::Linux, RunMode::Both);
    config.client_address = ControlAddress::UnixSocket(fixture.home().join("elsewhere.sock"));
    let server_address = config.server.address.clone();
    let manager = fixture.manager(config, Duration::from_secs(5));
    let cancel = CancellationToken::new();

    manager.start(&cancel).await?;
    assert!(manager.is_using_embedded_server());

    let client = manager.client().await.expect("client");
    assert_eq!(client.get_address(), &server_address);
    assert_eq!(client.get_namespace(), "fun");
    assert!(manager.server().await.is_some());

    let mut logs = Vec::new();
    manager.engine_logs(&mut logs).await?;
    assert!(String::from_utf8(logs)?.contains("fake containerd listening on"));
    assert!(manager.engine_version().await?.contains("v1.7.0-fake"));

    manager.stop(&cancel).await?;
    assert!(manager.client().await.is_none());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_client_mode_requires_a_reachable_engine() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let config = fixture.config(HostOs::Linux, RunMode::Client);
    let socket = config.client_address.socket_path().unwrap().to_path_buf();
    let manager = fixture.manager(config, Duration::from_secs(5));
    let cancel = CancellationToken::new();

    let err = manager.start(&cancel).await.unwrap_err();
    assert!(matches!(err, FunserverError::Client { .. }));
    assert!(!manager.is_using_embedded_server());

    std::fs::create_dir_all(socket.parent().unwrap())?;
    std::fs::write(&socket, "")?;
    manager.start(&cancel).await?;

    assert!(manager.is_running().await);
    assert!(manager.client().await.is_some());
    assert!(manager.server().await.is_none());
    assert!(manager
        .service_status()
        .await
        .starts_with("client initialized but not connected"));
    assert!(manager.engine_logs(&mut Vec::new()).await.is_err());

    assert_eq!(manager.stop(&cancel).await?, StopOutcome::AlreadyStopped);
    assert_eq!(manager.status().await, LifecycleStatus::Stopped);
    Ok(())
}
