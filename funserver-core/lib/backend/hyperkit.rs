use std::{path::PathBuf, process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use funserver_utils::{
    is_process_alive, send_signal, ExternalProcess, ProcessSignal, SignalDelivery,
    LIVENESS_POLL_INTERVAL, SHUTDOWN_ESCALATION,
};
use tokio::{
    fs,
    process::{Child, Command},
};
use tokio_util::sync::CancellationToken;

use crate::{
    address::ControlAddress,
    config::LinuxKitVmConfig,
    provision::{BinaryCache, Component},
    readiness::{poll_until, wait_for_ready},
    FunserverError, FunserverResult,
};

use super::{Backend, BackendKind, BackendStatus, StopOutcome};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How long each step of the stop ladder waits for the VM to exit.
pub const DEFAULT_STOP_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Kernel command line of the LinuxKit guest.
pub const KERNEL_CMDLINE: &str = "console=ttyS0";

const HYPERVISOR_PROCESS: &str = "hyperkit";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runs the engine inside a LinuxKit VM booted by HyperKit.
///
/// The hypervisor runs detached and records its PID in `<state_dir>/hyperkit.pid`, so a VM
/// started by an earlier agent is found and managed the same way as one started now.
pub struct HyperkitBackend {
    config: LinuxKitVmConfig,
    cache: Arc<BinaryCache>,
    vm: ExternalProcess,
    readiness_timeout: Duration,
    stop_step_timeout: Duration,
    child: Option<Child>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HyperkitBackend {
    /// Creates a backend for the VM described by `config`.
    pub fn new(config: LinuxKitVmConfig, cache: Arc<BinaryCache>, readiness_timeout: Duration) -> Self {
        let vm = ExternalProcess::new(config.pid_file());
        Self {
            config,
            cache,
            vm,
            readiness_timeout,
            stop_step_timeout: DEFAULT_STOP_STEP_TIMEOUT,
            child: None,
        }
    }

    /// Overrides how long each stop step waits.
    pub fn with_stop_step_timeout(mut self, timeout: Duration) -> Self {
        self.stop_step_timeout = timeout;
        self
    }

    /// Makes sure hyperkit, the kernel and the initrd exist locally.
    ///
    /// A bundled hyperkit is always extracted so that it takes precedence over one on the `PATH`.
    pub async fn ensure_components(&self) -> FunserverResult<PathBuf> {
        if self.cache.is_bundled(Component::Hypervisor) {
            self.cache.ensure_extracted(Component::Hypervisor).await?;
        }

        self.cache
            .ensure_extracted_to(Component::Kernel, &self.config.kernel_path)
            .await?;
        self.cache
            .ensure_extracted_to(Component::Initrd, &self.config.initrd_path)
            .await?;

        self.cache.require(Component::Hypervisor)
    }

    /// Creates the sparse data disk image if it does not exist.
    async fn ensure_disk_image(&self) -> FunserverResult<()> {
        let disk = self.config.disk_image();
        if fs::metadata(&disk).await.is_ok() {
            return Ok(());
        }

        let file = fs::File::create(&disk).await?;
        file.set_len(u64::from(self.config.disk_gb) * 1024 * 1024 * 1024)
            .await?;

        tracing::info!(
            "created {}GB disk image at {}",
            self.config.disk_gb,
            disk.display()
        );
        Ok(())
    }

    /// Whether `pid` is still alive, reaping it first if it is our own child.
    fn is_alive(&mut self, pid: u32) -> bool {
        if let Some(child) = self.child.as_mut() {
            if child.id() == Some(pid) {
                return matches!(child.try_wait(), Ok(None));
            }
        }

        is_process_alive(pid)
    }

    async fn wait_for_exit(&mut self, pid: u32, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.is_alive(pid) {
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(LIVENESS_POLL_INTERVAL).await;
        }
    }

    async fn cleanup(&mut self) {
        self.child = None;
        if let Err(e) = self.vm.remove_pid_file().await {
            tracing::warn!("failed to remove {}: {}", self.vm.pid_file().display(), e);
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Backend for HyperkitBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::HyperkitVm
    }

    async fn start(&mut self, cancel: &CancellationToken) -> FunserverResult<ControlAddress> {
        if let Some(pid) = self.vm.running_pid().await {
            tracing::info!("{} is already running (PID {})", self.config.name, pid);
            return Ok(self.control_address());
        }

        let hyperkit = self.ensure_components().await?;
        fs::create_dir_all(&self.config.state_dir).await?;
        self.vm.remove_pid_file().await?;
        self.ensure_disk_image().await?;

        let console = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.config.console_log())?;

        let args = hyperkit_args(&self.config);
        tracing::info!("booting {}: {} {}", self.config.name, hyperkit.display(), args.join(" "));

        let mut command = Command::new(&hyperkit);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(console.try_clone()?))
            .stderr(Stdio::from(console));

        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let child = command.spawn().map_err(|e| {
            FunserverError::process(HYPERVISOR_PROCESS, format!("failed to spawn: {e}"))
        })?;
        tracing::info!(
            "started {} with PID {}",
            HYPERVISOR_PROCESS,
            child.id().unwrap_or(0)
        );
        self.child = Some(child);

        let vm = self.vm.clone();
        let pid_written = poll_until(
            "waiting for the hyperkit PID file",
            self.readiness_timeout,
            LIVENESS_POLL_INTERVAL,
            cancel,
            || {
                let vm = vm.clone();
                async move { vm.is_running().await }
            },
        )
        .await;

        let result = match pid_written {
            Ok(true) => wait_for_ready(&self.control_address(), self.readiness_timeout, cancel)
                .await
                .map(|_| ()),
            Ok(false) => Err(FunserverError::process(
                HYPERVISOR_PROCESS,
                format!(
                    "did not come up within {:?}, see {}",
                    self.readiness_timeout,
                    self.config.console_log().display()
                ),
            )),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            tracing::error!("failed to boot {}: {}", self.config.name, e);
            if let Err(stop_err) = self.stop(&CancellationToken::new()).await {
                tracing::warn!("failed to stop {} after a failed boot: {}", self.config.name, stop_err);
            }
            return Err(e);
        }

        Ok(self.control_address())
    }

    async fn stop(&mut self, cancel: &CancellationToken) -> FunserverResult<StopOutcome> {
        let pid = match (self.vm.read_pid().await, self.child.as_ref().and_then(|c| c.id())) {
            (Ok(Some(pid)), _) => pid,
            (_, Some(pid)) => pid,
            (Err(e), None) => {
                tracing::warn!("ignoring unreadable PID file: {}", e);
                self.cleanup().await;
                return Ok(StopOutcome::AlreadyStopped);
            }
            (Ok(None), None) => return Ok(StopOutcome::AlreadyStopped),
        };

        if !self.is_alive(pid) {
            tracing::info!("{} (PID {}) had already exited", self.config.name, pid);
            self.cleanup().await;
            return Ok(StopOutcome::AlreadyStopped);
        }

        let ladder: &[ProcessSignal] = if cancel.is_cancelled() {
            &[ProcessSignal::Kill]
        } else {
            &SHUTDOWN_ESCALATION
        };

        for (step, signal) in ladder.iter().copied().enumerate() {
            tracing::info!("sending {} to {} (PID {})", signal, self.config.name, pid);
            if send_signal(pid, signal)? == SignalDelivery::NoSuchProcess
                || self.wait_for_exit(pid, self.stop_step_timeout).await
            {
                self.cleanup().await;
                return Ok(match step {
                    0 if signal == ProcessSignal::Interrupt => StopOutcome::Graceful,
                    _ => StopOutcome::Escalated {
                        signal,
                        grace: self.stop_step_timeout * step as u32,
                    },
                });
            }

            tracing::warn!(
                "{} did not exit within {:?} of {}",
                self.config.name,
                self.stop_step_timeout,
                signal
            );
        }

        Err(FunserverError::process(
            HYPERVISOR_PROCESS,
            format!("PID {pid} survived SIGKILL"),
        ))
    }

    async fn status(&mut self) -> BackendStatus {
        match self.vm.read_pid().await {
            Ok(Some(pid)) if self.is_alive(pid) => BackendStatus::Running,
            _ => BackendStatus::Stopped,
        }
    }

    fn control_address(&self) -> ControlAddress {
        ControlAddress::UnixSocket(self.config.engine_socket())
    }

    fn log_file(&self) -> Option<PathBuf> {
        Some(self.config.console_log())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds the hyperkit argument vector for `config`.
pub fn hyperkit_args(config: &LinuxKitVmConfig) -> Vec<String> {
    vec![
        "-A".to_string(),
        "-u".to_string(),
        "-F".to_string(),
        config.pid_file().display().to_string(),
        "-m".to_string(),
        format!("{}M", config.memory_mb),
        "-c".to_string(),
        config.cpus.to_string(),
        "-s".to_string(),
        "0:0,hostbridge".to_string(),
        "-s".to_string(),
        "31,lpc".to_string(),
        "-s".to_string(),
        format!("2:0,virtio-blk,file://{},format=raw", config.disk_image().display()),
        "-s".to_string(),
        format!(
            "3,virtio-sock,guest_cid={},path={},guest_forwards={}",
            config.guest_cid,
            config.state_dir.display(),
            config.vsock_port
        ),
        "-s".to_string(),
        "4,virtio-rnd".to_string(),
        "-l".to_string(),
        "com1,stdio".to_string(),
        "-f".to_string(),
        format!(
            "kexec,{},{},{}",
            config.kernel_path.display(),
            config.initrd_path.display(),
            KERNEL_CMDLINE
        ),
    ]
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::HostOs;
    use tempfile::TempDir;

    fn backend(temp_dir: &TempDir) -> HyperkitBackend {
        let cache = Arc::new(BinaryCache::new(
            temp_dir.path().join("cache"),
            temp_dir.path().join("bundle"),
            HostOs::MacOs,
        ));
        HyperkitBackend::new(
            LinuxKitVmConfig::with_home(temp_dir.path()),
            cache,
            Duration::from_secs(2),
        )
        .with_stop_step_timeout(Duration::from_millis(500))
    }

    /// Installs a bundled kernel, initrd and a hyperkit stand-in that records its PID in the
    /// `-F` file. With `serve_socket` it also creates the engine socket and removes it again on
    /// interrupt.
    #[cfg(unix)]
    fn bundle_vm(temp_dir: &TempDir, serve_socket: bool) -> anyhow::Result<HyperkitBackend> {
        use std::os::unix::fs::PermissionsExt;

        let mut config = LinuxKitVmConfig::with_home(temp_dir.path());
        config.disk_gb = 1;
        let socket = config.engine_socket();

        let cache = BinaryCache::new(
            temp_dir.path().join("cache"),
            temp_dir.path().join("bundle"),
            HostOs::MacOs,
        )
        .with_search_path(temp_dir.path().join("empty"));

        let serve = if serve_socket {
            format!("touch '{}'", socket.display())
        } else {
            ":".to_string()
        };
        let script = format!(
            "#!/bin/sh\n\
             while [ $# -gt 0 ]; do\n\
               if [ \"$1\" = -F ]; then pid_file=\"$2\"; fi\n\
               shift\n\
             done\n\
             trap 'rm -f \"{socket}\"; exit 0' INT TERM\n\
             echo $$ > \"$pid_file\"\n\
             {serve}\n\
             while true; do sleep 0.1; done\n",
            socket = socket.display(),
        );

        for component in [Component::Hypervisor, Component::Kernel, Component::Initrd] {
            let path = cache.bundled_path(component);
            std::fs::create_dir_all(path.parent().unwrap())?;
            match component {
                Component::Hypervisor => std::fs::write(&path, &script)?,
                _ => std::fs::write(&path, component.name())?,
            }
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        }

        Ok(HyperkitBackend::new(config, Arc::new(cache), Duration::from_secs(1))
            .with_stop_step_timeout(Duration::from_millis(500)))
    }

    #[test]
    fn test_hyperkit_args() {
        let config = LinuxKitVmConfig::with_home("/Users/fun/.fun");
        let args = hyperkit_args(&config);

        assert_eq!(&args[..6], &["-A", "-u", "-F", "/Users/fun/.fun/linuxkit/state/hyperkit.pid", "-m", "1024M"]);
        assert!(args.contains(&"2:0,virtio-blk,file:///Users/fun/.fun/linuxkit/state/disk.img,format=raw".to_string()));
        assert!(args.contains(
            &"3,virtio-sock,guest_cid=3,path=/Users/fun/.fun/linuxkit/state,guest_forwards=1024".to_string()
        ));
        assert_eq!(
            args.last().unwrap(),
            "kexec,/Users/fun/.fun/linuxkit/kernel,/Users/fun/.fun/linuxkit/initrd.img,console=ttyS0"
        );
    }

    #[tokio::test]
    async fn test_stop_without_pid_file_is_a_no_op() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let mut backend = backend(&temp_dir);

        assert_eq!(
            backend.stop(&CancellationToken::new()).await?,
            StopOutcome::AlreadyStopped
        );
        assert_eq!(backend.status().await, BackendStatus::Stopped);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_with_stale_pid_file_cleans_up() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let mut backend = backend(&temp_dir);

        let mut exited = Command::new("true").spawn()?;
        let pid = exited.id().unwrap();
        exited.wait().await?;
        backend.vm.write_pid(pid).await?;

        assert_eq!(
            backend.stop(&CancellationToken::new()).await?,
            StopOutcome::AlreadyStopped
        );
        assert!(!backend.vm.pid_file().exists());
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_escalates_when_interrupt_is_ignored() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let mut backend = backend(&temp_dir);

        let child = Command::new("sh")
            .args(["-c", "trap '' INT; while true; do sleep 0.1; done"])
            .kill_on_drop(true)
            .spawn()?;
        let pid = child.id().unwrap();
        backend.vm.write_pid(pid).await?;
        backend.child = Some(child);

        // Give the shell time to install its trap
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(backend.status().await, BackendStatus::Running);

        let outcome = backend.stop(&CancellationToken::new()).await?;
        assert_eq!(
            outcome,
            StopOutcome::Escalated {
                signal: ProcessSignal::Terminate,
                grace: Duration::from_millis(500),
            }
        );
        assert!(outcome.escalation("hyperkit").is_some());
        assert!(!backend.vm.pid_file().exists());
        assert_eq!(backend.status().await, BackendStatus::Stopped);
        Ok(())
    }

    #[cfg(unix)]
    #[test_log::test(tokio::test)]
    async fn test_start_boots_vm_and_stops_it_gracefully() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let mut backend = bundle_vm(&temp_dir, true)?;
        let socket = backend.config.engine_socket();

        let address = backend.start(&CancellationToken::new()).await?;
        assert_eq!(address, ControlAddress::UnixSocket(socket.clone()));
        assert_eq!(backend.status().await, BackendStatus::Running);
        assert!(backend.config.disk_image().is_file());

        let pid = backend.vm.read_pid().await?;
        assert!(pid.is_some());

        // A second start finds the VM through its PID file and leaves it alone
        assert_eq!(backend.start(&CancellationToken::new()).await?, address);
        assert_eq!(backend.vm.read_pid().await?, pid);

        assert_eq!(
            backend.stop(&CancellationToken::new()).await?,
            StopOutcome::Graceful
        );
        assert!(!backend.vm.pid_file().exists());
        assert!(!socket.exists());
        assert_eq!(backend.status().await, BackendStatus::Stopped);
        Ok(())
    }

    #[cfg(unix)]
    #[test_log::test(tokio::test)]
    async fn test_vm_without_engine_socket_is_stopped_after_timeout() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let mut backend = bundle_vm(&temp_dir, false)?;

        let err = backend.start(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, FunserverError::ReadinessTimeout { .. }));
        assert!(!backend.vm.pid_file().exists());
        assert!(backend.child.is_none());
        assert_eq!(backend.status().await, BackendStatus::Stopped);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bundled_hyperkit_wins_over_path() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new()?;
        let path_dir = temp_dir.path().join("path");
        std::fs::create_dir_all(&path_dir)?;
        let on_path = path_dir.join("hyperkit");
        std::fs::write(&on_path, "#!/bin/sh\n")?;
        std::fs::set_permissions(&on_path, std::fs::Permissions::from_mode(0o755))?;

        let bundled = bundle_vm(&temp_dir, true)?;
        let cache = Arc::new(
            BinaryCache::new(
                temp_dir.path().join("cache"),
                temp_dir.path().join("bundle"),
                HostOs::MacOs,
            )
            .with_search_path(&path_dir),
        );
        assert_eq!(cache.resolve(Component::Hypervisor), Some(on_path));

        let backend = HyperkitBackend::new(bundled.config.clone(), cache.clone(), Duration::from_secs(1));
        let hyperkit = backend.ensure_components().await?;

        assert_eq!(hyperkit, cache.cached_path(Component::Hypervisor));
        assert!(backend.config.kernel_path.is_file());
        assert!(backend.config.initrd_path.is_file());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_hyperkit_is_reported_as_provisioning_error() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let cache = Arc::new(
            BinaryCache::new(
                temp_dir.path().join("cache"),
                temp_dir.path().join("bundle"),
                HostOs::MacOs,
            )
            .with_search_path(temp_dir.path().join("empty")),
        );
        let mut backend = HyperkitBackend::new(
            LinuxKitVmConfig::with_home(temp_dir.path()),
            cache,
            Duration::from_secs(1),
        );

        let err = backend.start(&CancellationToken::new()).await.unwrap_err();
        assert!(err.is_provisioning());
        assert!(err.to_string().contains("hyperkit"));
        Ok(())
    }
}
