use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use funserver_utils::{windows_to_wsl_path, GUEST_ENGINE_SOCKET};
use futures::StreamExt;
use tokio::{fs, io::AsyncWriteExt, process::Child, task::JoinHandle};
use tokio_util::sync::CancellationToken;

#[cfg(feature = "cli-viz")]
use crate::utils::viz;
use crate::{
    address::ControlAddress,
    config::{WslConfig, WSL_GUEST_MOUNT_POINT},
    platform::CapabilityProbe,
    readiness::poll_until,
    utils::{args, CommandOutput, CommandRunner},
    FunserverError, FunserverResult,
};

use super::{Backend, BackendKind, BackendStatus, StopOutcome};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The WSL command line tool.
pub const WSL_EXE: &str = "wsl.exe";

/// Where WSL installation is documented.
pub const WSL_DOCS_URL: &str = "https://docs.microsoft.com/en-us/windows/wsl/install";

/// Engine configuration file inside the distribution.
pub const GUEST_ENGINE_CONFIG_PATH: &str = "/etc/containerd/config.toml";

/// Engine configuration written into a fresh distribution.
pub const MINIMAL_ENGINE_CONFIG: &str = r#"[plugins]
  [plugins."io.containerd.grpc.v1.cri"]
    sandbox_image = "k8s.gcr.io/pause:3.6"
"#;

/// How long a distribution gets to boot.
const DISTRIBUTION_START_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the guest is polled. Every poll is a `wsl.exe` round trip.
const GUEST_POLL_INTERVAL: Duration = Duration::from_millis(500);

const BRIDGE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runs the engine inside a dedicated WSL2 distribution.
pub struct WslBackend {
    config: WslConfig,
    probe: Arc<dyn CapabilityProbe>,
    runner: Arc<dyn CommandRunner>,
    readiness_timeout: Duration,
    keepalive: Option<Child>,
    engine: Option<Child>,
    bridge: Option<SocketBridge>,
}

/// Relays a host named pipe to the engine socket inside the distribution.
///
/// Each pipe client gets its own `socat` process inside the guest, connected to the engine
/// socket. The bridge is owned by the backend and terminated when it stops.
pub struct SocketBridge {
    pipe: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl WslBackend {
    /// Creates an unstarted WSL backend.
    pub fn new(
        config: WslConfig,
        probe: Arc<dyn CapabilityProbe>,
        runner: Arc<dyn CommandRunner>,
        readiness_timeout: Duration,
    ) -> Self {
        Self {
            config,
            probe,
            runner,
            readiness_timeout,
            keepalive: None,
            engine: None,
            bridge: None,
        }
    }

    /// Fails with a prerequisite error unless WSL2 is installed and the default generation.
    pub async fn check_available(&self) -> FunserverResult<()> {
        let status = self.probe.wsl().await;
        if status.is_available() {
            return Ok(());
        }

        let reason = if status.installed {
            "WSL is installed but WSL 2 is not the default version".to_string()
        } else {
            format!("WSL is not installed ({})", status.detail)
        };

        Err(FunserverError::Prerequisite {
            capability: "WSL2".to_string(),
            reason: reason.clone(),
            remediation: prerequisite_instructions(&[reason]),
        })
    }

    /// Returns `true` if the distribution has been imported.
    pub async fn distribution_exists(&self) -> FunserverResult<bool> {
        let output = self
            .runner
            .output(WSL_EXE, &args(["--list", "--quiet"]))
            .await?
            .check("wsl --list")?;

        Ok(output
            .stdout
            .lines()
            .any(|line| line.trim().eq_ignore_ascii_case(&self.config.distribution)))
    }

    /// Imports the distribution if it does not exist yet.
    pub async fn provision(&self, cancel: &CancellationToken) -> FunserverResult<()> {
        if self.distribution_exists().await? {
            tracing::debug!("WSL distribution {} already exists", self.config.distribution);
            return Ok(());
        }

        tracing::info!(
            "creating WSL distribution {} in {}",
            self.config.distribution,
            self.config.install_dir.display()
        );

        fs::create_dir_all(&self.config.install_dir).await?;
        let rootfs = fetch_rootfs(&self.config.rootfs_url, &self.config.install_dir, cancel).await?;

        self.runner
            .output(
                WSL_EXE,
                &args([
                    "--import".to_string(),
                    self.config.distribution.clone(),
                    self.config.install_dir.display().to_string(),
                    rootfs.path().display().to_string(),
                    "--version".to_string(),
                    "2".to_string(),
                ]),
            )
            .await?
            .check("wsl --import")
            .map_err(|e| FunserverError::provisioning("WSL distribution", e))?;

        let resize = self
            .runner
            .output(
                WSL_EXE,
                &args([
                    "--manage".to_string(),
                    self.config.distribution.clone(),
                    "--resize".to_string(),
                    format!("{}GB", self.config.disk_gb),
                ]),
            )
            .await;
        if let Err(e) = resize.and_then(|output| output.check("wsl --manage --resize")) {
            tracing::warn!("could not resize the distribution's disk: {}", e);
        }

        tracing::info!("imported WSL distribution {}", self.config.distribution);
        Ok(())
    }

    /// Makes sure the engine (and `socat` when bridging) is installed inside the distribution,
    /// and that it has a configuration file.
    pub async fn ensure_engine_installed(&self) -> FunserverResult<()> {
        let mut packages = vec!["containerd"];
        if self.config.bridge {
            packages.push("socat");
        }

        let mut missing = vec![];
        for package in packages {
            let found = self
                .guest(&["sh", "-c", &format!("command -v {package}")])
                .await?;
            if !found.success || found.stdout.trim().is_empty() {
                missing.push(package);
            }
        }

        if !missing.is_empty() {
            tracing::info!(
                "installing {} in {}",
                missing.join(", "),
                self.config.distribution
            );

            let script = format!(
                "apt-get update && DEBIAN_FRONTEND=noninteractive apt-get install -y {}",
                missing.join(" ")
            );
            self.guest(&["sh", "-c", &script])
                .await?
                .check("installing the engine in WSL")
                .map_err(|e| FunserverError::provisioning("containerd in WSL", e))?;
        }

        let script = format!(
            "mkdir -p /etc/containerd && [ -f {path} ] || cat > {path} <<'FUN_EOF'\n{MINIMAL_ENGINE_CONFIG}FUN_EOF\n",
            path = GUEST_ENGINE_CONFIG_PATH,
        );
        self.guest(&["sh", "-c", &script])
            .await?
            .check("writing the engine configuration in WSL")?;

        Ok(())
    }

    async fn mount_shared_dir(&self) -> FunserverResult<()> {
        fs::create_dir_all(&self.config.mount_dir).await?;
        let source = windows_to_wsl_path(&self.config.mount_dir)?;

        let script = format!(
            "mkdir -p {target} && (mountpoint -q {target} || mount --bind '{source}' {target})",
            target = WSL_GUEST_MOUNT_POINT,
        );
        self.guest(&["sh", "-c", &script])
            .await?
            .check("mounting the shared directory in WSL")?;

        tracing::info!(
            "mounted {} at {} in {}",
            self.config.mount_dir.display(),
            WSL_GUEST_MOUNT_POINT,
            self.config.distribution
        );
        Ok(())
    }

    async fn guest(&self, command: &[&str]) -> FunserverResult<CommandOutput> {
        self.runner
            .output(WSL_EXE, &guest_args(&self.config.distribution, command))
            .await
    }

    async fn wait_for_guest(
        &self,
        what: &str,
        command: &[&str],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> FunserverResult<bool> {
        let runner = self.runner.clone();
        let command = guest_args(&self.config.distribution, command);
        poll_until(what, timeout, GUEST_POLL_INTERVAL, cancel, || {
            let runner = runner.clone();
            let command = command.clone();
            async move {
                runner
                    .output(WSL_EXE, &command)
                    .await
                    .map(|output| output.success)
                    .unwrap_or(false)
            }
        })
        .await
    }

    async fn start_engine(&mut self, cancel: &CancellationToken) -> FunserverResult<()> {
        self.mount_shared_dir().await?;
        self.ensure_engine_installed().await?;

        let distribution = self.config.distribution.clone();
        self.engine = Some(self.runner.spawn(
            WSL_EXE,
            &guest_args(
                &distribution,
                &[
                    "containerd",
                    "--address",
                    GUEST_ENGINE_SOCKET,
                    "--config",
                    GUEST_ENGINE_CONFIG_PATH,
                ],
            ),
        )?);

        let ready = self
            .wait_for_guest(
                &format!("waiting for the engine in {distribution}"),
                &["test", "-S", GUEST_ENGINE_SOCKET],
                self.readiness_timeout,
                cancel,
            )
            .await?;
        if !ready {
            return Err(FunserverError::ReadinessTimeout {
                address: ControlAddress::WslVirtual {
                    distribution,
                    socket: GUEST_ENGINE_SOCKET.to_string(),
                },
                timeout: self.readiness_timeout,
            });
        }

        tracing::info!("engine is running in {}", distribution);

        if self.config.bridge {
            self.bridge = Some(SocketBridge::spawn(
                self.config.bridge_pipe(std::process::id()),
                distribution,
                GUEST_ENGINE_SOCKET.to_string(),
            )?);
        }

        Ok(())
    }

    async fn release_processes(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.terminate().await;
        }

        for (name, child) in [("engine", self.engine.take()), ("keep-alive", self.keepalive.take())] {
            if let Some(mut child) = child {
                if let Err(e) = child.kill().await {
                    tracing::warn!("failed to stop the WSL {} process: {}", name, e);
                }
            }
        }
    }
}

impl SocketBridge {
    /// Starts relaying `pipe` on the host to `socket` inside `distribution`.
    pub fn spawn(pipe: String, distribution: String, socket: String) -> FunserverResult<Self> {
        #[cfg(not(windows))]
        {
            let _ = (distribution, socket);
            Err(FunserverError::Config(format!(
                "cannot bridge to {pipe}: named pipes only exist on Windows"
            )))
        }

        #[cfg(windows)]
        {
            let server = tokio::net::windows::named_pipe::ServerOptions::new()
                .first_pipe_instance(true)
                .create(&pipe)?;

            let cancel = CancellationToken::new();
            let task = tokio::spawn(serve_bridge(
                server,
                pipe.clone(),
                distribution,
                socket,
                cancel.clone(),
            ));

            tracing::info!("bridging {} to the engine in WSL", pipe);
            Ok(Self { pipe, cancel, task })
        }
    }

    /// Stops accepting connections and tears down every relay.
    pub async fn terminate(self) {
        self.cancel.cancel();
        let mut task = self.task;
        if tokio::time::timeout(BRIDGE_SHUTDOWN_TIMEOUT, &mut task)
            .await
            .is_err()
        {
            tracing::warn!("bridge on {} did not shut down, aborting it", self.pipe);
            task.abort();
        }

        tracing::info!("closed bridge on {}", self.pipe);
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Backend for WslBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Wsl
    }

    async fn start(&mut self, cancel: &CancellationToken) -> FunserverResult<ControlAddress> {
        if self.status().await == BackendStatus::Running {
            return Ok(self.control_address());
        }

        self.check_available().await?;
        self.provision(cancel).await?;
        ensure_wslconfig(&self.config).await?;

        let distribution = self.config.distribution.clone();
        self.keepalive = Some(
            self.runner
                .spawn(WSL_EXE, &guest_args(&distribution, &["sleep", "infinity"]))?,
        );

        let started = self
            .wait_for_guest(
                &format!("starting {distribution}"),
                &["true"],
                DISTRIBUTION_START_TIMEOUT,
                cancel,
            )
            .await;
        match started {
            Ok(true) => {}
            Ok(false) => {
                self.release_processes().await;
                return Err(FunserverError::process(
                    WSL_EXE,
                    format!("distribution {distribution} did not start within {DISTRIBUTION_START_TIMEOUT:?}"),
                ));
            }
            Err(e) => {
                self.release_processes().await;
                return Err(e);
            }
        }

        let result = self.start_engine(cancel).await;
        if let Err(e) = result {
            tracing::error!("failed to start the engine in {}: {}", distribution, e);
            self.release_processes().await;
            return Err(e);
        }

        Ok(self.control_address())
    }

    async fn stop(&mut self, _cancel: &CancellationToken) -> FunserverResult<StopOutcome> {
        if self.keepalive.is_none() && self.engine.is_none() && self.bridge.is_none() {
            return Ok(StopOutcome::AlreadyStopped);
        }

        tracing::info!("stopping WSL distribution {}", self.config.distribution);
        self.release_processes().await;

        let terminate = self
            .runner
            .output(
                WSL_EXE,
                &args(["--terminate".to_string(), self.config.distribution.clone()]),
            )
            .await;
        if let Err(e) = terminate.and_then(|output| output.check("wsl --terminate")) {
            tracing::warn!("failed to terminate {}: {}", self.config.distribution, e);
        }

        Ok(StopOutcome::Graceful)
    }

    async fn status(&mut self) -> BackendStatus {
        match self.keepalive.as_mut().map(|child| child.try_wait()) {
            Some(Ok(None)) if self.engine.is_some() => BackendStatus::Running,
            _ => BackendStatus::Stopped,
        }
    }

    fn control_address(&self) -> ControlAddress {
        if self.config.bridge {
            ControlAddress::NamedPipe(self.config.bridge_pipe(std::process::id()))
        } else {
            ControlAddress::WslVirtual {
                distribution: self.config.distribution.clone(),
                socket: GUEST_ENGINE_SOCKET.to_string(),
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Checks the Windows prerequisites of the WSL backend.
///
/// Returns a description of every missing item. An empty list means everything is in place.
pub async fn check_prerequisites(
    probe: &dyn CapabilityProbe,
    runner: &dyn CommandRunner,
) -> Vec<String> {
    let mut missing = vec![];

    if !probe.wsl().await.is_available() {
        missing.push("WSL 2 is not installed or not the default version".to_string());
    }

    let hypervisor = runner
        .output(
            "powershell.exe",
            &args([
                "-NoProfile",
                "-Command",
                "(Get-CimInstance Win32_ComputerSystem).HypervisorPresent",
            ]),
        )
        .await;
    match hypervisor {
        Ok(output) if output.success && output.stdout.trim().eq_ignore_ascii_case("true") => {}
        _ => missing.push("virtualization (Hyper-V platform) is not enabled".to_string()),
    }

    let version = runner
        .output(
            "powershell.exe",
            &args([
                "-NoProfile",
                "-Command",
                "[Environment]::OSVersion.Version.Major",
            ]),
        )
        .await;
    match version.map(|output| output.stdout.trim().parse::<u32>()) {
        Ok(Ok(major)) if major >= 10 => {}
        _ => missing.push("Windows 10 or later is required".to_string()),
    }

    missing
}

/// Remediation steps for the missing prerequisites.
pub fn prerequisite_instructions(missing: &[String]) -> String {
    let mut text = String::from("The WSL2 backend needs the following:\n");
    for item in missing {
        text.push_str(&format!("  - {item}\n"));
    }

    text.push_str(&format!(
        "\nTo fix this:\n\
         1. Open PowerShell as Administrator and run: wsl --install\n\
         2. Restart your computer\n\
         3. Run: wsl --set-default-version 2\n\
         \nSee {WSL_DOCS_URL} for details.\n"
    ));

    text
}

/// Renders the `[wsl2]` section for `config`.
pub fn wslconfig_section(config: &WslConfig) -> String {
    let mut section = format!(
        "[wsl2]\nmemory={}MB\nprocessors={}\nswap={}MB\n",
        config.memory_mb, config.cpus, config.swap_mb
    );

    if let Some(kernel) = &config.kernel {
        section.push_str(&format!(
            "kernel={}\n",
            kernel.display().to_string().replace('\\', "\\\\")
        ));
    }

    section
}

/// Replaces the `[wsl2]` section of an existing `.wslconfig`, keeping every other section.
pub fn merge_wslconfig(existing: &str, config: &WslConfig) -> String {
    let mut merged = String::new();
    let mut in_wsl2 = false;
    let mut replaced = false;

    for line in existing.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            in_wsl2 = trimmed.eq_ignore_ascii_case("[wsl2]");
            if in_wsl2 && !replaced {
                merged.push_str(&wslconfig_section(config));
                replaced = true;
            }
        }

        if !in_wsl2 {
            merged.push_str(line);
            merged.push('\n');
        }
    }

    if !replaced {
        if !merged.is_empty() && !merged.ends_with("\n\n") {
            merged.push('\n');
        }
        merged.push_str(&wslconfig_section(config));
    }

    merged
}

/// Writes the `[wsl2]` section into the host resource file if it changed.
pub async fn ensure_wslconfig(config: &WslConfig) -> FunserverResult<()> {
    let existing = match fs::read_to_string(&config.wslconfig_path).await {
        Ok(existing) => existing,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let merged = merge_wslconfig(&existing, config);
    if merged == existing {
        return Ok(());
    }

    if let Some(parent) = config.wslconfig_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    fs::write(&config.wslconfig_path, merged).await?;
    tracing::info!(
        "updated WSL resource limits in {}",
        config.wslconfig_path.display()
    );
    tracing::warn!("restart WSL (wsl --shutdown) for new resource limits to take effect");
    Ok(())
}

fn guest_args(distribution: &str, command: &[&str]) -> Vec<String> {
    let mut args = args(["--distribution", distribution, "--"]);
    args.extend(command.iter().map(|s| s.to_string()));
    args
}

/// Makes the root filesystem tarball available locally.
///
/// URLs are downloaded into a temporary file in `dir` that is removed when dropped. Anything
/// else is taken to be a local file and copied the same way.
async fn fetch_rootfs(
    source: &str,
    dir: &Path,
    cancel: &CancellationToken,
) -> FunserverResult<tempfile::NamedTempFile> {
    let temp = tempfile::Builder::new()
        .prefix("rootfs-")
        .suffix(".tar.xz")
        .tempfile_in(dir)?;

    if !(source.starts_with("http://") || source.starts_with("https://")) {
        fs::copy(source, temp.path())
            .await
            .map_err(|e| FunserverError::provisioning(format!("rootfs {source}"), e))?;
        return Ok(temp);
    }

    tracing::info!("downloading rootfs from {}", source);
    let response = reqwest::get(source).await?.error_for_status()?;

    #[cfg(feature = "cli-viz")]
    let pb = viz::create_download_bar("rootfs".to_string(), response.content_length());

    let mut file = fs::File::from_std(temp.reopen()?);
    let mut stream = response.bytes_stream();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(FunserverError::Cancelled("rootfs download".to_string()));
            }
            chunk = stream.next() => chunk,
        };

        let Some(chunk) = chunk else { break };
        let chunk = chunk?;
        file.write_all(&chunk).await?;

        #[cfg(feature = "cli-viz")]
        pb.inc(chunk.len() as u64);
    }

    file.flush().await?;

    #[cfg(feature = "cli-viz")]
    pb.finish_and_clear();

    tracing::info!("downloaded rootfs to {}", temp.path().display());
    Ok(temp)
}

#[cfg(windows)]
async fn serve_bridge(
    mut server: tokio::net::windows::named_pipe::NamedPipeServer,
    pipe: String,
    distribution: String,
    socket: String,
    cancel: CancellationToken,
) {
    use std::process::Stdio;
    use tokio::{net::windows::named_pipe::ServerOptions, process::Command};

    let relay_args = guest_args(
        &distribution,
        &["socat", "STDIO", &format!("UNIX-CONNECT:{socket}")],
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            connected = server.connect() => {
                if let Err(e) = connected {
                    tracing::warn!("bridge on {} failed to accept: {}", pipe, e);
                    return;
                }
            }
        }

        let client = server;
        server = match ServerOptions::new().create(&pipe) {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!("bridge on {} failed to listen: {}", pipe, e);
                return;
            }
        };

        let relay = Command::new(WSL_EXE)
            .args(&relay_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let mut relay = match relay {
            Ok(relay) => relay,
            Err(e) => {
                tracing::warn!("failed to start bridge relay: {}", e);
                continue;
            }
        };

        let cancel = cancel.clone();
        tokio::spawn(async move {
            let (Some(mut to_guest), Some(mut from_guest)) = (relay.stdin.take(), relay.stdout.take())
            else {
                return;
            };

            let (mut client_read, mut client_write) = tokio::io::split(client);
            let relay_io = async {
                tokio::try_join!(
                    tokio::io::copy(&mut client_read, &mut to_guest),
                    tokio::io::copy(&mut from_guest, &mut client_write),
                )
            };

            tokio::select! {
                _ = cancel.cancelled() => {}
                result = relay_io => {
                    if let Err(e) = result {
                        tracing::debug!("bridge connection closed: {}", e);
                    }
                }
            }

            let _ = relay.kill().await;
        });
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::WslStatus;

    #[test]
    fn test_merge_replaces_only_the_wsl2_section() {
        let mut config = WslConfig::with_home("/home/fun/.fun");
        config.kernel = Some(r"C:\kernels\bzImage".into());

        let existing = "[user]\ndefault=fun\n\n[wsl2]\nmemory=1GB\nlocalhostForwarding=true\n\n[experimental]\nsparseVhd=true\n";
        let merged = merge_wslconfig(existing, &config);

        assert_eq!(
            merged,
            "[user]\ndefault=fun\n\n[wsl2]\nmemory=4096MB\nprocessors=2\nswap=2048MB\nkernel=C:\\\\kernels\\\\bzImage\n[experimental]\nsparseVhd=true\n"
        );
        assert_eq!(merge_wslconfig(&merged, &config), merged);
    }

    #[test]
    fn test_merge_appends_missing_section() {
        let config = WslConfig::with_home("/home/fun/.fun");

        assert_eq!(
            merge_wslconfig("", &config),
            "[wsl2]\nmemory=4096MB\nprocessors=2\nswap=2048MB\n"
        );
        assert_eq!(
            merge_wslconfig("[user]\ndefault=fun\n", &config),
            "[user]\ndefault=fun\n\n[wsl2]\nmemory=4096MB\nprocessors=2\nswap=2048MB\n"
        );
    }

    #[test]
    fn test_instructions_list_missing_items() {
        let text = prerequisite_instructions(&["WSL 2 is not installed".to_string()]);
        assert!(text.contains("  - WSL 2 is not installed"));
        assert!(text.contains("wsl --install"));
        assert!(text.contains("wsl --set-default-version 2"));
        assert!(text.contains(WSL_DOCS_URL));
    }

    #[test]
    fn test_guest_args_target_the_distribution() {
        assert_eq!(
            guest_args("wsl-fun", &["test", "-S", GUEST_ENGINE_SOCKET]),
            vec![
                "--distribution",
                "wsl-fun",
                "--",
                "test",
                "-S",
                "/run/containerd/containerd.sock"
            ]
        );
    }

    #[cfg(unix)]
    mod scripted {
        use std::sync::Mutex;

        use tempfile::TempDir;

        use super::*;

        struct FakeProbe(WslStatus);

        #[async_trait]
        impl CapabilityProbe for FakeProbe {
            async fn wsl(&self) -> WslStatus {
                self.0.clone()
            }

            async fn hyperkit_available(&self) -> bool {
                false
            }

            async fn native_available(&self) -> bool {
                true
            }
        }

        /// Answers `wsl.exe` invocations from a script of known commands and records them.
        struct FakeWsl {
            distributions: Mutex<Vec<String>>,
            engine_installed: Mutex<bool>,
            calls: Mutex<Vec<String>>,
        }

        impl FakeWsl {
            fn new(distributions: &[&str], engine_installed: bool) -> Self {
                Self {
                    distributions: Mutex::new(distributions.iter().map(|d| d.to_string()).collect()),
                    engine_installed: Mutex::new(engine_installed),
                    calls: Mutex::new(vec![]),
                }
            }

            fn calls(&self) -> Vec<String> {
                self.calls.lock().unwrap().clone()
            }

            fn called(&self, needle: &str) -> bool {
                self.calls().iter().any(|call| call.contains(needle))
            }
        }

        #[async_trait]
        impl CommandRunner for FakeWsl {
            async fn output(
                &self,
                program: &str,
                args: &[String],
            ) -> FunserverResult<CommandOutput> {
                let call = format!("{} {}", program, args.join(" "));
                self.calls.lock().unwrap().push(call.clone());

                let ok = |stdout: &str| CommandOutput {
                    success: true,
                    code: Some(0),
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                };

                if call.contains("--list --quiet") {
                    return Ok(ok(&self.distributions.lock().unwrap().join("\r\n")));
                }

                if call.contains("--import") {
                    self.distributions.lock().unwrap().push(args[1].clone());
                    return Ok(ok(""));
                }

                if call.contains("command -v containerd") {
                    let installed = *self.engine_installed.lock().unwrap();
                    return Ok(CommandOutput {
                        success: installed,
                        code: Some(if installed { 0 } else { 1 }),
                        stdout: if installed { "/usr/bin/containerd\n".to_string() } else { String::new() },
                        stderr: String::new(),
                    });
                }

                if call.contains("apt-get install") {
                    *self.engine_installed.lock().unwrap() = true;
                }

                Ok(ok(""))
            }

            fn spawn(&self, program: &str, args: &[String]) -> FunserverResult<Child> {
                self.calls
                    .lock()
                    .unwrap()
                    .push(format!("spawn {} {}", program, args.join(" ")));

                Ok(tokio::process::Command::new("sleep")
                    .arg("30")
                    .kill_on_drop(true)
                    .spawn()?)
            }
        }

        fn config(temp_dir: &TempDir) -> WslConfig {
            let mut config = WslConfig::with_home(temp_dir.path());
            config.wslconfig_path = temp_dir.path().join(".wslconfig");
            config
        }

        fn available() -> Arc<FakeProbe> {
            Arc::new(FakeProbe(WslStatus {
                installed: true,
                wsl2: true,
                detail: String::new(),
            }))
        }

        #[test_log::test(tokio::test)]
        async fn test_start_with_existing_distribution() -> anyhow::Result<()> {
            let temp_dir = TempDir::new()?;
            let runner = Arc::new(FakeWsl::new(&["Ubuntu", "wsl-fun"], true));
            let mut backend = WslBackend::new(
                config(&temp_dir),
                available(),
                runner.clone(),
                Duration::from_secs(5),
            );

            let address = backend.start(&CancellationToken::new()).await?;
            assert_eq!(address.to_string(), "wsl://wsl-fun/run/containerd/containerd.sock");
            assert_eq!(backend.status().await, BackendStatus::Running);

            assert!(!runner.called("--import"));
            assert!(!runner.called("apt-get"));
            assert!(runner.called("spawn wsl.exe --distribution wsl-fun -- sleep infinity"));
            assert!(runner.called("mount --bind"));
            assert!(runner.called(
                "spawn wsl.exe --distribution wsl-fun -- containerd --address /run/containerd/containerd.sock"
            ));
            assert!(runner.called("test -S /run/containerd/containerd.sock"));

            let wslconfig = std::fs::read_to_string(temp_dir.path().join(".wslconfig"))?;
            assert!(wslconfig.contains("memory=4096MB"));

            assert_eq!(
                backend.stop(&CancellationToken::new()).await?,
                StopOutcome::Graceful
            );
            assert!(runner.called("wsl.exe --terminate wsl-fun"));
            assert_eq!(backend.status().await, BackendStatus::Stopped);
            assert_eq!(
                backend.stop(&CancellationToken::new()).await?,
                StopOutcome::AlreadyStopped
            );
            Ok(())
        }

        #[test_log::test(tokio::test)]
        async fn test_start_provisions_missing_distribution() -> anyhow::Result<()> {
            let temp_dir = TempDir::new()?;
            let rootfs = temp_dir.path().join("rootfs.tar.xz");
            std::fs::write(&rootfs, "rootfs")?;

            let mut config = config(&temp_dir);
            config.rootfs_url = rootfs.display().to_string();

            let runner = Arc::new(FakeWsl::new(&["Ubuntu"], false));
            let mut backend =
                WslBackend::new(config, available(), runner.clone(), Duration::from_secs(5));

            backend.start(&CancellationToken::new()).await?;

            assert!(runner.called("wsl.exe --import wsl-fun"));
            assert!(runner.called("--version 2"));
            assert!(runner.called("apt-get install -y containerd"));
            assert!(runner.called(GUEST_ENGINE_CONFIG_PATH));

            backend.stop(&CancellationToken::new()).await?;
            Ok(())
        }

        #[test_log::test(tokio::test)]
        async fn test_failed_bridge_releases_the_distribution() -> anyhow::Result<()> {
            let temp_dir = TempDir::new()?;
            let mut config = config(&temp_dir);
            config.bridge = true;

            let runner = Arc::new(FakeWsl::new(&["wsl-fun"], true));
            let mut backend =
                WslBackend::new(config, available(), runner.clone(), Duration::from_secs(5));

            let err = backend.start(&CancellationToken::new()).await.unwrap_err();

            assert!(matches!(err, FunserverError::Config(_)));
            assert!(err.to_string().contains("named pipes"));
            assert!(runner.called("apt-get install -y socat"));
            assert!(backend.bridge.is_none());
            assert!(backend.engine.is_none());
            assert!(backend.keepalive.is_none());
            assert_eq!(backend.status().await, BackendStatus::Stopped);
            assert_eq!(
                backend.stop(&CancellationToken::new()).await?,
                StopOutcome::AlreadyStopped
            );
            Ok(())
        }

        #[tokio::test]
        async fn test_unavailable_wsl_is_a_prerequisite_error() -> anyhow::Result<()> {
            let temp_dir = TempDir::new()?;
            let runner = Arc::new(FakeWsl::new(&[], false));
            let mut backend = WslBackend::new(
                config(&temp_dir),
                Arc::new(FakeProbe(WslStatus::default())),
                runner.clone(),
                Duration::from_secs(5),
            );

            let err = backend.start(&CancellationToken::new()).await.unwrap_err();
            assert!(err.is_prerequisite());
            assert!(err.to_string().contains("wsl --install"));
            assert!(runner.calls().is_empty());
            Ok(())
        }

        #[tokio::test]
        async fn test_prerequisites_report_each_missing_item() -> anyhow::Result<()> {
            let runner = FakeWsl::new(&[], false);
            let missing =
                check_prerequisites(&FakeProbe(WslStatus::default()), &runner).await;

            // The fake answers every powershell query with empty output
            assert_eq!(missing.len(), 3);
            assert!(missing[0].contains("WSL 2"));
            Ok(())
        }
    }
}
