use std::{path::PathBuf, sync::Arc};

use funserver_cli::{
    styles::{CHECKMARK, CROSS, WARNING},
    AnsiStyles, FunserverCliResult,
};
use funserver_core::{
    backend::{check_prerequisites, prerequisite_instructions, StopOutcome},
    client::EngineClient,
    config::{ManagerConfig, RunMode},
    linuxkit,
    manager::Manager,
    platform::{Capabilities, HostOs, SystemProbe},
    provision::{BinaryCache, Component},
    selector::select_backend,
    utils::{CommandRunner, SystemRunner},
};
use tokio_util::sync::CancellationToken;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const LINUXKIT_CONFIG_FILENAME: &str = "funserver.yml";
const LINUXKIT_BUILD_SUBDIR: &str = "build";

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// Starts the engine and keeps it running until `SIGINT` or `SIGTERM`.
///
/// A second signal while stopping cancels the stop, which kills the engine.
pub async fn run_subcommand(
    mut config: ManagerConfig,
    mode: Option<RunMode>,
    no_wsl: bool,
) -> FunserverCliResult<()> {
    if let Some(mode) = mode {
        config.run_mode = mode;
    }
    if no_wsl {
        config.wsl.enabled = false;
    }

    let manager = Manager::new(config);
    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    manager.start(&shutdown).await?;

    for notice in manager.notices().await {
        println!("{} {}", &*WARNING, notice);
    }
    println!("{} {}", &*CHECKMARK, manager.service_status().await);

    shutdown.cancelled().await;
    tracing::info!("shutdown requested");

    let stop_cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(stop_cancel.clone()));

    match manager.stop(&stop_cancel).await? {
        StopOutcome::Escalated { signal, grace } => println!(
            "{} engine did not stop within {:?}, sent {}",
            &*WARNING, grace, signal
        ),
        _ => println!("{} engine stopped", &*CHECKMARK),
    }

    Ok(())
}

/// Reports whether an engine answers at the configured client address.
pub async fn status_subcommand(config: ManagerConfig) -> FunserverCliResult<()> {
    let address = config.client_address.clone();
    println!("{} {}", "run mode:".header(), config.run_mode);
    println!("{} {}", "address:".header(), address.to_string().placeholder());

    match EngineClient::connect(address, config.namespace.clone()) {
        Ok(client) => match client.ping().await {
            Ok(()) => println!("{} engine is reachable", &*CHECKMARK),
            Err(e) => println!("{} {}", &*CROSS, e.to_string().error()),
        },
        Err(e) => println!("{} {}", &*CROSS, e.to_string().error()),
    }

    let cache = BinaryCache::from_env();
    match cache.engine_version().await {
        Ok(version) => println!("{} {}", "engine:".header(), version),
        Err(e) => println!("{} {}", "engine:".header(), e.to_string().error()),
    }

    Ok(())
}

/// Probes the host and prints the backend the manager would pick.
pub async fn doctor_subcommand(config: ManagerConfig) -> FunserverCliResult<()> {
    let os = HostOs::current();
    let cache = Arc::new(BinaryCache::from_env());
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::default());
    let probe = SystemProbe::new(cache.clone(), runner.clone());

    println!("{} {}", "host:".header(), os);
    println!("{} {}", "cache:".header(), cache.get_cache_dir().display());
    println!("{} {}", "bundle:".header(), cache.get_bundle_dir().display());

    let capabilities = Capabilities::probe(&probe, os, config.wsl.enabled).await;
    if os == HostOs::Windows {
        print_check("WSL2", capabilities.wsl.is_available(), &capabilities.wsl.detail);
    }
    if os == HostOs::MacOs {
        print_check("HyperKit", capabilities.hyperkit, "");
    }
    print_check("native engine", capabilities.native, "");

    println!("{}", "components:".header());
    for component in Component::ALL {
        match cache.resolve(component) {
            Some(path) => println!("  {} {} {}", &*CHECKMARK, component, path.display()),
            None => println!("  {} {} not found", &*CROSS, component),
        }
    }

    let mode = match config.run_mode {
        RunMode::Client => RunMode::Server,
        mode => mode,
    };
    match select_backend(mode, os, config.wsl.enabled, &capabilities) {
        Ok(Some(selection)) => {
            let fallback = selection
                .fallback
                .map(|kind| format!(", falling back to {kind}"))
                .unwrap_or_default();
            println!(
                "{} {}{}",
                "backend:".header(),
                selection.primary.to_string().literal(),
                fallback
            );
            for notice in selection.notices {
                println!("{} {}", &*WARNING, notice);
            }
        }
        Ok(None) => println!("{} none", "backend:".header()),
        Err(e) => println!("{} {}", "backend:".header(), e.to_string().error()),
    }

    if os == HostOs::Windows {
        let missing = check_prerequisites(&probe, runner.as_ref()).await;
        if !missing.is_empty() {
            println!("\n{}", prerequisite_instructions(&missing));
        }
    }

    Ok(())
}

/// Copies the bundled binaries into the cache, or empties it.
pub async fn extract_subcommand(clean: bool) -> FunserverCliResult<()> {
    let cache = BinaryCache::from_env();
    if clean {
        cache.clean().await?;
        println!("{} removed {}", &*CHECKMARK, cache.get_cache_dir().display());
        return Ok(());
    }

    cache.ensure_all_extracted().await?;
    println!(
        "{} binaries available in {}",
        &*CHECKMARK,
        cache.get_cache_dir().display()
    );
    Ok(())
}

/// Prints the embedded engine's log file.
pub async fn logs_subcommand(config: ManagerConfig) -> FunserverCliResult<()> {
    let manager = Manager::new(config);
    let mut stdout = tokio::io::stdout();
    manager.engine_logs(&mut stdout).await?;
    Ok(())
}

/// Writes the LinuxKit image definition, then optionally builds and installs it.
pub async fn linuxkit_config_subcommand(
    config: ManagerConfig,
    output: Option<PathBuf>,
    build: bool,
    install: bool,
) -> FunserverCliResult<()> {
    let vm = &config.linuxkit;
    let path = output.unwrap_or_else(|| vm.state_dir.join(LINUXKIT_CONFIG_FILENAME));

    linuxkit::generate_config(&path, vm).await?;
    println!("{} wrote {}", &*CHECKMARK, path.display());

    if !build {
        return Ok(());
    }

    let out_dir = vm.state_dir.join(LINUXKIT_BUILD_SUBDIR);
    let built = linuxkit::build_image(&SystemRunner::default(), &path, &out_dir).await?;
    println!(
        "{} built {} and {}",
        &*CHECKMARK,
        built.kernel.display(),
        built.initrd.display()
    );

    if install {
        linuxkit::install_image(&built, vm).await?;
        println!(
            "{} installed to {} and {}",
            &*CHECKMARK,
            vm.kernel_path.display(),
            vm.initrd_path.display()
        );
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn print_check(what: &str, ok: bool, detail: &str) {
    let mark = if ok { &*CHECKMARK } else { &*CROSS };
    if detail.is_empty() {
        println!("{} {}", mark, what);
    } else {
        println!("{} {} ({})", mark, what, detail.trim());
    }
}

async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    token.cancel();
}
