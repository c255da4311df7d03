#[path = "mod.rs"]
mod funserver;

use clap::{CommandFactory, Parser};
use funserver::handlers;
use funserver_cli::{
    get_default_config_path, init_logging, AgentConfig, AnsiStyles, FunserverArgs,
    FunserverCliResult, FunserverSubcommand,
};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> FunserverCliResult<()> {
    // Parse command line arguments
    let mut args = FunserverArgs::parse();

    // Print version if requested
    if args.version {
        println!("{}", format!("v{}", env!("CARGO_PKG_VERSION")).literal());
        return Ok(());
    }

    let Some(subcommand) = args.subcommand.take() else {
        FunserverArgs::command().print_help()?;
        return Ok(());
    };

    let config_path = args.config.clone().unwrap_or_else(get_default_config_path);
    let config = AgentConfig::load(&config_path).await?;

    // Only the long-running agent keeps a log file
    let log_file = match subcommand {
        FunserverSubcommand::Run { .. } => config.log_file.as_deref(),
        _ => None,
    };
    let _guard = init_logging(args.log_level(), &config.log_level, log_file)?;
    tracing::debug!("loaded agent configuration from {}", config_path.display());

    match subcommand {
        FunserverSubcommand::Run { mode, no_wsl } => {
            handlers::run_subcommand(config.manager, mode, no_wsl).await?;
        }
        FunserverSubcommand::Status => {
            handlers::status_subcommand(config.manager).await?;
        }
        FunserverSubcommand::Doctor => {
            handlers::doctor_subcommand(config.manager).await?;
        }
        FunserverSubcommand::Extract { clean } => {
            handlers::extract_subcommand(clean).await?;
        }
        FunserverSubcommand::Logs => {
            handlers::logs_subcommand(config.manager).await?;
        }
        FunserverSubcommand::LinuxkitConfig {
            output,
            build,
            install,
        } => {
            handlers::linuxkit_config_subcommand(config.manager, output, build, install).await?;
        }
    }

    Ok(())
}
