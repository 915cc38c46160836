//! ---
//! dl_section: "05-cli"
//! dl_subsection: "binary"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Operator CLI for the update store and recent-app history."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use devlaunch_common::{init_tracing, AppConfig};
use tracing::debug;

mod recent;
mod store;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "devlaunch update store and launcher utility",
    long_about = None
)]
struct Cli {
    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print version information and exit"
    )]
    version: bool,
    /// Configuration file to use instead of the default candidates.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print the Prometheus metrics gathered while running the command.
    #[arg(long, global = true)]
    metrics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(flatten)]
    Store(store::StoreCommand),
    /// Show or clear the recently opened apps.
    Recent(recent::RecentArgs),
    /// Print version information.
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version || matches!(cli.command, Some(Commands::Version)) {
        print_version();
        return Ok(());
    }
    let Some(command) = cli.command else {
        print_version();
        return Ok(());
    };

    let config = load_config(cli.config.as_ref())?;
    init_tracing("devlaunchctl", &config.logging)?;
    debug!(command = ?command, "running command");

    match command {
        Commands::Store(cmd) => store::run(cmd, &config, cli.metrics)?,
        Commands::Recent(args) => recent::run(args, &config)?,
        Commands::Version => print_version(),
    }
    Ok(())
}

fn load_config(explicit: Option<&PathBuf>) -> Result<AppConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/example.dev.toml"));
    let env_override = std::env::var_os(AppConfig::ENV_CONFIG_PATH).is_some();
    if explicit.is_none() && !env_override && !candidates.iter().any(|path| path.exists()) {
        eprintln!("no configuration file found; using built-in defaults");
        return Ok(AppConfig::default());
    }
    AppConfig::load(&candidates)
}

fn print_version() {
    println!(
        "devlaunchctl {} (launcher {})",
        env!("CARGO_PKG_VERSION"),
        devlaunch_launcher::version()
    );
}
