//! Ignition CLI - bootstraps a Talos Kubernetes cluster on bare metal.
//!
//! The `ignite` command walks the operator through collecting cluster
//! parameters, booting machines from a generated image, and bootstrapping
//! the cluster once enough machines have fetched their configuration.

mod commands;
mod form;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ignition_core::Config;

use logging::LogFormat;

/// Ignition - bare-metal cluster bootstrap
#[derive(Parser, Debug)]
#[command(
    name = "ignite",
    author,
    version,
    about = "Ignition - bare-metal Talos cluster bootstrap",
    long_about = "Ignition (ignite) serves machine configurations to booting machines, bootstraps the first\ncontrol plane once enough workers have joined, and hands the cluster credentials to the platform."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Configuration file (overrides IGNITION_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// State directory (overrides the configuration file)
    #[arg(short = 'd', long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bootstrap, resuming from saved state if there is any
    Run {
        /// Confirm every phase without asking. Without a [cluster] section
        /// in the configuration, form defaults are accepted as well.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the saved cluster state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete saved state so the next run starts over
    Reset {
        /// Do not ask for confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Choose the install disk for a machine
    ///
    /// Applies to configurations rendered after this call; a machine that
    /// already fetched its configuration keeps the disk it was given.
    Disk {
        /// Machine identity (hardware UUID)
        identity: String,

        /// Install disk, e.g. /dev/nvme0n1
        disk: String,
    },

    /// Print the cluster parameter fields and their defaults
    Schema,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = &args.state_dir {
        config.state_dir.clone_from(dir);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let mut args = Args::parse();
    logging::init(&args.log_level, args.log_format)?;

    let command = args.command.take().unwrap_or(Command::Run { yes: false });
    if matches!(command, Command::Schema) {
        commands::schema::execute();
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(&args)?;
    match command {
        Command::Run { yes } => {
            let outcome = commands::run::execute(config, yes).await?;
            if !outcome.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Status { json } => commands::status::execute(&config, json).await?,
        Command::Reset { force } => commands::reset::execute(&config, force)?,
        Command::Disk { identity, disk } => commands::disk::execute(&config, &identity, &disk).await?,
        Command::Schema => {}
    }

    Ok(ExitCode::SUCCESS)
}
