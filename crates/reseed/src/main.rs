use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod logging;
mod signals;

/// Exit code for an invalid target, a declined confirmation or a configuration error
pub const EXIT_REFUSED: i32 = 3;

#[derive(Parser)]
#[command(name = "reseed")]
#[command(about = "Reset and reseed the platform's services for one client environment")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the built-in service table)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reset and reseed every service of a client environment
    Reset(ResetArgs),

    /// Run the pre-flight checks only
    Check(TargetArgs),

    /// Print the execution order and lanes
    Plan {
        /// Restrict the plan to these services
        #[arg(short, long = "service")]
        services: Vec<String>,
    },
}

/// Which environment to act on
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Client name; must be on the allow-list
    pub client: String,

    /// `sandbox` or `production`
    pub environment: String,

    /// Use service checkouts under this directory instead of the cluster
    #[arg(long, value_name = "ROOT")]
    pub local: Option<PathBuf>,

    /// Credentials file (YAML, service -> key/value map) instead of the secrets store
    #[arg(long, value_name = "FILE")]
    pub credentials: Option<PathBuf>,

    /// Restrict the run to these services
    #[arg(short, long = "service")]
    pub services: Vec<String>,
}

/// Options for `reseed reset`
#[derive(Args, Debug, Clone)]
pub struct ResetArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Validate and print the commands without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the typed confirmation
    #[arg(long)]
    pub yes: bool,

    /// Drop and rebuild owned schemas first (local workspaces only)
    #[arg(long)]
    pub reset_schemas: bool,

    /// Run services that share no schema concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Directory for run logs (defaults to a temporary directory)
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let code = smol::block_on(async {
        match cli.command {
            Commands::Reset(args) => {
                commands::reset::run(cli.config.as_deref(), args, cli.verbose).await
            }
            Commands::Check(args) => {
                commands::check::run(cli.config.as_deref(), args, cli.verbose).await
            }
            Commands::Plan { services } => {
                commands::plan::run(cli.config.as_deref(), &services, cli.verbose)
            }
        }
    })?;

    std::process::exit(code)
}
