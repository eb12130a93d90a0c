use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;

use output::OutputFormat;

/// nimbus - converge a serverless function deployment with its declared state
#[derive(Parser)]
#[command(name = "nimbus")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Path to the desired-state config file
  #[arg(short, long, global = true, default_value = nimbus_lib::consts::DEFAULT_CONFIG_FILE)]
  config: PathBuf,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Package the code and converge every resource with the config
  Deploy {
    /// Upload the artifact to staging and stop (requires a publishing section)
    #[arg(long)]
    stage_only: bool,
  },

  /// Show what a deploy would change, without changing anything
  Plan,

  /// Probe the current state of every resource
  Status {
    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Fetch recent execution-log records in chronological order
  Tail,

  /// Tear down everything the config deployed
  Destroy,

  /// Scaffold a starter config and source stub
  Init {
    /// Directory to scaffold into
    #[arg(default_value = ".")]
    dir: PathBuf,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .without_time()
    .init();

  let cli = Cli::parse();

  match cli.command {
    Commands::Deploy { stage_only } => cmd::cmd_deploy(&cli.config, stage_only),
    Commands::Plan => cmd::cmd_plan(&cli.config),
    Commands::Status { output } => cmd::cmd_status(&cli.config, output),
    Commands::Tail => cmd::cmd_tail(&cli.config),
    Commands::Destroy => cmd::cmd_destroy(&cli.config),
    Commands::Init { dir } => cmd::cmd_init(&dir),
  }
}
