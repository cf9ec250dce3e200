mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{InsightsArgs, UpArgs, cmd_insights, cmd_plan, cmd_up, cmd_validate};

const DEFAULT_CONFIG: &str = "devloop.json";

/// devloop - build orchestration for the inner dev loop
#[derive(Parser)]
#[command(name = "devloop")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Load a configuration and check every resource and its target graph
  Validate {
    #[arg(default_value = DEFAULT_CONFIG)]
    config: PathBuf,
  },

  /// Show the objects reconciliation would create for a configuration
  Plan {
    #[arg(default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Print the plan as JSON
    #[arg(long)]
    json: bool,
  },

  /// Build every local resource, then run their serve commands
  Up {
    #[arg(default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Maximum number of concurrent builds
    #[arg(short, long)]
    parallelism: Option<usize>,

    /// Do not start serve commands
    #[arg(long)]
    no_serve: bool,
  },

  /// Show statistics over recorded builds
  Insights {
    /// Only include builds started within this long ago (e.g. 24h, 7d)
    #[arg(long, default_value = "24h")]
    since: humantime::Duration,

    /// Show a single resource
    #[arg(short, long)]
    resource: Option<String>,

    /// Number of builds to list for a single resource
    #[arg(short, long, default_value_t = 20)]
    limit: usize,

    /// Print as JSON
    #[arg(long)]
    json: bool,

    /// Delete recorded builds older than this duration and exit
    #[arg(long)]
    clear_older_than: Option<humantime::Duration>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Validate { config } => cmd_validate(&config),
    Commands::Plan { config, json } => cmd_plan(&config, json),
    Commands::Up {
      config,
      parallelism,
      no_serve,
    } => cmd_up(UpArgs {
      config,
      parallelism,
      serve: !no_serve,
    }),
    Commands::Insights {
      since,
      resource,
      limit,
      json,
      clear_older_than,
    } => cmd_insights(InsightsArgs {
      since: since.into(),
      resource,
      limit,
      json,
      clear_older_than: clear_older_than.map(Into::into),
    }),
  }
}
