mod cmd;
mod output;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::output::OutputFormat;

/// kiln - resolve and inspect library dependencies of a build
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

/// Repository selection shared by the dependency commands.
#[derive(Args, Debug, Clone, Default)]
pub struct RepositoryArgs {
  /// Additional repository as NAME=URL or NAME=DIRECTORY (repeatable)
  #[arg(long = "repo", value_name = "NAME=URL")]
  pub repos: Vec<String>,

  /// Do not search Maven Central and the local Maven repository
  #[arg(long)]
  pub no_default_repositories: bool,
}

#[derive(Subcommand)]
enum Commands {
  /// Resolve dependencies and print the dependency tree
  Resolve {
    /// Coordinates to resolve, as group:name:version
    #[arg(required = true, value_name = "GROUP:NAME:VERSION")]
    coordinates: Vec<String>,

    #[command(flatten)]
    repositories: RepositoryArgs,

    /// Exclude a transitive dependency, as group:name (repeatable, * matches anything)
    #[arg(long = "exclude", value_name = "GROUP:NAME")]
    excludes: Vec<String>,

    /// Output format
    #[arg(short = 'o', long = "format", value_enum, default_value_t)]
    format: OutputFormat,
  },

  /// Show the repositories searched, in search order
  Repositories {
    #[command(flatten)]
    repositories: RepositoryArgs,

    /// Output format
    #[arg(short = 'o', long = "format", value_enum, default_value_t)]
    format: OutputFormat,
  },

  /// Show version and directories in use
  Info,
}

fn init_tracing(verbose: bool) {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  match cli.command {
    Commands::Resolve {
      coordinates,
      repositories,
      excludes,
      format,
    } => cmd::cmd_resolve(&coordinates, &repositories, &excludes, format, cli.verbose),
    Commands::Repositories { repositories, format } => cmd::cmd_repositories(&repositories, format),
    Commands::Info => {
      cmd::cmd_info();
      Ok(())
    }
  }
}
