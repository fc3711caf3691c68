use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod fixture;

#[derive(Parser)]
#[command(name = "cadence", about = "Learning metrics and quick actions")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the quick action policy and records
    Actions(commands::actions::ActionsArgs),
    /// Summarize a class's assignments and rank at-risk students
    Class(commands::class::ClassArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
    /// Predict assignment completion from a fixture
    Predict(commands::predict::PredictArgs),
    /// Estimate velocity and ETA from a fixture
    Velocity(commands::velocity::VelocityArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Actions(args) => commands::actions::run(args).await,
        Commands::Class(args) => commands::class::run(args).await,
        Commands::Config(args) => commands::config::run(args),
        Commands::Predict(args) => commands::predict::run(args).await,
        Commands::Velocity(args) => commands::velocity::run(args).await,
    }
}
