use anyhow::Result;
use clap::{Args, Subcommand};

use crate::config::ConfigLoader;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration (merged)
    Show,
    /// Show configuration and data file paths
    Path,
}

pub fn run(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommands::Show => show_config(),
        ConfigCommands::Path => show_paths(),
    }
}

fn show_config() -> Result<()> {
    let config = ConfigLoader::load()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{}", toml_str);
    Ok(())
}

fn show_paths() -> Result<()> {
    let config = ConfigLoader::load()?;
    println!("User config:    {}", ConfigLoader::user_config_path().display());
    println!("Project config: {}", ConfigLoader::project_config_path().display());
    println!(
        "Record log:     {}",
        config.actions.record_log_path().display()
    );
    Ok(())
}
