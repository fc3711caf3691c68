use std::path::PathBuf;

use anyhow::Result;
use cadence_core::actions::latest_per_key;
use cadence_core::{AccessPolicy, ActionStatus, JsonlRecordLog, QuickActionRecord, RecordLog};
use clap::{Args, Subcommand, ValueEnum};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use crate::config::ConfigLoader;

#[derive(Args, Debug)]
pub struct ActionsArgs {
    #[command(subcommand)]
    pub command: ActionsCommands,
}

#[derive(Subcommand, Debug)]
pub enum ActionsCommands {
    /// Show the minimum role for each quick action
    Policy,
    /// List persisted quick action records
    Records {
        /// Record log to read (defaults to the configured location)
        #[arg(long)]
        log: Option<PathBuf>,

        /// Only show records in this state
        #[arg(long, value_enum)]
        status: Option<StatusFilter>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum StatusFilter {
    Pending,
    Succeeded,
    Failed,
}

impl StatusFilter {
    fn matches(self, status: ActionStatus) -> bool {
        matches!(
            (self, status),
            (Self::Pending, ActionStatus::Pending)
                | (Self::Succeeded, ActionStatus::Succeeded)
                | (Self::Failed, ActionStatus::Failed)
        )
    }
}

pub async fn run(args: ActionsArgs) -> Result<()> {
    match args.command {
        ActionsCommands::Policy => show_policy(),
        ActionsCommands::Records { log, status, json } => show_records(log, status, json).await,
    }
}

fn show_policy() -> Result<()> {
    let config = ConfigLoader::load()?;
    let policy = AccessPolicy::with_overrides(&config.actions.policy);

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Action").fg(Color::Cyan),
        Cell::new("Minimum role").fg(Color::Cyan),
        Cell::new("Source").fg(Color::Cyan),
    ]);
    for (action, role) in policy.entries() {
        let source = if config.actions.policy.contains_key(&action) {
            "config"
        } else {
            "default"
        };
        table.add_row(vec![
            Cell::new(action.as_str()),
            Cell::new(role.as_str()),
            Cell::new(source),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn show_records(
    log: Option<PathBuf>,
    status: Option<StatusFilter>,
    json: bool,
) -> Result<()> {
    let path = match log {
        Some(path) => path,
        None => ConfigLoader::load()?.actions.record_log_path(),
    };
    let records: Vec<QuickActionRecord> = latest_per_key(JsonlRecordLog::new(&path).load().await?)
        .into_iter()
        .filter(|record| status.is_none_or(|filter| filter.matches(record.status)))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No quick action records in {}", path.display());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Key").fg(Color::Cyan),
        Cell::new("Action").fg(Color::Cyan),
        Cell::new("Target").fg(Color::Cyan),
        Cell::new("Actor").fg(Color::Cyan),
        Cell::new("Status").fg(Color::Cyan),
        Cell::new("Created").fg(Color::Cyan),
        Cell::new("Detail").fg(Color::Cyan),
    ]);
    for record in &records {
        let status_color = match record.status {
            ActionStatus::Succeeded => Color::Green,
            ActionStatus::Pending => Color::Yellow,
            ActionStatus::Failed => Color::Red,
        };
        let detail = match (&record.error, &record.result) {
            (Some(error), _) => error.clone(),
            (None, Some(result)) => result.to_string(),
            (None, None) => String::new(),
        };
        table.add_row(vec![
            Cell::new(&record.idempotency_key),
            Cell::new(record.action_type.as_str()),
            Cell::new(&record.target_entity_id),
            Cell::new(format!("{} ({})", record.actor_id, record.actor_role)),
            Cell::new(record.status.as_str()).fg(status_color),
            Cell::new(record.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(detail),
        ]);
    }
    println!("{table}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_filter_matches_only_its_state() {
        assert!(StatusFilter::Failed.matches(ActionStatus::Failed));
        assert!(!StatusFilter::Failed.matches(ActionStatus::Succeeded));
        assert!(StatusFilter::Pending.matches(ActionStatus::Pending));
    }
}
