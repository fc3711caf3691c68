use std::path::PathBuf;

use anyhow::Result;
use cadence_core::prediction::DEFAULT_AT_RISK_LIMIT;
use cadence_core::{AtRiskStudent, ClassAssignmentMetrics};
use chrono::{DateTime, Utc};
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use serde_json::json;

use crate::config::ConfigLoader;
use crate::fixture;

#[derive(Args, Debug)]
pub struct ClassArgs {
    /// JSON fixture with events, completion history and assignments
    #[arg(long)]
    pub fixture: PathBuf,

    /// Class to summarize
    #[arg(long)]
    pub class: String,

    /// Maximum number of at-risk students to list
    #[arg(long, default_value_t = DEFAULT_AT_RISK_LIMIT)]
    pub limit: usize,

    /// Evaluate as of this instant (RFC 3339), defaults to now
    #[arg(long)]
    pub now: Option<DateTime<Utc>>,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ClassArgs) -> Result<()> {
    let config = ConfigLoader::load()?;
    let core = fixture::open(&args.fixture, config, args.now).await?;
    let metrics = core.get_class_assignment_metrics(&args.class).await?;
    let at_risk = core.get_at_risk_students(&args.class, args.limit).await?;
    core.shutdown().await?;

    if args.json {
        let output = json!({
            "metrics": metrics,
            "atRisk": at_risk,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_metrics(&metrics);
        print_at_risk(&at_risk);
    }
    Ok(())
}

fn print_metrics(metrics: &ClassAssignmentMetrics) {
    println!("Class {}", metrics.class_id);
    println!(
        "  Assignments:   {} ({} student assignments)",
        metrics.total_assignments, metrics.student_assignments
    );
    println!(
        "  Funnel:        {} done, {} in progress, {} not started, {} overdue",
        metrics.completed, metrics.in_progress, metrics.not_started, metrics.overdue
    );
    println!(
        "  Completion:    {:.0}%",
        metrics.completion_rate * 100.0
    );
    if let Some(median) = metrics.completion.median_hours {
        println!("  Median time:   {median:.1}h");
    }
    println!("  Velocity:      {:.2}/day", metrics.class_velocity);
    if metrics.low_signal {
        println!("  Low signal:    too little data for reliable estimates");
    }
    println!();
}

fn print_at_risk(at_risk: &[AtRiskStudent]) {
    if at_risk.is_empty() {
        println!("No students at risk");
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Student").fg(Color::Cyan),
        Cell::new("Assignment").fg(Color::Cyan),
        Cell::new("Status").fg(Color::Cyan),
        Cell::new("Age (days)").fg(Color::Cyan),
        Cell::new("Overdue (days)").fg(Color::Cyan),
        Cell::new("Score").fg(Color::Cyan),
    ]);
    for entry in at_risk {
        let overdue = entry
            .days_overdue
            .map(|days| days.to_string())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(&entry.student_id),
            Cell::new(&entry.assignment_id),
            Cell::new(entry.status.as_str()),
            Cell::new(entry.days_since_assigned),
            Cell::new(overdue),
            Cell::new(entry.risk_score).fg(if entry.days_overdue.is_some() {
                Color::Red
            } else {
                Color::Yellow
            }),
        ]);
    }
    println!("{table}");
}
