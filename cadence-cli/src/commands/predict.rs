use std::path::PathBuf;

use anyhow::Result;
use cadence_core::PredictionResult;
use chrono::{DateTime, Utc};
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use crate::config::ConfigLoader;
use crate::fixture;

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// JSON fixture with events, completion history and assignments
    #[arg(long)]
    pub fixture: PathBuf,

    /// Assignment to predict
    #[arg(long)]
    pub assignment: String,

    /// Student working on the assignment
    #[arg(long)]
    pub student: String,

    /// Evaluate as of this instant (RFC 3339), defaults to now
    #[arg(long)]
    pub now: Option<DateTime<Utc>>,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: PredictArgs) -> Result<()> {
    let config = ConfigLoader::load()?;
    let core = fixture::open(&args.fixture, config, args.now).await?;
    let prediction = core.get_prediction(&args.assignment, &args.student).await?;
    core.shutdown().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&prediction)?);
    } else {
        print_prediction(&prediction);
    }
    Ok(())
}

fn print_prediction(prediction: &PredictionResult) {
    println!(
        "Assignment {} for student {}",
        prediction.assignment_id, prediction.student_id
    );
    match prediction.eta {
        Some(eta) => println!("  ETA:           {}", eta.format("%Y-%m-%d %H:%M UTC")),
        None => println!("  ETA:           cannot predict (no history, no activity)"),
    }
    println!(
        "  Effort:        {:.1}h ({:.1}h .. {:.1}h)",
        prediction.predicted_hours,
        prediction.completion_band.lower,
        prediction.completion_band.upper
    );
    println!(
        "  On time:       {:.0}% ({:.0}% .. {:.0}%)",
        prediction.probability_on_time * 100.0,
        prediction.probability_band.lower * 100.0,
        prediction.probability_band.upper * 100.0
    );
    println!(
        "  Confidence:    {:?} from {} completions",
        prediction.confidence, prediction.based_on_samples
    );
    if !prediction.risk_flags.is_empty() {
        let flags: Vec<String> = prediction
            .risk_flags
            .iter()
            .map(|flag| format!("{flag:?}"))
            .collect();
        println!("  Risks:         {}", flags.join(", "));
    }
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Factor").fg(Color::Cyan),
        Cell::new("Hours").fg(Color::Cyan),
    ]);
    table.add_row(vec![
        Cell::new("baseline"),
        Cell::new(format!("{:.2}", prediction.baseline_hours)),
    ]);
    for (factor, hours) in &prediction.factors {
        let color = if *hours > 0.0 { Color::Red } else { Color::Green };
        table.add_row(vec![
            Cell::new(factor.as_str()),
            Cell::new(format!("{hours:+.2}")).fg(color),
        ]);
    }
    println!("{table}");
}
