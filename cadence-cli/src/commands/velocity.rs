use std::path::PathBuf;

use anyhow::Result;
use cadence_core::{EntityRef, EtaProjection, VelocityResult, WindowSpec};
use chrono::{DateTime, Utc};
use clap::Args;
use serde_json::json;

use crate::config::ConfigLoader;
use crate::fixture;

#[derive(Args, Debug)]
pub struct VelocityArgs {
    /// JSON fixture with events, completion history and assignments
    #[arg(long)]
    pub fixture: PathBuf,

    /// Entity to measure, e.g. student:s1 or class:c7
    #[arg(long)]
    pub entity: EntityRef,

    /// Trailing window in days (defaults to the configured window)
    #[arg(long, conflicts_with = "lifetime")]
    pub window_days: Option<u32>,

    /// Use the entity's whole history
    #[arg(long)]
    pub lifetime: bool,

    /// Remaining progress to project an ETA for
    #[arg(long)]
    pub remaining: Option<f64>,

    /// Evaluate as of this instant (RFC 3339), defaults to now
    #[arg(long)]
    pub now: Option<DateTime<Utc>>,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: VelocityArgs) -> Result<()> {
    let config = ConfigLoader::load()?;
    let core = fixture::open(&args.fixture, config, args.now).await?;

    let window = if args.lifetime {
        Some(WindowSpec::Lifetime)
    } else {
        args.window_days.map(WindowSpec::trailing).transpose()?
    };

    let velocity = core.get_velocity(&args.entity, window).await?;
    let eta = match args.remaining {
        Some(remaining) => Some(core.get_eta(&args.entity, window, remaining).await?),
        None => None,
    };
    core.shutdown().await?;

    if args.json {
        let output = json!({
            "entity": args.entity.to_string(),
            "velocity": velocity,
            "eta": eta,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_velocity(&args.entity, &velocity);
        if let Some(eta) = eta {
            print_eta(&eta);
        }
    }
    Ok(())
}

fn print_velocity(entity: &EntityRef, velocity: &VelocityResult) {
    println!("Velocity for {entity}");
    println!(
        "  Rate:        {:.2}/day (EMA {:.2})",
        velocity.rate_per_day, velocity.ema_per_day
    );
    println!(
        "  Band:        {:.2} .. {:.2} ({:?}, {:.0}%)",
        velocity.band.lower,
        velocity.band.upper,
        velocity.band.method,
        velocity.band.confidence_level * 100.0
    );
    println!("  Samples:     {}", velocity.sample_count);
    println!("  Confidence:  {:?}", velocity.grade);
    if velocity.low_signal {
        println!("  Low signal:  too little data for a reliable estimate");
    }
}

fn print_eta(eta: &EtaProjection) {
    match (eta.eta, eta.earliest, eta.latest) {
        (Some(at), earliest, latest) => {
            println!("  ETA:         {}", at.format("%Y-%m-%d %H:%M UTC"));
            if let Some(earliest) = earliest {
                println!("  Earliest:    {}", earliest.format("%Y-%m-%d"));
            }
            match latest {
                Some(latest) => println!("  Latest:      {}", latest.format("%Y-%m-%d")),
                None => println!("  Latest:      unbounded"),
            }
        }
        (None, _, _) => println!("  ETA:         unavailable (no forward progress)"),
    }
}
