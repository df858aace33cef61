//! demo - end-to-end synthetic run of the behavior pipeline

use anyhow::{anyhow, Result};
use clap::Parser;

use vigil_kernel::config::SourceSettings;
use vigil_kernel::{
    merge_moments, InMemoryAlertSink, KernelConfig, Moment, MultiSourceRuntime, Scenario,
    SharedAlertSink,
};

const DEMO_SCENARIOS: [&str; 4] = ["loiter", "crowd", "walk", "parked"];

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Comma-separated synthetic scenarios, one source each.
    #[arg(long, default_value = "loiter,crowd,walk,parked")]
    scenarios: String,
    /// Override frames per scenario (defaults to a length that triggers it).
    #[arg(long)]
    frames: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = KernelConfig::default();
    cfg.sources = args
        .scenarios
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| -> Result<SourceSettings> {
            let scenario = Scenario::parse(name).ok_or_else(|| {
                anyhow!("unknown scenario {:?} (expected one of {:?})", name, DEMO_SCENARIOS)
            })?;
            let frames = args.frames.unwrap_or_else(|| scenario.default_frames());
            Ok(SourceSettings {
                id: format!("camera:{}", name),
                feed: format!("stub://{}?frames={}", name, frames),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    cfg.validate()?;

    let memory = InMemoryAlertSink::new();
    let runtime = MultiSourceRuntime::start(&cfg, SharedAlertSink::new(memory.clone()))?;
    let results = runtime.join()?;

    let alerts = memory.alerts();
    println!("== alerts ({}) ==", alerts.len());
    for alert in &alerts {
        println!("{}", alert.summary());
    }
    println!("== sources ==");
    for (source_id, stats) in &results {
        println!(
            "{}: {} frames, {} tracks, {} alerts, {} closed",
            source_id, stats.frames, stats.tracks_created, stats.alerts, stats.closing_updates
        );
    }

    // Alerts double as search moments: each episode becomes one evidence window.
    let moments: Vec<Moment> = alerts
        .iter()
        .filter_map(|a| {
            a.ended_at.map(|end| {
                Moment::new(a.started_at, end, a.confidence as f64)
                    .with_label(format!("{} {}", a.source_id, a.kind))
            })
        })
        .collect();
    let clips = merge_moments(&moments, &cfg.moments)?;
    println!("== evidence clips ({}) ==", clips.len());
    for clip in &clips {
        println!(
            "{}-{} score {:.2} ({} moments) {}",
            clip.start_formatted(),
            clip.end_formatted(),
            clip.score,
            clip.moment_count,
            clip.label
        );
    }
    Ok(())
}
