//! merge_moments - consolidate search moments into evidence clips

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use vigil_kernel::{load_moments, KernelConfig, MomentMerger, ScoreAggregate};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON file holding a moment array (or an object with a `moments` array).
    #[arg(long)]
    input: PathBuf,
    /// Write clips here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Merge gap tolerance in seconds (defaults to configuration).
    #[arg(long)]
    gap: Option<f64>,
    /// Maximum clip length in seconds (defaults to configuration).
    #[arg(long)]
    max_clip: Option<f64>,
    /// Seconds of padding added to both sides of each moment.
    #[arg(long)]
    padding: Option<f64>,
    /// Length of the source video, clamps padded moments.
    #[arg(long)]
    video_duration: Option<f64>,
    /// Score aggregate for merged clips (max|mean).
    #[arg(long, value_name = "AGG")]
    aggregate: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut policy = KernelConfig::load()?.moments;
    if let Some(gap) = args.gap {
        policy.gap_tolerance_secs = gap;
    }
    if let Some(max_clip) = args.max_clip {
        policy.max_clip_secs = max_clip;
    }
    if let Some(padding) = args.padding {
        policy.padding_secs = padding;
    }
    if args.video_duration.is_some() {
        policy.video_duration = args.video_duration;
    }
    if let Some(aggregate) = args.aggregate.as_deref() {
        policy.aggregate = ScoreAggregate::parse(aggregate)
            .ok_or_else(|| anyhow!("unknown aggregate {:?} (expected max or mean)", aggregate))?;
    }
    let merger = MomentMerger::new(policy)?;

    let moments = load_moments(&args.input)?;
    let clips = merger.merge(&moments);
    log::info!(
        "{} moments -> {} clips (gap {:.1}s, cap {:.1}s, {})",
        moments.len(),
        clips.len(),
        policy.gap_tolerance_secs,
        policy.max_clip_secs,
        policy.aggregate.as_str()
    );
    for clip in &clips {
        log::info!(
            "{}-{} score {:.2} from {} moment(s) {}",
            clip.start_formatted(),
            clip.end_formatted(),
            clip.score,
            clip.moment_count,
            clip.label
        );
    }

    let json = serde_json::to_string_pretty(&clips)?;
    match &args.output {
        Some(path) => std::fs::write(path, json)
            .map_err(|e| anyhow!("failed to write {}: {}", path.display(), e))?,
        None => println!("{}", json),
    }
    Ok(())
}
