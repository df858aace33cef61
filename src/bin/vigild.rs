//! vigild - behavior alert daemon
//!
//! This daemon:
//! 1. Loads configuration (VIGIL_CONFIG file + VIGIL_* env overrides)
//! 2. Opens the configured alert sink
//! 3. Runs one tracking pipeline per camera source on its own thread
//! 4. Stops every source on Ctrl-C, or exits once all feeds end

use anyhow::{anyhow, Result};

use vigil_kernel::{open_sink, KernelConfig, MultiSourceRuntime};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = KernelConfig::load()?;
    log::info!(
        "vigild {} starting: {} source(s), iou>{:.2}, cooldown {:.0}s",
        env!("CARGO_PKG_VERSION"),
        cfg.sources.len(),
        cfg.tracking.iou_threshold,
        cfg.alerts.cooldown_secs
    );
    for profile in &cfg.loitering {
        log::info!(
            "loitering profile: {} within {:.0}px for {:.0}s",
            profile.class.as_str(),
            profile.radius_px,
            profile.dwell_secs
        );
    }

    let sink = open_sink(&cfg.sink)?;
    let runtime = MultiSourceRuntime::start(&cfg, sink.clone())?;

    let stop = runtime.stop_handle();
    ctrlc::set_handler(move || {
        log::warn!("interrupt received; stopping sources");
        stop.raise();
    })
    .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    let results = runtime.join()?;
    for (source_id, stats) in &results {
        log::info!(
            "{}: frames={} rejected={} tracks={} alerts={} closed={} sink_failures={} stopped={}",
            source_id,
            stats.frames,
            stats.detections_rejected,
            stats.tracks_created,
            stats.alerts,
            stats.closing_updates,
            stats.sink_failures,
            stats.stopped
        );
    }
    sink.flush()?;
    Ok(())
}
