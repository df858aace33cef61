//! Per-source frame pass: associate, classify, gate, deliver.
//!
//! One `SourcePipeline` owns the track store of exactly one camera source.
//! Nothing in it is shared with other sources; the alert sink is the only
//! shared resource and serialises its own writes.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::alert::{Alert, AlertManager};
use crate::behavior::BehaviorClassifier;
use crate::config::KernelConfig;
use crate::detect::DetectionFrame;
use crate::ingest::DetectionFeed;
use crate::sink::SharedAlertSink;
use crate::track::{Associator, TrackStore};

/// External stop signal for one or more pipelines.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames: u64,
    pub detections_rejected: u64,
    pub tracks_created: u64,
    pub tracks_removed: u64,
    pub alerts: u64,
    pub closing_updates: u64,
    pub sink_failures: u64,
    /// Frames whose output was discarded because the stop signal was raised.
    pub frames_abandoned: u64,
    pub stopped: bool,
}

pub struct SourcePipeline {
    source_id: String,
    store: TrackStore,
    associator: Associator,
    classifier: BehaviorClassifier,
    alerts: AlertManager,
    stop: StopHandle,
    stats: SourceStats,
}

impl SourcePipeline {
    /// Refuses to build from an invalid configuration.
    pub fn new(source_id: &str, config: &KernelConfig) -> Result<Self> {
        crate::validate_source_id(source_id)?;
        config.validate()?;
        Ok(Self {
            source_id: source_id.to_string(),
            store: TrackStore::new(),
            associator: Associator::new(config.tracking.clone()),
            classifier: BehaviorClassifier::new(config)?,
            alerts: AlertManager::new(source_id, config.alerts.clone()),
            stop: StopHandle::new(),
            stats: SourceStats::default(),
        })
    }

    pub fn with_stop(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn stats(&self) -> &SourceStats {
        &self.stats
    }

    pub fn track_count(&self) -> usize {
        self.store.len()
    }

    pub fn store(&self) -> &TrackStore {
        &self.store
    }

    /// Delivered episodes that have not closed yet.
    pub fn open_alerts(&self) -> usize {
        self.alerts.open_count()
    }

    /// Run one frame to completion. Returns no alerts at all if the stop
    /// signal is seen before or during the pass.
    pub fn process_frame(&mut self, frame: &DetectionFrame) -> Vec<Alert> {
        if self.stop.is_raised() {
            self.stats.frames_abandoned += 1;
            return Vec::new();
        }

        let transitions =
            self.associator
                .associate(&mut self.store, frame.timestamp, &frame.detections);
        self.stats.frames += 1;
        self.stats.detections_rejected += transitions.rejected as u64;
        self.stats.tracks_created += transitions.created.len() as u64;
        self.stats.tracks_removed += transitions.removed.len() as u64;

        let episodes = self.classifier.classify(&mut self.store, &transitions);
        let alerts = self.alerts.process(episodes);

        if self.stop.is_raised() {
            log::warn!(
                "{}: stop raised mid-frame at {:.2}s; discarding {} alert(s)",
                self.source_id,
                transitions.timestamp,
                alerts.len()
            );
            self.stats.frames_abandoned += 1;
            return Vec::new();
        }
        self.count(&alerts);
        alerts
    }

    /// Remove every track, closing its open episodes.
    pub fn drain(&mut self) -> Vec<Alert> {
        let at = self.associator.last_timestamp().unwrap_or(0.0);
        let removed = self.store.len();
        let episodes = self.classifier.drain(&mut self.store, at);
        self.stats.tracks_removed += removed as u64;
        let alerts = self.alerts.process(episodes);
        self.count(&alerts);
        alerts
    }

    fn count(&mut self, alerts: &[Alert]) {
        for alert in alerts {
            if alert.is_closing() {
                self.stats.closing_updates += 1;
            } else {
                self.stats.alerts += 1;
            }
        }
    }

    fn deliver(&mut self, sink: &SharedAlertSink, alerts: &[Alert]) {
        if alerts.is_empty() {
            return;
        }
        if let Err(e) = sink.deliver_all(alerts) {
            self.stats.sink_failures += 1;
            log::error!("{}: alert delivery failed: {}", self.source_id, e);
        }
    }

    /// Pull frames until the feed ends or the stop signal is raised.
    ///
    /// A natural end drains the pipeline and delivers closing updates; a stop
    /// drops the track store without them.
    pub fn run(mut self, feed: &mut dyn DetectionFeed, sink: &SharedAlertSink) -> Result<SourceStats> {
        log::info!("{}: reading {}", self.source_id, feed.name());
        loop {
            if self.stop.is_raised() {
                self.stats.stopped = true;
                log::info!(
                    "{}: stopped after {} frames ({} tracks released)",
                    self.source_id,
                    self.stats.frames,
                    self.store.len()
                );
                break;
            }
            let frame = feed
                .next_frame()
                .map_err(|e| anyhow!("{}: feed {} failed: {}", self.source_id, feed.name(), e))?;
            let Some(frame) = frame else {
                let closing = self.drain();
                self.deliver(sink, &closing);
                log::info!(
                    "{}: feed ended after {} frames, {} alerts",
                    self.source_id,
                    self.stats.frames,
                    self.stats.alerts
                );
                break;
            };
            let alerts = self.process_frame(&frame);
            self.deliver(sink, &alerts);
        }
        Ok(self.stats)
    }
}
