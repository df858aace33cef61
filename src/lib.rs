//! Vigil Kernel
//!
//! Behavior alerting over per-frame object detections, plus consolidation of
//! search moments into evidence clips.
//!
//! # Architecture
//!
//! Each camera source runs its own single-threaded frame pass:
//!
//! 1. **Associator**: greedy IoU matching of detections onto tracks.
//! 2. **Track Store**: per-source track identity and bounded box history.
//! 3. **Behavior Classifier**: loitering, crowd gathering and zone intrusion episodes.
//! 4. **Alert Manager**: one alert per episode, with dedup and cooldown gates.
//!
//! Sources share nothing except the alert sink, which serialises deliveries.
//! The moment merger is independent: a pure function from moments to clips.
//!
//! # Module Structure
//!
//! - `detect`: detection value types and ingestion validation
//! - `track`: track store and associator
//! - `behavior`: loitering, crowd and zone rules
//! - `alert`: alert records and the gating manager
//! - `sink`: alert destinations (log, JSON lines, SQLite, in-memory)
//! - `moments`: moment merging into evidence clips
//! - `ingest`: detector feeds (JSON lines, synthetic scenarios)
//! - `pipeline` / `runtime`: per-source pass, cancellation, worker threads
//! - `config`: file and environment configuration

use anyhow::{anyhow, Result};
use std::sync::OnceLock;

pub mod alert;
pub mod behavior;
pub mod config;
pub mod detect;
pub mod ingest;
pub mod moments;
pub mod pipeline;
pub mod runtime;
pub mod sink;
pub mod track;

pub use alert::{Alert, AlertKind, AlertManager};
pub use behavior::{BehaviorClassifier, Episode, EpisodeKey, Location, Transition};
pub use config::KernelConfig;
pub use detect::{iou, BoundingBox, Detection, DetectionError, DetectionFrame, ObjectClass, Point};
pub use ingest::{open_feed, DetectionFeed, JsonLinesFeed, Scenario, SyntheticFeed};
pub use moments::{
    load_moments, merge_moments, EvidenceClip, MergePolicy, Moment, MomentMerger, ScoreAggregate,
};
pub use pipeline::{SourcePipeline, SourceStats, StopHandle};
pub use runtime::MultiSourceRuntime;
pub use sink::{
    open_sink, AlertSink, InMemoryAlertSink, JsonLinesAlertSink, LogAlertSink, SharedAlertSink,
    SqliteAlertSink,
};
pub use track::{Associator, BehaviorState, FrameTransitions, Track, TrackId, TrackStore};

// -------------------- Identifier Discipline --------------------

/// Source ids name a local camera, never a network address.
///
/// Allowed: "camera:front", "camera:lot_a-2"
/// Disallowed: URLs, whitespace, uppercase letters.
pub fn validate_source_id(source_id: &str) -> Result<()> {
    static SOURCE_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = SOURCE_ID_RE
        .get_or_init(|| regex::Regex::new(r"^camera:[a-z0-9_-]{1,64}$").unwrap());

    if !re.is_match(source_id) {
        return Err(anyhow!(
            "source_id {:?} must match ^camera:[a-z0-9_-]{{1,64}}$",
            source_id
        ));
    }
    Ok(())
}

/// Zone ids are local identifiers, not encoded locations.
///
/// Allowed: "zone:front_boundary", "zone:lot_a_1", "zone:back-gate"
/// Disallowed: anything with whitespace, slashes, or punctuation outside [_-].
pub fn validate_zone_id(zone_id: &str) -> Result<()> {
    // Compile once for hot paths.
    static ZONE_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = ZONE_ID_RE.get_or_init(|| regex::Regex::new(r"^zone:[a-z0-9_-]{1,64}$").unwrap());

    if !re.is_match(zone_id) {
        return Err(anyhow!(
            "zone_id {:?} must match ^zone:[a-z0-9_-]{{1,64}}$",
            zone_id
        ));
    }
    Ok(())
}
