//! Behavior classification over the track store.
//!
//! Each rule turns the tracks touched by one frame into episode transitions:
//! - `loitering`: per-track dwell state machine
//! - `crowd`: proximity clusters of concurrently active tracks
//! - `zones`: centroid entry into configured polygons
//!
//! Rules only report transitions. Deciding which transitions become alerts is
//! the alert manager's job.

pub mod crowd;
pub mod loitering;
pub mod zones;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::alert::AlertKind;
use crate::config::KernelConfig;
use crate::detect::{BoundingBox, ObjectClass, Point};
use crate::track::{FrameTransitions, Track, TrackId, TrackStore};

pub use crowd::CrowdRule;
pub use loitering::LoiteringRule;
pub use zones::{Zone, ZoneRule};

/// Where an episode is happening.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub bbox: BoundingBox,
    pub centroid: Point,
}

impl Location {
    pub fn of_track(track: &Track) -> Self {
        Self {
            bbox: track.bbox,
            centroid: track.centroid(),
        }
    }

    /// Union box and mean centroid of several tracks. `None` for an empty set.
    pub fn of_tracks<'a>(tracks: impl IntoIterator<Item = &'a Track>) -> Option<Self> {
        let mut bbox: Option<BoundingBox> = None;
        let (mut sx, mut sy, mut n) = (0.0f32, 0.0f32, 0usize);
        for track in tracks {
            let c = track.centroid();
            sx += c.x;
            sy += c.y;
            n += 1;
            bbox = Some(match bbox {
                Some(b) => b.union(&track.bbox),
                None => track.bbox,
            });
        }
        let bbox = bbox?;
        Some(Self {
            bbox,
            centroid: Point::new(sx / n as f32, sy / n as f32),
        })
    }
}

/// Identity of one behavior episode within a source.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EpisodeKey {
    Loitering(TrackId),
    Crowd(u64),
    Zone { track: TrackId, zone: String },
}

/// Snapshot of an episode at the moment it started or ended.
#[derive(Clone, Debug, PartialEq)]
pub struct Episode {
    pub key: EpisodeKey,
    pub kind: AlertKind,
    pub class: ObjectClass,
    /// Involved tracks, ascending.
    pub track_ids: Vec<TrackId>,
    pub location: Location,
    pub zone_id: Option<String>,
    /// When the underlying condition began to hold.
    pub started_at: f64,
    pub confidence: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    Started { episode: Episode, at: f64 },
    Ended { episode: Episode, at: f64 },
}

impl Transition {
    pub fn episode(&self) -> &Episode {
        match self {
            Transition::Started { episode, .. } | Transition::Ended { episode, .. } => episode,
        }
    }

    pub fn at(&self) -> f64 {
        match self {
            Transition::Started { at, .. } | Transition::Ended { at, .. } => *at,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, Transition::Started { .. })
    }
}

/// Runs every behavior rule for one source.
#[derive(Debug)]
pub struct BehaviorClassifier {
    loitering: LoiteringRule,
    crowd: CrowdRule,
    zones: ZoneRule,
}

impl BehaviorClassifier {
    pub fn new(config: &KernelConfig) -> Result<Self> {
        Ok(Self {
            loitering: LoiteringRule::new(config.loitering.clone()),
            crowd: CrowdRule::new(config.crowd.clone()),
            zones: ZoneRule::from_settings(&config.zones)?,
        })
    }

    /// Classify one frame. Removed tracks are flushed first so their open
    /// episodes close before anything else is reported.
    pub fn classify(&mut self, store: &mut TrackStore, frame: &FrameTransitions) -> Vec<Transition> {
        let mut out = Vec::new();
        for track in &frame.removed {
            self.loitering.flush(track, frame.timestamp, &mut out);
            self.zones.flush(track, frame.timestamp, &mut out);
        }
        for id in frame.touched() {
            if let Some(track) = store.get_mut(id) {
                self.loitering.evaluate(track, &mut out);
                self.zones.evaluate(track, &mut out);
            }
        }
        self.crowd.evaluate(store, frame.timestamp, &mut out);
        out
    }

    /// Remove every track and close all open episodes.
    pub fn drain(&mut self, store: &mut TrackStore, at: f64) -> Vec<Transition> {
        let frame = FrameTransitions {
            timestamp: at,
            removed: store.drain(),
            ..FrameTransitions::default()
        };
        self.classify(store, &frame)
    }

    pub fn open_crowd_episodes(&self) -> usize {
        self.crowd.episode_count()
    }
}
