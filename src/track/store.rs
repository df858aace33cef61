use std::collections::{BTreeMap, VecDeque};

use crate::detect::{BoundingBox, Detection, ObjectClass, Point};

/// Monotonic per-source track identifier. Never reused.
pub type TrackId = u64;

/// One matched bounding box and the time it was observed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    pub bbox: BoundingBox,
    pub timestamp: f64,
}

/// Per-track loitering state.
///
/// `anchor` is the centroid the subject must stay near; `since` is when it
/// started staying there.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum BehaviorState {
    #[default]
    Idle,
    Dwelling { anchor: Point, since: f64 },
    Loitering { anchor: Point, since: f64 },
}

impl BehaviorState {
    pub fn is_loitering(&self) -> bool {
        matches!(self, BehaviorState::Loitering { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            BehaviorState::Idle => "idle",
            BehaviorState::Dwelling { .. } => "dwelling",
            BehaviorState::Loitering { .. } => "loitering",
        }
    }
}

/// Persistent identity for one subject across frames.
#[derive(Clone, Debug)]
pub struct Track {
    pub id: TrackId,
    pub class: ObjectClass,
    /// Most recent matched box.
    pub bbox: BoundingBox,
    /// Confidence of the most recent matched detection.
    pub confidence: f32,
    pub first_seen: f64,
    pub last_seen: f64,
    pub behavior: BehaviorState,
    /// Consecutive frames without a matching detection.
    pub misses: u32,
    /// Frame clock at which the track went stale, if it has.
    pub stale_since: Option<f64>,
    /// Zones the centroid currently sits in, with entry time.
    pub zones: BTreeMap<String, f64>,
    history: VecDeque<Observation>,
    history_len: usize,
}

impl Track {
    pub fn new(id: TrackId, detection: &Detection, history_len: usize) -> Self {
        let history_len = history_len.max(2);
        let mut history = VecDeque::with_capacity(history_len);
        history.push_back(Observation {
            bbox: detection.bbox,
            timestamp: detection.timestamp,
        });
        Self {
            id,
            class: detection.class,
            bbox: detection.bbox,
            confidence: detection.confidence,
            first_seen: detection.timestamp,
            last_seen: detection.timestamp,
            behavior: BehaviorState::Idle,
            misses: 0,
            stale_since: None,
            zones: BTreeMap::new(),
            history,
            history_len,
        }
    }

    /// Extend the track with a matched detection. Revives a stale track.
    pub fn observe(&mut self, detection: &Detection) {
        self.bbox = detection.bbox;
        self.confidence = detection.confidence;
        self.last_seen = detection.timestamp;
        self.misses = 0;
        self.stale_since = None;
        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(Observation {
            bbox: detection.bbox,
            timestamp: detection.timestamp,
        });
    }

    /// Bounding-box history, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Observation> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// The observation before the latest one.
    pub fn previous_observation(&self) -> Option<&Observation> {
        let len = self.history.len();
        if len < 2 {
            return None;
        }
        self.history.get(len - 2)
    }

    pub fn centroid(&self) -> Point {
        self.bbox.centroid()
    }

    pub fn is_stale(&self) -> bool {
        self.stale_since.is_some()
    }

    /// Matched in the most recent frame.
    pub fn is_active(&self) -> bool {
        self.misses == 0
    }
}

/// Owns the active tracks of one source, iterated in track-id order.
///
/// Carries no behavior logic and no locking; the owning pipeline serialises access.
#[derive(Debug, Default)]
pub struct TrackStore {
    tracks: BTreeMap<TrackId, Track>,
    last_id: TrackId,
}

impl TrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next track id.
    pub fn allocate_id(&mut self) -> TrackId {
        self.last_id += 1;
        self.last_id
    }

    /// Insert or replace a track, returning the previous value.
    pub fn upsert(&mut self, track: Track) -> Option<Track> {
        self.last_id = self.last_id.max(track.id);
        self.tracks.insert(track.id, track)
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    pub fn get_all(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn ids(&self) -> Vec<TrackId> {
        self.tracks.keys().copied().collect()
    }

    pub fn remove(&mut self, id: TrackId) -> Option<Track> {
        self.tracks.remove(&id)
    }

    /// Remove every track, in id order.
    pub fn drain(&mut self) -> Vec<Track> {
        std::mem::take(&mut self.tracks).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
