use std::collections::HashSet;

use crate::config::TrackingSettings;
use crate::detect::{iou, Detection};

use super::store::{Track, TrackId, TrackStore};

/// Tracks touched by one association pass. This is all the behavior
/// classifier sees of the frame.
#[derive(Debug, Default)]
pub struct FrameTransitions {
    /// Frame clock after the pass (never earlier than the previous frame).
    pub timestamp: f64,
    pub created: Vec<TrackId>,
    pub updated: Vec<TrackId>,
    /// Tracks that went stale during this pass.
    pub stale: Vec<TrackId>,
    /// Tracks removed during this pass, with their final state.
    pub removed: Vec<Track>,
    /// Detections dropped by validation.
    pub rejected: usize,
}

impl FrameTransitions {
    /// Created tracks first, then updated ones.
    pub fn touched(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.created.iter().chain(self.updated.iter()).copied()
    }

    pub fn is_quiet(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Greedy IoU matcher from detections to tracks.
#[derive(Debug)]
pub struct Associator {
    settings: TrackingSettings,
    last_timestamp: Option<f64>,
}

impl Associator {
    pub fn new(settings: TrackingSettings) -> Self {
        Self {
            settings,
            last_timestamp: None,
        }
    }

    pub fn settings(&self) -> &TrackingSettings {
        &self.settings
    }

    /// Clock of the last processed frame.
    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_timestamp
    }

    /// Match one frame of detections against `store`, mutating it in place.
    ///
    /// Invalid detections are logged and skipped; they never touch the store.
    pub fn associate(
        &mut self,
        store: &mut TrackStore,
        timestamp: f64,
        detections: &[Detection],
    ) -> FrameTransitions {
        let now = match self.last_timestamp {
            Some(last) if !(timestamp >= last) => {
                log::warn!(
                    "frame timestamp {:.3} precedes last frame {:.3}; holding clock",
                    timestamp,
                    last
                );
                last
            }
            _ => timestamp,
        };
        let mut transitions = FrameTransitions {
            timestamp: now,
            ..FrameTransitions::default()
        };

        let mut valid: Vec<&Detection> = Vec::with_capacity(detections.len());
        for det in detections {
            match det.validate(self.last_timestamp, self.settings.min_confidence) {
                Ok(()) => valid.push(det),
                Err(err) => {
                    log::warn!("rejected {} detection: {}", det.class.as_str(), err);
                    transitions.rejected += 1;
                }
            }
        }

        // (iou, track id, detection index) for every same-class pair above threshold
        let mut pairs: Vec<(f32, TrackId, usize)> = Vec::new();
        for track in store.get_all() {
            for (idx, det) in valid.iter().enumerate() {
                if det.class != track.class {
                    continue;
                }
                let overlap = iou(&track.bbox, &det.bbox);
                if overlap > self.settings.iou_threshold {
                    pairs.push((overlap, track.id, idx));
                }
            }
        }
        pairs.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut matched_tracks: HashSet<TrackId> = HashSet::new();
        let mut matched_dets = vec![false; valid.len()];
        for (overlap, id, idx) in pairs {
            if matched_dets[idx] || matched_tracks.contains(&id) {
                continue;
            }
            if let Some(track) = store.get_mut(id) {
                track.observe(valid[idx]);
                log::debug!("track {} matched detection {} (iou {:.3})", id, idx, overlap);
                matched_tracks.insert(id);
                matched_dets[idx] = true;
                transitions.updated.push(id);
            }
        }
        transitions.updated.sort_unstable();

        for (idx, det) in valid.iter().enumerate() {
            if matched_dets[idx] {
                continue;
            }
            let id = store.allocate_id();
            store.upsert(Track::new(id, det, self.settings.history_len));
            log::info!(
                "track {} created ({} at {:.1},{:.1})",
                id,
                det.class.as_str(),
                det.bbox.x,
                det.bbox.y
            );
            matched_tracks.insert(id);
            transitions.created.push(id);
        }

        let mut expired = Vec::new();
        for id in store.ids() {
            if matched_tracks.contains(&id) {
                continue;
            }
            let Some(track) = store.get_mut(id) else {
                continue;
            };
            track.misses += 1;
            if track.stale_since.is_none() && track.misses > self.settings.miss_grace_frames {
                track.stale_since = Some(now);
                transitions.stale.push(id);
                log::debug!("track {} stale after {} misses", id, track.misses);
            }
            if let Some(since) = track.stale_since {
                if now - since >= self.settings.stale_expiry_secs {
                    expired.push(id);
                }
            }
        }
        for id in expired {
            if let Some(track) = store.remove(id) {
                log::info!(
                    "track {} removed (seen {:.1}s..{:.1}s)",
                    id,
                    track.first_seen,
                    track.last_seen
                );
                transitions.removed.push(track);
            }
        }

        self.last_timestamp = Some(now);
        transitions
    }
}
