//! Alert manager: turns classifier transitions into delivered alerts.
//!
//! A start transition becomes an alert only after three gates, in order:
//! 1. open episode: an unclosed episode never produces a second start;
//! 2. dedup: same kind and identity raised within `dedup_window_secs`;
//! 3. cooldown: same kind and location cell (or zone) within `cooldown_secs`.
//!
//! End transitions of delivered episodes produce a closing update carrying
//! the original alert id with `ended_at` set.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::behavior::{Episode, EpisodeKey, Location, Transition};
use crate::config::AlertSettings;
use crate::detect::ObjectClass;
use crate::track::TrackId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Loitering,
    CrowdGathering,
    ZoneIntrusion,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Loitering => "loitering",
            AlertKind::CrowdGathering => "crowd_gathering",
            AlertKind::ZoneIntrusion => "zone_intrusion",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "loitering" => Some(AlertKind::Loitering),
            "crowd_gathering" => Some(AlertKind::CrowdGathering),
            "zone_intrusion" => Some(AlertKind::ZoneIntrusion),
            _ => None,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An emitted behavior signal. A closing update reuses the id of the alert it closes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub source_id: String,
    pub kind: AlertKind,
    pub class: ObjectClass,
    pub track_ids: Vec<TrackId>,
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    /// When the behavior condition began to hold.
    pub started_at: f64,
    /// Frame clock at which the alert was raised.
    pub raised_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<f64>,
    pub confidence: f32,
}

impl Alert {
    pub fn is_closing(&self) -> bool {
        self.ended_at.is_some()
    }

    /// One-line human readable rendering.
    pub fn summary(&self) -> String {
        let subject = match (&self.zone_id, self.track_ids.as_slice()) {
            (Some(zone), ids) => format!("{} tracks {:?}", zone, ids),
            (None, [id]) => format!("track {}", id),
            (None, ids) => format!("{} tracks {:?}", ids.len(), ids),
        };
        let mut line = format!(
            "[{}#{}] {} {} {} at ({:.0},{:.0}) since {:.1}s",
            self.source_id,
            self.id,
            self.kind,
            self.class.as_str(),
            subject,
            self.location.centroid.x,
            self.location.centroid.y,
            self.started_at
        );
        if let Some(end) = self.ended_at {
            line.push_str(&format!(" ended {:.1}s", end));
        }
        line
    }
}

/// What dedup compares between two alerts of the same kind.
#[derive(Clone, Debug, PartialEq)]
enum Identity {
    Track(TrackId),
    Zone(TrackId, String),
    Members(BTreeSet<TrackId>),
}

impl Identity {
    fn of(episode: &Episode) -> Self {
        match &episode.key {
            EpisodeKey::Loitering(id) => Identity::Track(*id),
            EpisodeKey::Zone { track, zone } => Identity::Zone(*track, zone.clone()),
            EpisodeKey::Crowd(_) => Identity::Members(episode.track_ids.iter().copied().collect()),
        }
    }

    /// Crowd member sets match on majority overlap of the earlier set.
    fn matches(&self, earlier: &Identity) -> bool {
        match (self, earlier) {
            (Identity::Members(now), Identity::Members(before)) => {
                let shared = now.intersection(before).count();
                shared > 0 && 2 * shared >= before.len()
            }
            _ => self == earlier,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum CooldownKey {
    Cell(AlertKind, i64, i64),
    Zone(String),
}

impl CooldownKey {
    fn of(episode: &Episode, cell_px: f32) -> Self {
        match &episode.zone_id {
            Some(zone) if episode.kind == AlertKind::ZoneIntrusion => CooldownKey::Zone(zone.clone()),
            _ => {
                let c = episode.location.centroid;
                CooldownKey::Cell(
                    episode.kind,
                    (c.x / cell_px).floor() as i64,
                    (c.y / cell_px).floor() as i64,
                )
            }
        }
    }
}

#[derive(Debug)]
struct Recent {
    kind: AlertKind,
    identity: Identity,
    raised_at: f64,
}

/// Per-source alert gatekeeper. Sole producer of [`Alert`] values.
#[derive(Debug)]
pub struct AlertManager {
    source_id: String,
    settings: AlertSettings,
    next_id: u64,
    /// Delivered episodes that have not ended yet.
    open: HashMap<EpisodeKey, Alert>,
    recent: Vec<Recent>,
    cooldowns: HashMap<CooldownKey, f64>,
    suppressed: u64,
}

impl AlertManager {
    pub fn new(source_id: impl Into<String>, settings: AlertSettings) -> Self {
        Self {
            source_id: source_id.into(),
            settings,
            next_id: 0,
            open: HashMap::new(),
            recent: Vec::new(),
            cooldowns: HashMap::new(),
            suppressed: 0,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Number of delivered episodes still open.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Start transitions dropped by the dedup or cooldown gates so far.
    pub fn suppressed_count(&self) -> u64 {
        self.suppressed
    }

    /// Gate one frame's transitions, in order.
    pub fn process(&mut self, transitions: Vec<Transition>) -> Vec<Alert> {
        let mut out = Vec::new();
        for transition in transitions {
            match transition {
                Transition::Started { episode, at } => {
                    if let Some(alert) = self.start(episode, at) {
                        out.push(alert);
                    }
                }
                Transition::Ended { episode, at } => {
                    if let Some(alert) = self.end(&episode, at) {
                        out.push(alert);
                    }
                }
            }
        }
        out
    }

    fn start(&mut self, episode: Episode, at: f64) -> Option<Alert> {
        if self.open.contains_key(&episode.key) {
            log::debug!("{}: {:?} already open", self.source_id, episode.key);
            return None;
        }

        let window = self.settings.dedup_window_secs;
        self.recent.retain(|r| at - r.raised_at < window);
        let identity = Identity::of(&episode);
        if self
            .recent
            .iter()
            .any(|r| r.kind == episode.kind && identity.matches(&r.identity))
        {
            log::debug!("{}: duplicate {} suppressed", self.source_id, episode.kind);
            self.suppressed += 1;
            return None;
        }

        let cooldown = self.settings.cooldown_secs;
        self.cooldowns.retain(|_, last| at - *last < cooldown);
        let cooldown_key = CooldownKey::of(&episode, self.settings.location_cell_px);
        if let Some(last) = self.cooldowns.get(&cooldown_key) {
            if at - last < self.settings.cooldown_secs {
                log::debug!(
                    "{}: {} in cooldown ({:.1}s since last)",
                    self.source_id,
                    episode.kind,
                    at - last
                );
                self.suppressed += 1;
                return None;
            }
        }

        self.next_id += 1;
        let alert = Alert {
            id: self.next_id,
            source_id: self.source_id.clone(),
            kind: episode.kind,
            class: episode.class,
            track_ids: episode.track_ids.clone(),
            location: episode.location,
            zone_id: episode.zone_id.clone(),
            started_at: episode.started_at,
            raised_at: at,
            ended_at: None,
            confidence: episode.confidence,
        };
        log::info!("alert {}", alert.summary());
        self.cooldowns.insert(cooldown_key, at);
        self.recent.push(Recent {
            kind: episode.kind,
            identity,
            raised_at: at,
        });
        self.open.insert(episode.key, alert.clone());
        Some(alert)
    }

    fn end(&mut self, episode: &Episode, at: f64) -> Option<Alert> {
        // ends of suppressed episodes have nothing to close
        let mut alert = self.open.remove(&episode.key)?;
        if !self.settings.emit_closing_updates {
            return None;
        }
        alert.ended_at = Some(at);
        log::info!("alert closed {}", alert.summary());
        Some(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Point};

    fn settings() -> AlertSettings {
        AlertSettings {
            dedup_window_secs: 30.0,
            cooldown_secs: 10.0,
            location_cell_px: 100.0,
            emit_closing_updates: true,
        }
    }

    fn loiter(track: TrackId, x: f32, since: f64) -> Episode {
        Episode {
            key: EpisodeKey::Loitering(track),
            kind: AlertKind::Loitering,
            class: ObjectClass::Person,
            track_ids: vec![track],
            location: Location {
                bbox: BoundingBox::new(x, 0.0, 10.0, 10.0),
                centroid: Point::new(x + 5.0, 5.0),
            },
            zone_id: None,
            started_at: since,
            confidence: 0.9,
        }
    }

    fn crowd(id: u64, members: &[TrackId], x: f32) -> Episode {
        Episode {
            key: EpisodeKey::Crowd(id),
            kind: AlertKind::CrowdGathering,
            track_ids: members.to_vec(),
            ..loiter(0, x, 0.0)
        }
    }

    fn started(episode: Episode, at: f64) -> Transition {
        Transition::Started { episode, at }
    }

    fn ended(episode: Episode, at: f64) -> Transition {
        Transition::Ended { episode, at }
    }

    #[test]
    fn never_two_starts_for_an_open_episode() {
        let mut mgr = AlertManager::new("camera:a", settings());
        let out = mgr.process(vec![started(loiter(1, 0.0, 0.0), 15.0)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].raised_at, 15.0);
        assert_eq!(out[0].started_at, 0.0);
        let out = mgr.process(vec![started(loiter(1, 0.0, 0.0), 100.0)]);
        assert!(out.is_empty());
        assert_eq!(mgr.open_count(), 1);
    }

    #[test]
    fn closing_update_reuses_alert_id() {
        let mut mgr = AlertManager::new("camera:a", settings());
        let first = mgr.process(vec![started(loiter(1, 0.0, 0.0), 15.0)]);
        let closing = mgr.process(vec![ended(loiter(1, 0.0, 0.0), 20.0)]);
        assert_eq!(closing.len(), 1);
        assert_eq!(closing[0].id, first[0].id);
        assert_eq!(closing[0].ended_at, Some(20.0));
        assert!(closing[0].is_closing());
        assert_eq!(mgr.open_count(), 0);
    }

    #[test]
    fn closing_updates_can_be_disabled() {
        let mut s = settings();
        s.emit_closing_updates = false;
        let mut mgr = AlertManager::new("camera:a", s);
        mgr.process(vec![started(loiter(1, 0.0, 0.0), 15.0)]);
        assert!(mgr.process(vec![ended(loiter(1, 0.0, 0.0), 20.0)]).is_empty());
        assert_eq!(mgr.open_count(), 0);
    }

    #[test]
    fn same_track_reloitering_within_window_is_deduplicated() {
        let mut mgr = AlertManager::new("camera:a", settings());
        mgr.process(vec![started(loiter(1, 0.0, 0.0), 15.0)]);
        mgr.process(vec![ended(loiter(1, 0.0, 0.0), 16.0)]);
        // far away so cooldown cannot be the reason
        assert!(mgr.process(vec![started(loiter(1, 900.0, 16.0), 31.0)]).is_empty());
        assert_eq!(mgr.suppressed_count(), 1);
        // window elapsed
        assert_eq!(mgr.process(vec![started(loiter(1, 900.0, 40.0), 46.0)]).len(), 1);
    }

    #[test]
    fn crowd_churn_is_deduplicated_by_member_overlap() {
        let mut mgr = AlertManager::new("camera:a", settings());
        assert_eq!(mgr.process(vec![started(crowd(1, &[1, 2, 3, 4], 0.0), 5.0)]).len(), 1);
        mgr.process(vec![ended(crowd(1, &[1, 2, 3, 4], 0.0), 6.0)]);
        // a new cluster id holding half the old members, somewhere else
        let out = mgr.process(vec![started(crowd(2, &[3, 4, 8, 9], 900.0), 12.0)]);
        assert!(out.is_empty());
        // disjoint members elsewhere pass
        let out = mgr.process(vec![started(crowd(3, &[20, 21, 22], 2000.0), 12.0)]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn cooldown_is_per_kind_and_cell() {
        let mut mgr = AlertManager::new("camera:a", settings());
        assert_eq!(mgr.process(vec![started(loiter(1, 10.0, 0.0), 15.0)]).len(), 1);
        // same cell, different track
        assert!(mgr.process(vec![started(loiter(2, 20.0, 0.0), 16.0)]).is_empty());
        // different cell
        assert_eq!(mgr.process(vec![started(loiter(3, 510.0, 0.0), 16.0)]).len(), 1);
        // same cell, different kind
        assert_eq!(mgr.process(vec![started(crowd(1, &[7, 8, 9], 10.0), 16.0)]).len(), 1);
        // cooldown elapsed
        assert_eq!(mgr.process(vec![started(loiter(4, 20.0, 0.0), 25.0)]).len(), 1);
    }

    #[test]
    fn expired_cooldowns_are_forgotten() {
        let mut mgr = AlertManager::new("camera:a", settings());
        for (i, x) in [10.0, 510.0, 1010.0].into_iter().enumerate() {
            mgr.process(vec![started(loiter(i as TrackId + 1, x, 0.0), 15.0)]);
        }
        assert_eq!(mgr.cooldowns.len(), 3);
        // dedup window is longer than the cooldown, so pick a fresh track
        assert_eq!(mgr.process(vec![started(loiter(9, 2010.0, 0.0), 30.0)]).len(), 1);
        assert_eq!(mgr.cooldowns.len(), 1);
    }

    #[test]
    fn ends_of_suppressed_episodes_are_silent() {
        let mut mgr = AlertManager::new("camera:a", settings());
        mgr.process(vec![started(loiter(1, 10.0, 0.0), 15.0)]);
        mgr.process(vec![started(loiter(2, 20.0, 0.0), 16.0)]);
        assert!(mgr.process(vec![ended(loiter(2, 20.0, 0.0), 17.0)]).is_empty());
    }

    #[test]
    fn zone_intrusion_cooldown_is_per_zone() {
        let mut mgr = AlertManager::new("camera:a", settings());
        let zone = |track: TrackId, zone: &str, x: f32| Episode {
            key: EpisodeKey::Zone {
                track,
                zone: zone.to_string(),
            },
            kind: AlertKind::ZoneIntrusion,
            zone_id: Some(zone.to_string()),
            ..loiter(track, x, 0.0)
        };
        assert_eq!(mgr.process(vec![started(zone(1, "zone:gate", 0.0), 1.0)]).len(), 1);
        assert!(mgr.process(vec![started(zone(2, "zone:gate", 800.0), 2.0)]).is_empty());
        assert_eq!(mgr.process(vec![started(zone(3, "zone:dock", 0.0), 2.0)]).len(), 1);
    }

    #[test]
    fn alert_serializes_with_snake_case_kind() {
        let mut mgr = AlertManager::new("camera:a", settings());
        let alert = mgr.process(vec![started(crowd(1, &[1, 2, 3], 0.0), 5.0)]).remove(0);
        let json = serde_json::to_string(&alert).unwrap();
        assert!(json.contains("\"kind\":\"crowd_gathering\""));
        assert!(!json.contains("ended_at"));
        let back: Alert = serde_json::from_str(&json).unwrap();
        assert_eq!(back, alert);
        assert_eq!(AlertKind::parse("crowd_gathering"), Some(AlertKind::CrowdGathering));
    }
}
