use anyhow::{anyhow, Result};

use crate::alert::AlertKind;
use crate::config::ZoneSettings;
use crate::detect::{ObjectClass, Point};
use crate::track::Track;

use super::{Episode, EpisodeKey, Location, Transition};

/// A named polygon in image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub id: String,
    pub polygon: Vec<Point>,
    pub classes: Vec<ObjectClass>,
}

impl Zone {
    pub fn new(id: impl Into<String>, polygon: Vec<Point>, classes: Vec<ObjectClass>) -> Result<Self> {
        let id = id.into();
        crate::validate_zone_id(&id)?;
        if polygon.len() < 3 {
            return Err(anyhow!("zone {} needs at least 3 vertices", id));
        }
        if polygon.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(anyhow!("zone {} has a non-finite vertex", id));
        }
        Ok(Self { id, polygon, classes })
    }

    pub fn applies_to(&self, class: ObjectClass) -> bool {
        self.classes.contains(&class)
    }

    /// Even-odd ray casting. Points exactly on an edge may land either side.
    pub fn contains(&self, point: &Point) -> bool {
        let mut inside = false;
        let n = self.polygon.len();
        let mut j = n - 1;
        for i in 0..n {
            let (a, b) = (self.polygon[i], self.polygon[j]);
            if (a.y > point.y) != (b.y > point.y) {
                let x_cross = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
                if point.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

/// Reports tracks whose centroid enters or leaves a configured zone.
#[derive(Debug, Clone, Default)]
pub struct ZoneRule {
    zones: Vec<Zone>,
}

impl ZoneRule {
    pub fn new(zones: Vec<Zone>) -> Self {
        Self { zones }
    }

    pub fn from_settings(settings: &[ZoneSettings]) -> Result<Self> {
        let zones = settings
            .iter()
            .map(|s| Zone::new(s.id.clone(), s.polygon.clone(), s.classes.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(zones))
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn evaluate(&self, track: &mut Track, out: &mut Vec<Transition>) {
        let now = track.last_seen;
        let centroid = track.centroid();
        for zone in &self.zones {
            if !zone.applies_to(track.class) {
                continue;
            }
            let inside = zone.contains(&centroid);
            match (inside, track.zones.get(&zone.id).copied()) {
                (true, None) => {
                    track.zones.insert(zone.id.clone(), now);
                    log::debug!("track {} entered {}", track.id, zone.id);
                    out.push(Transition::Started {
                        episode: episode(track, &zone.id, now),
                        at: now,
                    });
                }
                (false, Some(entered)) => {
                    track.zones.remove(&zone.id);
                    log::debug!("track {} left {}", track.id, zone.id);
                    out.push(Transition::Ended {
                        episode: episode(track, &zone.id, entered),
                        at: now,
                    });
                }
                _ => {}
            }
        }
    }

    /// Close every zone episode of a track that is going away.
    pub fn flush(&self, track: &Track, at: f64, out: &mut Vec<Transition>) {
        for (zone, entered) in &track.zones {
            out.push(Transition::Ended {
                episode: episode(track, zone, *entered),
                at,
            });
        }
    }
}

fn episode(track: &Track, zone: &str, entered: f64) -> Episode {
    Episode {
        key: EpisodeKey::Zone {
            track: track.id,
            zone: zone.to_string(),
        },
        kind: AlertKind::ZoneIntrusion,
        class: track.class,
        track_ids: vec![track.id],
        location: Location::of_track(track),
        zone_id: Some(zone.to_string()),
        started_at: entered,
        confidence: track.confidence,
    }
}
