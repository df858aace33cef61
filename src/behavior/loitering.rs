use crate::alert::AlertKind;
use crate::config::LoiteringProfile;
use crate::detect::{ObjectClass, Point};
use crate::track::{BehaviorState, Track};

use super::{Episode, EpisodeKey, Location, Transition};

/// Per-track dwell state machine: Idle -> Dwelling -> Loitering -> Idle.
///
/// A start transition fires exactly once, on Dwelling -> Loitering. Another one
/// for the same track needs the track to pass through Idle first.
#[derive(Debug, Clone)]
pub struct LoiteringRule {
    profiles: Vec<LoiteringProfile>,
}

impl LoiteringRule {
    pub fn new(profiles: Vec<LoiteringProfile>) -> Self {
        Self { profiles }
    }

    fn profile(&self, class: ObjectClass) -> Option<&LoiteringProfile> {
        self.profiles.iter().find(|p| p.class == class)
    }

    /// Advance the state machine for a track that was just created or matched.
    pub fn evaluate(&self, track: &mut Track, out: &mut Vec<Transition>) {
        let Some(profile) = self.profile(track.class) else {
            return;
        };
        let now = track.last_seen;
        let centroid = track.centroid();

        let next = match track.behavior {
            BehaviorState::Idle => match track.previous_observation() {
                Some(prev) if prev.bbox.centroid().distance(&centroid) <= profile.radius_px => {
                    BehaviorState::Dwelling {
                        anchor: prev.bbox.centroid(),
                        since: prev.timestamp,
                    }
                }
                _ => BehaviorState::Idle,
            },
            BehaviorState::Dwelling { anchor, since } => {
                if anchor.distance(&centroid) > profile.radius_px {
                    BehaviorState::Idle
                } else {
                    BehaviorState::Dwelling { anchor, since }
                }
            }
            BehaviorState::Loitering { anchor, since } => {
                if anchor.distance(&centroid) > profile.radius_px {
                    log::debug!("track {} left loitering radius", track.id);
                    out.push(Transition::Ended {
                        episode: episode(track, anchor, since),
                        at: now,
                    });
                    BehaviorState::Idle
                } else {
                    BehaviorState::Loitering { anchor, since }
                }
            }
        };

        track.behavior = match next {
            BehaviorState::Dwelling { anchor, since } if now - since >= profile.dwell_secs => {
                log::debug!(
                    "track {} loitering after {:.1}s near {:.0},{:.0}",
                    track.id,
                    now - since,
                    anchor.x,
                    anchor.y
                );
                out.push(Transition::Started {
                    episode: episode(track, anchor, since),
                    at: now,
                });
                BehaviorState::Loitering { anchor, since }
            }
            other => other,
        };
    }

    /// Close an active loitering episode for a track that is going away.
    pub fn flush(&self, track: &Track, at: f64, out: &mut Vec<Transition>) {
        if let BehaviorState::Loitering { anchor, since } = track.behavior {
            out.push(Transition::Ended {
                episode: episode(track, anchor, since),
                at,
            });
        }
    }
}

fn episode(track: &Track, anchor: Point, since: f64) -> Episode {
    let mut location = Location::of_track(track);
    location.centroid = anchor;
    Episode {
        key: EpisodeKey::Loitering(track.id),
        kind: AlertKind::Loitering,
        class: track.class,
        track_ids: vec![track.id],
        location,
        zone_id: None,
        started_at: since,
        confidence: track.confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};

    fn rule() -> LoiteringRule {
        LoiteringRule::new(vec![LoiteringProfile {
            class: ObjectClass::Person,
            radius_px: 10.0,
            dwell_secs: 15.0,
        }])
    }

    fn det(x: f32, ts: f64) -> Detection {
        Detection::new(ObjectClass::Person, BoundingBox::new(x, 0.0, 20.0, 40.0), 0.7, ts)
    }

    fn step(rule: &LoiteringRule, track: &mut Track, x: f32, ts: f64) -> Vec<Transition> {
        track.observe(&det(x, ts));
        let mut out = Vec::new();
        rule.evaluate(track, &mut out);
        out
    }

    #[test]
    fn fires_once_at_threshold() {
        let rule = rule();
        let mut track = Track::new(1, &det(0.0, 0.0), 8);
        let mut initial = Vec::new();
        rule.evaluate(&mut track, &mut initial);
        assert_eq!(track.behavior, BehaviorState::Idle);

        let mut fired = Vec::new();

        for ts in 1..=40 {
            for t in step(&rule, &mut track, 0.0, ts as f64) {
                fired.push((ts, t));
            }
        }
        assert_eq!(fired.len(), 1);
        let (ts, transition) = &fired[0];
        assert_eq!(*ts, 15);
        assert!(transition.is_start());
        assert_eq!(transition.episode().started_at, 0.0);
        assert!(track.behavior.is_loitering());
    }

    #[test]
    fn movement_resets_dwell() {
        let rule = rule();
        let mut track = Track::new(1, &det(0.0, 0.0), 8);
        for ts in 1..=10 {
            assert!(step(&rule, &mut track, 0.0, ts as f64).is_empty());
        }
        // jump well outside the radius: dwell restarts from here
        assert!(step(&rule, &mut track, 100.0, 11.0).is_empty());
        assert_eq!(track.behavior, BehaviorState::Idle);
        for ts in 12..=25 {
            assert!(step(&rule, &mut track, 100.0, ts as f64).is_empty());
        }
        let out = step(&rule, &mut track, 100.0, 26.0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].episode().started_at, 11.0);
    }

    #[test]
    fn leaving_radius_ends_episode_and_rearms() {
        let rule = rule();
        let mut track = Track::new(1, &det(0.0, 0.0), 8);
        let mut starts = 0;
        for ts in 1..=15 {
            starts += step(&rule, &mut track, 0.0, ts as f64).len();
        }
        assert_eq!(starts, 1);
        let out = step(&rule, &mut track, 200.0, 16.0);
        assert_eq!(out.len(), 1);
        assert!(!out[0].is_start());
        assert_eq!(track.behavior, BehaviorState::Idle);

        // re-arms after returning to Idle
        let mut again = Vec::new();
        for ts in 17..=40 {
            again.extend(step(&rule, &mut track, 200.0, ts as f64));
        }
        assert_eq!(again.len(), 1);
        assert!(again[0].is_start());
    }

    #[test]
    fn classes_without_profile_never_loiter() {
        let rule = rule();
        let car = Detection::new(ObjectClass::Vehicle, BoundingBox::new(0.0, 0.0, 20.0, 40.0), 0.7, 0.0);
        let mut track = Track::new(1, &car, 8);
        let mut out = Vec::new();
        for ts in 1..=60 {
            let mut next = car.clone();
            next.timestamp = ts as f64;
            track.observe(&next);
            rule.evaluate(&mut track, &mut out);
        }
        assert!(out.is_empty());
        assert_eq!(track.behavior, BehaviorState::Idle);
    }

    #[test]
    fn flush_closes_only_active_episodes() {
        let rule = rule();
        let mut track = Track::new(1, &det(0.0, 0.0), 8);
        let mut out = Vec::new();
        rule.flush(&track, 1.0, &mut out);
        assert!(out.is_empty());
        for ts in 1..=15 {
            step(&rule, &mut track, 0.0, ts as f64);
        }
        rule.flush(&track, 20.0, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].at(), 20.0);
    }
}
