use std::collections::BTreeSet;

use crate::alert::AlertKind;
use crate::config::CrowdSettings;
use crate::detect::Point;
use crate::track::{Track, TrackId, TrackStore};

use super::{Episode, EpisodeKey, Location, Transition};

/// A qualifying cluster carried across frames.
#[derive(Debug, Clone)]
struct CrowdEpisode {
    id: u64,
    members: BTreeSet<TrackId>,
    since: f64,
    alerted: bool,
    location: Location,
    confidence: f32,
}

impl CrowdEpisode {
    fn snapshot(&self, settings: &CrowdSettings) -> Episode {
        Episode {
            key: EpisodeKey::Crowd(self.id),
            kind: AlertKind::CrowdGathering,
            class: settings.class,
            track_ids: self.members.iter().copied().collect(),
            location: self.location,
            zone_id: None,
            started_at: self.since,
            confidence: self.confidence,
        }
    }
}

/// Frame-level proximity clustering with approximate cluster continuity.
///
/// Tracks inside their miss grace window still count, at their last centroid.
///
/// A cluster continues a prior episode when it holds at least half of that
/// episode's members; exactly half counts as the same cluster.
#[derive(Debug, Clone)]
pub struct CrowdRule {
    settings: CrowdSettings,
    episodes: Vec<CrowdEpisode>,
    next_episode: u64,
}

impl CrowdRule {
    pub fn new(settings: CrowdSettings) -> Self {
        Self {
            settings,
            episodes: Vec::new(),
            next_episode: 0,
        }
    }

    pub fn episode_count(&self) -> usize {
        self.episodes.len()
    }

    pub fn evaluate(&mut self, store: &TrackStore, now: f64, out: &mut Vec<Transition>) {
        let candidates: Vec<&Track> = store
            .get_all()
            .filter(|t| t.class == self.settings.class && !t.is_stale())
            .collect();
        let points: Vec<(TrackId, Point)> =
            candidates.iter().map(|t| (t.id, t.centroid())).collect();
        let clusters: Vec<BTreeSet<TrackId>> = proximity_clusters(&points, self.settings.radius_px)
            .into_iter()
            .filter(|c| c.len() >= self.settings.min_size)
            .collect();

        // (shared, prior episode index, cluster index)
        let mut pairs: Vec<(usize, usize, usize)> = Vec::new();
        for (pi, episode) in self.episodes.iter().enumerate() {
            for (ci, cluster) in clusters.iter().enumerate() {
                let shared = episode.members.intersection(cluster).count();
                if shared > 0 && 2 * shared >= episode.members.len() {
                    pairs.push((shared, pi, ci));
                }
            }
        }
        // prior episodes are kept in creation order, so a lower index is older
        pairs.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut prior_taken = vec![false; self.episodes.len()];
        let mut continued: Vec<Option<usize>> = vec![None; clusters.len()];
        for (_, pi, ci) in pairs {
            if prior_taken[pi] || continued[ci].is_some() {
                continue;
            }
            prior_taken[pi] = true;
            continued[ci] = Some(pi);
        }

        let mut next = Vec::with_capacity(clusters.len());
        for (ci, members) in clusters.into_iter().enumerate() {
            let tracks = candidates.iter().copied().filter(|t| members.contains(&t.id));
            let Some(location) = Location::of_tracks(tracks) else {
                continue;
            };
            let confidence = mean_confidence(&candidates, &members);
            let episode = match continued[ci] {
                Some(pi) => {
                    let prior = &self.episodes[pi];
                    CrowdEpisode {
                        id: prior.id,
                        members,
                        since: prior.since,
                        alerted: prior.alerted,
                        location,
                        confidence,
                    }
                }
                None => {
                    self.next_episode += 1;
                    log::debug!(
                        "crowd episode {} opened with {} members",
                        self.next_episode,
                        members.len()
                    );
                    CrowdEpisode {
                        id: self.next_episode,
                        members,
                        since: now,
                        alerted: false,
                        location,
                        confidence,
                    }
                }
            };
            next.push(episode);
        }

        for (pi, prior) in self.episodes.iter().enumerate() {
            if prior_taken[pi] {
                continue;
            }
            log::debug!("crowd episode {} dispersed", prior.id);
            if prior.alerted {
                out.push(Transition::Ended {
                    episode: prior.snapshot(&self.settings),
                    at: now,
                });
            }
        }

        for episode in next.iter_mut() {
            if !episode.alerted && now - episode.since >= self.settings.min_duration_secs {
                episode.alerted = true;
                out.push(Transition::Started {
                    episode: episode.snapshot(&self.settings),
                    at: now,
                });
            }
        }
        next.sort_by_key(|e| e.id);
        self.episodes = next;
    }
}

fn mean_confidence(tracks: &[&Track], members: &BTreeSet<TrackId>) -> f32 {
    let (sum, n) = tracks
        .iter()
        .filter(|t| members.contains(&t.id))
        .fold((0.0f32, 0usize), |(s, n), t| (s + t.confidence, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f32
    }
}

/// Connected components of the graph joining points within `radius` of each other.
/// Components come back ordered by their smallest track id.
pub fn proximity_clusters(points: &[(TrackId, Point)], radius: f32) -> Vec<BTreeSet<TrackId>> {
    let mut parent: Vec<usize> = (0..points.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            if points[i].1.distance(&points[j].1) <= radius {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut groups: Vec<(usize, BTreeSet<TrackId>)> = Vec::new();
    for i in 0..points.len() {
        let root = find(&mut parent, i);
        match groups.iter_mut().find(|(r, _)| *r == root) {
            Some((_, set)) => {
                set.insert(points[i].0);
            }
            None => groups.push((root, BTreeSet::from([points[i].0]))),
        }
    }
    let mut clusters: Vec<BTreeSet<TrackId>> = groups.into_iter().map(|(_, s)| s).collect();
    clusters.sort_by_key(|s| s.iter().next().copied());
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection, ObjectClass};

    fn settings(min_size: usize, min_duration_secs: f64) -> CrowdSettings {
        CrowdSettings {
            class: ObjectClass::Person,
            radius_px: 50.0,
            min_size,
            min_duration_secs,
        }
    }

    fn store_with(positions: &[(TrackId, f32)], ts: f64) -> TrackStore {
        let mut store = TrackStore::new();
        for (id, x) in positions {
            let det = Detection::new(
                ObjectClass::Person,
                BoundingBox::new(*x, 0.0, 20.0, 40.0),
                0.5,
                ts,
            );
            store.upsert(Track::new(*id, &det, 4));
        }
        store
    }

    #[test]
    fn clusters_chain_transitively() {
        let points = vec![
            (1, Point::new(0.0, 0.0)),
            (2, Point::new(40.0, 0.0)),
            (3, Point::new(80.0, 0.0)),
            (4, Point::new(500.0, 0.0)),
        ];
        let clusters = proximity_clusters(&points, 50.0);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0], BTreeSet::from([1, 2, 3]));
        assert_eq!(clusters[1], BTreeSet::from([4]));
    }

    #[test]
    fn undersized_cluster_never_fires() {
        let mut rule = CrowdRule::new(settings(3, 2.0));
        let mut out = Vec::new();
        for ts in 0..100 {
            let store = store_with(&[(1, 0.0), (2, 30.0)], ts as f64);
            rule.evaluate(&store, ts as f64, &mut out);
        }
        assert!(out.is_empty());
    }

    #[test]
    fn exact_size_and_duration_fires_once() {
        let mut rule = CrowdRule::new(settings(3, 4.0));
        let mut fired = Vec::new();
        for ts in 0..=10 {
            let store = store_with(&[(1, 0.0), (2, 30.0), (3, 60.0)], ts as f64);
            let mut out = Vec::new();
            rule.evaluate(&store, ts as f64, &mut out);
            fired.extend(out.into_iter().map(|t| (ts, t)));
        }
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, 4);
        assert_eq!(fired[0].1.episode().track_ids, vec![1, 2, 3]);
    }

    #[test]
    fn half_membership_overlap_counts_as_same_cluster() {
        let mut rule = CrowdRule::new(settings(2, 1.0));
        let mut out = Vec::new();
        rule.evaluate(&store_with(&[(1, 0.0), (2, 30.0), (3, 60.0), (4, 90.0)], 0.0), 0.0, &mut out);
        rule.evaluate(&store_with(&[(1, 0.0), (2, 30.0), (3, 60.0), (4, 90.0)], 1.0), 1.0, &mut out);
        assert_eq!(out.len(), 1);
        // two of the four original members leave, two newcomers arrive
        out.clear();
        rule.evaluate(&store_with(&[(1, 0.0), (2, 30.0), (5, 60.0), (6, 90.0)], 2.0), 2.0, &mut out);
        assert!(out.is_empty(), "{:?}", out);
        assert_eq!(rule.episode_count(), 1);
    }

    #[test]
    fn minority_overlap_starts_a_new_episode() {
        let mut rule = CrowdRule::new(settings(2, 0.0));
        let mut out = Vec::new();
        rule.evaluate(&store_with(&[(1, 0.0), (2, 30.0), (3, 60.0)], 0.0), 0.0, &mut out);
        assert_eq!(out.len(), 1);
        out.clear();
        rule.evaluate(&store_with(&[(1, 0.0), (7, 30.0), (8, 60.0)], 1.0), 1.0, &mut out);
        // old episode ends, new one starts immediately with zero min duration
        assert_eq!(out.len(), 2);
        assert!(!out[0].is_start());
        assert!(out[1].is_start());
    }

    #[test]
    fn dispersal_closes_alerted_episode() {
        let mut rule = CrowdRule::new(settings(3, 1.0));
        let mut out = Vec::new();
        for ts in 0..=1 {
            let store = store_with(&[(1, 0.0), (2, 30.0), (3, 60.0)], ts as f64);
            rule.evaluate(&store, ts as f64, &mut out);
        }
        assert_eq!(out.len(), 1);
        out.clear();
        let store = store_with(&[(1, 0.0), (2, 300.0), (3, 600.0)], 2.0);
        rule.evaluate(&store, 2.0, &mut out);
        assert_eq!(out.len(), 1);
        assert!(!out[0].is_start());
        assert_eq!(rule.episode_count(), 0);
    }

    #[test]
    fn missed_tracks_count_until_stale() {
        let mut rule = CrowdRule::new(settings(3, 0.0));
        let mut store = store_with(&[(1, 0.0), (2, 30.0), (3, 60.0)], 0.0);
        if let Some(t) = store.get_mut(3) {
            t.misses = 1;
        }
        let mut out = Vec::new();
        rule.evaluate(&store, 0.0, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].episode().track_ids, vec![1, 2, 3]);

        out.clear();
        if let Some(t) = store.get_mut(3) {
            t.misses = 6;
            t.stale_since = Some(1.0);
        }
        rule.evaluate(&store, 1.0, &mut out);
        assert_eq!(out.len(), 1);
        assert!(!out[0].is_start());
        assert_eq!(rule.episode_count(), 0);
    }
}
