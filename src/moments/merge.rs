use anyhow::Result;

use super::{EvidenceClip, MergePolicy, Moment, ScoreAggregate};

/// Sweep-line merger of overlapping or nearby moments.
///
/// Stateless apart from its policy; safe to share across threads.
#[derive(Debug, Clone, Copy)]
pub struct MomentMerger {
    policy: MergePolicy,
}

/// Constituents of the clip currently being built.
struct OpenClip {
    start: f64,
    end: f64,
    members: Vec<Moment>,
}

impl OpenClip {
    fn new(moment: Moment) -> Self {
        Self {
            start: moment.start,
            end: moment.end,
            members: vec![moment],
        }
    }

    fn push(&mut self, moment: Moment) {
        self.end = self.end.max(moment.end);
        self.members.push(moment);
    }
}

impl MomentMerger {
    pub fn new(policy: MergePolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &MergePolicy {
        &self.policy
    }

    /// Merge an unordered moment set into ordered, non-overlapping clips.
    /// Degenerate moments are skipped; an all-degenerate input yields no clips.
    pub fn merge(&self, moments: &[Moment]) -> Vec<EvidenceClip> {
        let mut usable: Vec<Moment> = moments
            .iter()
            .filter_map(|m| {
                if m.is_degenerate() {
                    log::debug!("discarding degenerate moment {:.2}..{:.2}", m.start, m.end);
                    return None;
                }
                let padded = self.pad(m);
                if padded.is_degenerate() {
                    log::debug!(
                        "discarding moment {:.2}..{:.2} outside video bounds",
                        m.start,
                        m.end
                    );
                    return None;
                }
                Some(padded)
            })
            .collect();

        usable.sort_by(|a, b| {
            a.start
                .total_cmp(&b.start)
                .then(b.duration().total_cmp(&a.duration()))
        });

        let mut clips = Vec::new();
        let mut current: Option<OpenClip> = None;
        for moment in usable {
            match current.as_mut() {
                Some(open) if moment.start <= open.end + self.policy.gap_tolerance_secs => {
                    open.push(moment);
                }
                _ => {
                    if let Some(done) = current.replace(OpenClip::new(moment)) {
                        clips.push(self.finalize(done));
                    }
                }
            }
        }
        if let Some(done) = current {
            clips.push(self.finalize(done));
        }
        clips
    }

    fn pad(&self, moment: &Moment) -> Moment {
        let pad = self.policy.padding_secs;
        let mut start = (moment.start - pad).max(0.0);
        let mut end = moment.end + pad;
        if let Some(limit) = self.policy.video_duration {
            end = end.min(limit);
            start = start.min(limit);
        }
        Moment {
            start,
            end,
            score: moment.score,
            label: moment.label.clone(),
        }
    }

    fn finalize(&self, clip: OpenClip) -> EvidenceClip {
        let score = match self.policy.aggregate {
            ScoreAggregate::Max => clip
                .members
                .iter()
                .map(|m| m.score)
                .fold(f64::NEG_INFINITY, f64::max),
            ScoreAggregate::Mean => {
                clip.members.iter().map(|m| m.score).sum::<f64>() / clip.members.len() as f64
            }
        };

        let mut labels: Vec<&str> = Vec::new();
        for m in &clip.members {
            if !m.label.is_empty() && !labels.contains(&m.label.as_str()) {
                labels.push(&m.label);
            }
        }
        let label = labels.join("; ");

        let (start, end) = self.cap(&clip);
        EvidenceClip {
            start,
            end,
            score,
            moment_count: clip.members.len(),
            label,
        }
    }

    /// Trim to `max_clip_secs`, keeping the start unless the best-scoring
    /// constituent would fall off the end.
    fn cap(&self, clip: &OpenClip) -> (f64, f64) {
        let cap = self.policy.max_clip_secs;
        if clip.end - clip.start <= cap {
            return (clip.start, clip.end);
        }
        let mut best = &clip.members[0];
        for m in &clip.members[1..] {
            if m.score > best.score {
                best = m;
            }
        }
        let start = if best.end <= clip.start + cap {
            clip.start
        } else if best.duration() > cap {
            best.start
        } else {
            best.end - cap
        };
        (start, end_within(start, cap))
    }
}

/// `start + cap`, nudged down until the rounded difference stays within `cap`.
fn end_within(start: f64, cap: f64) -> f64 {
    let mut end = start + cap;
    while end - start > cap {
        end = next_below(end);
    }
    end
}

fn next_below(x: f64) -> f64 {
    if x > 0.0 {
        f64::from_bits(x.to_bits() - 1)
    } else if x == 0.0 {
        -f64::from_bits(1)
    } else {
        f64::from_bits(x.to_bits() + 1)
    }
}

/// Merge with a one-off policy.
pub fn merge_moments(moments: &[Moment], policy: &MergePolicy) -> Result<Vec<EvidenceClip>> {
    Ok(MomentMerger::new(*policy)?.merge(moments))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merger() -> MomentMerger {
        MomentMerger::new(MergePolicy::default()).unwrap()
    }

    fn spans(clips: &[EvidenceClip]) -> Vec<(f64, f64)> {
        clips.iter().map(|c| (c.start, c.end)).collect()
    }

    #[test]
    fn overlapping_and_nearby_moments_merge() {
        let clips = merger().merge(&[
            Moment::new(30.0, 31.0, 0.5),
            Moment::new(11.0, 14.0, 0.9),
            Moment::new(10.0, 12.0, 0.8),
        ]);
        assert_eq!(spans(&clips), vec![(10.0, 14.0), (30.0, 31.0)]);
        assert_eq!(clips[0].score, 0.9);
        assert_eq!(clips[0].moment_count, 2);
        assert_eq!(clips[1].score, 0.5);
    }

    #[test]
    fn gap_boundary_is_inclusive() {
        let clips = merger().merge(&[Moment::new(0.0, 1.0, 0.1), Moment::new(3.0, 4.0, 0.1)]);
        assert_eq!(spans(&clips), vec![(0.0, 4.0)]);
        let clips = merger().merge(&[Moment::new(0.0, 1.0, 0.1), Moment::new(3.5, 4.0, 0.1)]);
        assert_eq!(clips.len(), 2);
    }

    #[test]
    fn degenerate_moments_are_dropped_not_fatal() {
        let clips = merger().merge(&[Moment::new(5.0, 5.0, 1.0), Moment::new(9.0, 3.0, 1.0)]);
        assert!(clips.is_empty());
        assert!(merger().merge(&[]).is_empty());
        let clips = merger().merge(&[Moment::new(5.0, 5.0, 1.0), Moment::new(1.0, 2.0, 0.3)]);
        assert_eq!(spans(&clips), vec![(1.0, 2.0)]);
    }

    #[test]
    fn cap_keeps_start_when_best_fits() {
        let clips = merger().merge(&[
            Moment::new(0.0, 5.0, 0.9),
            Moment::new(4.0, 12.0, 0.2),
            Moment::new(11.0, 25.0, 0.3),
        ]);
        assert_eq!(spans(&clips), vec![(0.0, 15.0)]);
    }

    #[test]
    fn cap_slides_to_cover_late_best_moment() {
        let clips = merger().merge(&[
            Moment::new(0.0, 5.0, 0.2),
            Moment::new(4.0, 12.0, 0.3),
            Moment::new(18.0, 22.0, 0.95),
        ]);
        // 18 lies beyond 12 + 2: the late moment opens its own clip
        assert_eq!(clips.len(), 2);

        let clips = merger().merge(&[
            Moment::new(0.0, 5.0, 0.2),
            Moment::new(4.0, 12.0, 0.3),
            Moment::new(13.0, 22.0, 0.95),
        ]);
        assert_eq!(spans(&clips), vec![(7.0, 22.0)]);
        assert_eq!(clips[0].score, 0.95);
    }

    #[test]
    fn cap_starts_at_overlong_best_moment() {
        let clips = merger().merge(&[Moment::new(0.0, 3.0, 0.1), Moment::new(2.0, 40.0, 0.8)]);
        assert_eq!(spans(&clips), vec![(2.0, 17.0)]);
    }

    #[test]
    fn mean_aggregate() {
        let mut policy = MergePolicy::default();
        policy.aggregate = ScoreAggregate::Mean;
        let clips = merge_moments(
            &[Moment::new(0.0, 2.0, 0.2), Moment::new(1.0, 3.0, 0.6)],
            &policy,
        )
        .unwrap();
        assert!((clips[0].score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn padding_is_clamped_to_video() {
        let mut policy = MergePolicy::default();
        policy.padding_secs = 1.0;
        policy.video_duration = Some(20.0);
        let clips = merge_moments(
            &[Moment::new(0.5, 2.0, 0.5), Moment::new(19.5, 20.0, 0.5)],
            &policy,
        )
        .unwrap();
        assert_eq!(spans(&clips), vec![(0.0, 3.0), (18.5, 20.0)]);
    }

    #[test]
    fn labels_accumulate_without_repeats() {
        let clips = merger().merge(&[
            Moment::new(0.0, 2.0, 0.5).with_label("person at door"),
            Moment::new(1.0, 3.0, 0.5).with_label("person at door"),
            Moment::new(2.0, 4.0, 0.5).with_label("package taken"),
            Moment::new(3.0, 5.0, 0.5),
        ]);
        assert_eq!(clips[0].label, "person at door; package taken");
    }

    #[test]
    fn shorter_label_inside_a_longer_one_is_kept() {
        let clips = merger().merge(&[
            Moment::new(0.0, 2.0, 0.5).with_label("person at door"),
            Moment::new(1.0, 3.0, 0.5).with_label("person"),
        ]);
        assert_eq!(clips[0].label, "person at door; person");
    }

    #[test]
    fn capped_duration_survives_rounding() {
        let mut over = 0;
        for i in 0..1000 {
            let start = 0.1 + 0.37 * i as f64;
            let clips = merger().merge(&[Moment::new(start, start + 40.0, 0.9)]);
            assert_eq!(clips.len(), 1);
            assert_eq!(clips[0].start, start);
            if clips[0].duration() > 15.0 {
                over += 1;
            }
            assert!(clips[0].duration() > 14.999);
        }
        assert_eq!(over, 0);
    }

    #[test]
    fn invalid_policy_is_rejected() {
        let mut policy = MergePolicy::default();
        policy.max_clip_secs = -1.0;
        assert!(MomentMerger::new(policy).is_err());
    }
}
