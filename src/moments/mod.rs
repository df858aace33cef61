//! Search moments and the evidence clips merged from them.
//!
//! Moments arrive already normalised to numeric seconds; the merger never
//! parses timestamps itself.

mod merge;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{non_negative, positive};

pub use merge::{merge_moments, MomentMerger};

const DEFAULT_GAP_TOLERANCE_SECS: f64 = 2.0;
const DEFAULT_MAX_CLIP_SECS: f64 = 15.0;
const DEFAULT_MOMENT_SCORE: f64 = 0.5;

fn default_score() -> f64 {
    DEFAULT_MOMENT_SCORE
}

/// One raw search hit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Moment {
    pub start: f64,
    pub end: f64,
    #[serde(alias = "confidence", default = "default_score")]
    pub score: f64,
    #[serde(default)]
    pub label: String,
}

impl Moment {
    pub fn new(start: f64, end: f64, score: f64) -> Self {
        Self {
            start,
            end,
            score,
            label: String::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Zero-length, reversed or non-finite moments are never merged.
    pub fn is_degenerate(&self) -> bool {
        !(self.start.is_finite() && self.end.is_finite() && self.score.is_finite())
            || self.end <= self.start
    }
}

/// A consolidated, duration-capped time range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvidenceClip {
    pub start: f64,
    pub end: f64,
    pub score: f64,
    pub moment_count: usize,
    #[serde(default)]
    pub label: String,
}

impl EvidenceClip {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn start_formatted(&self) -> String {
        format_timestamp(self.start)
    }

    pub fn end_formatted(&self) -> String {
        format_timestamp(self.end)
    }

    /// Feed a clip back into a merge.
    pub fn as_moment(&self) -> Moment {
        Moment {
            start: self.start,
            end: self.end,
            score: self.score,
            label: self.label.clone(),
        }
    }
}

/// `mm:ss`, truncating fractional seconds. Minutes are not wrapped into hours.
pub fn format_timestamp(seconds: f64) -> String {
    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    let mins = (seconds / 60.0).floor() as u64;
    let secs = (seconds % 60.0).floor() as u64;
    format!("{:02}:{:02}", mins, secs)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreAggregate {
    #[default]
    Max,
    Mean,
}

impl ScoreAggregate {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "max" => Some(ScoreAggregate::Max),
            "mean" | "avg" | "average" => Some(ScoreAggregate::Mean),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreAggregate::Max => "max",
            ScoreAggregate::Mean => "mean",
        }
    }
}

/// Merge tunables.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MergePolicy {
    /// Moments starting within this many seconds of the open clip's end join it.
    pub gap_tolerance_secs: f64,
    pub max_clip_secs: f64,
    /// Widens every moment on both sides before merging.
    pub padding_secs: f64,
    pub aggregate: ScoreAggregate,
    /// Clamp for padded moment ends, when the source video length is known.
    pub video_duration: Option<f64>,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            gap_tolerance_secs: DEFAULT_GAP_TOLERANCE_SECS,
            max_clip_secs: DEFAULT_MAX_CLIP_SECS,
            padding_secs: 0.0,
            aggregate: ScoreAggregate::Max,
            video_duration: None,
        }
    }
}

impl MergePolicy {
    pub fn validate(&self) -> Result<()> {
        non_negative("moments.gap_tolerance_secs", self.gap_tolerance_secs)?;
        positive("moments.max_clip_secs", self.max_clip_secs)?;
        non_negative("moments.padding_secs", self.padding_secs)?;
        if let Some(duration) = self.video_duration {
            positive("moments.video_duration", duration)?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MomentsFile {
    List(Vec<Moment>),
    Wrapped { moments: Vec<Moment> },
}

/// Read a moment set: either a JSON array or an object with a `moments` array.
pub fn load_moments(path: &Path) -> Result<Vec<Moment>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read moments file {}: {}", path.display(), e))?;
    let parsed: MomentsFile = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("failed to parse moments file {}: {}", path.display(), e))?;
    Ok(match parsed {
        MomentsFile::List(moments) => moments,
        MomentsFile::Wrapped { moments } => moments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn timestamps_format_as_minutes_and_seconds() {
        assert_eq!(format_timestamp(0.0), "00:00");
        assert_eq!(format_timestamp(75.9), "01:15");
        assert_eq!(format_timestamp(3600.0), "60:00");
        assert_eq!(format_timestamp(-3.0), "00:00");
    }

    #[test]
    fn degenerate_moments() {
        assert!(Moment::new(5.0, 5.0, 0.4).is_degenerate());
        assert!(Moment::new(5.0, 4.0, 0.4).is_degenerate());
        assert!(Moment::new(f64::NAN, 4.0, 0.4).is_degenerate());
        assert!(Moment::new(1.0, 4.0, f64::INFINITY).is_degenerate());
        assert!(!Moment::new(1.0, 4.0, 0.4).is_degenerate());
    }

    #[test]
    fn policy_validation() {
        assert!(MergePolicy::default().validate().is_ok());
        let mut p = MergePolicy::default();
        p.max_clip_secs = 0.0;
        assert!(p.validate().is_err());
        let mut p = MergePolicy::default();
        p.gap_tolerance_secs = -1.0;
        assert!(p.validate().is_err());
        let mut p = MergePolicy::default();
        p.video_duration = Some(0.0);
        assert!(p.validate().is_err());
    }

    #[test]
    fn aggregate_names() {
        assert_eq!(ScoreAggregate::parse("MEAN"), Some(ScoreAggregate::Mean));
        assert_eq!(ScoreAggregate::parse("max"), Some(ScoreAggregate::Max));
        assert_eq!(ScoreAggregate::parse("median"), None);
    }

    #[test]
    fn loads_plain_and_wrapped_lists() {
        let mut plain = tempfile::NamedTempFile::new().unwrap();
        write!(
            plain,
            r#"[{{"start": 1, "end": 2, "confidence": 0.7, "label": "person at door"}}, {{"start": 4, "end": 6}}]"#
        )
        .unwrap();
        let moments = load_moments(plain.path()).unwrap();
        assert_eq!(moments.len(), 2);
        assert_eq!(moments[0].score, 0.7);
        assert_eq!(moments[1].score, 0.5);
        assert_eq!(moments[1].label, "");

        let mut wrapped = tempfile::NamedTempFile::new().unwrap();
        write!(wrapped, r#"{{"moments": [{{"start": 1, "end": 2, "score": 0.2}}]}}"#).unwrap();
        assert_eq!(load_moments(wrapped.path()).unwrap().len(), 1);

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        write!(broken, "not json").unwrap();
        assert!(load_moments(broken.path()).is_err());
    }
}
