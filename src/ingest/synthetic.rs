use anyhow::{anyhow, Result};

use crate::detect::{BoundingBox, Detection, DetectionFrame, ObjectClass};

use super::DetectionFeed;

/// Scripted scenes, one frame per second.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scenario {
    /// One person standing still with small jitter.
    Loiter,
    /// Four people standing close together.
    Crowd,
    /// One person crossing the frame.
    Walk,
    /// A car parked in place.
    Parked,
}

impl Scenario {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "loiter" => Some(Scenario::Loiter),
            "crowd" => Some(Scenario::Crowd),
            "walk" => Some(Scenario::Walk),
            "parked" => Some(Scenario::Parked),
            _ => None,
        }
    }

    /// Frames long enough for the scene to trigger under default settings.
    pub fn default_frames(&self) -> u64 {
        match self {
            Scenario::Loiter => 40,
            Scenario::Crowd => 20,
            Scenario::Walk => 30,
            Scenario::Parked => 30,
        }
    }
}

/// Deterministic detection feed for `stub://` sources.
pub struct SyntheticFeed {
    name: String,
    scenario: Scenario,
    frame: u64,
    frames: u64,
}

impl SyntheticFeed {
    pub fn new(scenario: Scenario, frames: u64) -> Self {
        Self {
            name: format!("synthetic:{:?}", scenario).to_lowercase(),
            scenario,
            frame: 0,
            frames,
        }
    }

    /// `stub://<scenario>` with an optional `?frames=N`.
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic feed url must start with stub://"))?;
        let (name, query) = match rest.split_once('?') {
            Some((name, query)) => (name, Some(query)),
            None => (rest, None),
        };
        let scenario =
            Scenario::parse(name).ok_or_else(|| anyhow!("unknown synthetic scenario {:?}", name))?;
        let frames = match query.and_then(|q| q.strip_prefix("frames=")) {
            Some(n) => n
                .parse::<u64>()
                .map_err(|_| anyhow!("invalid frame count {:?} in {}", n, url))?,
            None => scenario.default_frames(),
        };
        let mut feed = Self::new(scenario, frames);
        feed.name = url.to_string();
        Ok(feed)
    }

    fn detections(&self, t: f64) -> Vec<Detection> {
        let jitter = if self.frame % 2 == 0 { 1.0 } else { -1.0 };
        let person = |x: f32, y: f32| {
            Detection::new(ObjectClass::Person, BoundingBox::new(x, y, 60.0, 120.0), 0.87, t)
        };
        match self.scenario {
            Scenario::Loiter => vec![person(300.0 + jitter, 200.0 - jitter)],
            Scenario::Crowd => vec![
                person(100.0 + jitter, 300.0),
                person(170.0, 300.0 + jitter),
                person(240.0 - jitter, 310.0),
                person(140.0, 380.0 - jitter),
            ],
            Scenario::Walk => vec![person(20.0 + 10.0 * self.frame as f32, 250.0)],
            Scenario::Parked => vec![Detection::new(
                ObjectClass::Vehicle,
                BoundingBox::new(400.0 + jitter, 320.0, 180.0, 90.0),
                0.93,
                t,
            )],
        }
    }
}

impl DetectionFeed for SyntheticFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> Result<Option<DetectionFrame>> {
        if self.frame >= self.frames {
            return Ok(None);
        }
        let t = self.frame as f64;
        let frame = DetectionFrame::new(t, self.detections(t));
        self.frame += 1;
        Ok(Some(frame))
    }
}
