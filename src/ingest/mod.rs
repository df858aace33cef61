//! Detector feeds.
//!
//! The object detector is external; this module only reads what it produced:
//! - local JSON-lines detection logs (`JsonLinesFeed`)
//! - synthetic scenarios for tests and demos (`stub://<scenario>`)
//!
//! Feeds yield frames with non-decreasing timestamps. Ordering violations are
//! left for the associator to reject.

mod jsonl;
mod synthetic;

use anyhow::{anyhow, Result};

use crate::detect::DetectionFrame;

pub use jsonl::JsonLinesFeed;
pub use synthetic::{Scenario, SyntheticFeed};

/// Pull interface over one source's detector output.
pub trait DetectionFeed: Send {
    /// Human readable origin, for logs.
    fn name(&self) -> &str;

    /// The next frame, or `None` once the feed is exhausted.
    fn next_frame(&mut self) -> Result<Option<DetectionFrame>>;
}

/// Open a feed from its configured location: `stub://<scenario>` or a local path.
pub fn open_feed(location: &str) -> Result<Box<dyn DetectionFeed>> {
    if !is_local_location(location) {
        return Err(anyhow!(
            "detection feeds only support local paths or stub:// scenarios (got {:?})",
            location
        ));
    }
    if location.starts_with("stub://") {
        Ok(Box::new(SyntheticFeed::from_url(location)?))
    } else {
        Ok(Box::new(JsonLinesFeed::open(location)?))
    }
}

fn is_local_location(location: &str) -> bool {
    if location.trim().is_empty() {
        return false;
    }
    if location.starts_with("stub://") {
        return true;
    }
    !location.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_locations_are_refused() {
        assert!(open_feed("rtsp://10.0.0.2/stream").is_err());
        assert!(open_feed("").is_err());
        assert!(open_feed("stub://nonsense").is_err());
    }

    #[test]
    fn stub_locations_open_synthetic_feeds() {
        let mut feed = open_feed("stub://walk").unwrap();
        assert_eq!(feed.name(), "stub://walk");
        assert!(feed.next_frame().unwrap().is_some());
    }
}
