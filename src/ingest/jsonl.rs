use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::detect::{BoundingBox, Detection, DetectionFrame, ObjectClass};

use super::DetectionFeed;

#[derive(Debug, Deserialize)]
struct FrameRecord {
    timestamp: f64,
    #[serde(default)]
    detections: Vec<DetectionRecord>,
}

#[derive(Debug, Deserialize)]
struct DetectionRecord {
    label: String,
    bbox: [f32; 4],
    confidence: f32,
    #[serde(default)]
    box_format: BoxFormat,
}

#[derive(Debug, Default, Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum BoxFormat {
    #[default]
    Xywh,
    Xyxy,
}

impl FrameRecord {
    fn into_frame(self) -> DetectionFrame {
        let timestamp = self.timestamp;
        let detections = self
            .detections
            .into_iter()
            .map(|d| {
                let [a, b, c, e] = d.bbox;
                let bbox = match d.box_format {
                    BoxFormat::Xywh => BoundingBox::new(a, b, c, e),
                    BoxFormat::Xyxy => BoundingBox::from_corners(a, b, c, e),
                };
                Detection::new(ObjectClass::from_label(&d.label), bbox, d.confidence, timestamp)
            })
            .collect();
        DetectionFrame::new(timestamp, detections)
    }
}

/// One JSON object per line:
/// `{"timestamp": 3.0, "detections": [{"label": "person", "bbox": [x, y, w, h], "confidence": 0.9}]}`.
///
/// Lines that fail to parse are logged and skipped.
pub struct JsonLinesFeed<R: BufRead + Send = BufReader<File>> {
    name: String,
    reader: R,
    line_no: usize,
    skipped: usize,
}

impl JsonLinesFeed {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| anyhow!("failed to open detection log {}: {}", path.display(), e))?;
        log::info!("JsonLinesFeed: reading {}", path.display());
        Ok(Self::from_reader(path.display().to_string(), BufReader::new(file)))
    }
}

impl<R: BufRead + Send> JsonLinesFeed<R> {
    pub fn from_reader(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
            line_no: 0,
            skipped: 0,
        }
    }

    /// Lines dropped as malformed so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<R: BufRead + Send> DetectionFeed for JsonLinesFeed<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> Result<Option<DetectionFrame>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<FrameRecord>(trimmed) {
                Ok(record) => return Ok(Some(record.into_frame())),
                Err(e) => {
                    self.skipped += 1;
                    log::warn!("{}:{}: skipping malformed frame: {}", self.name, self.line_no, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn feed(text: &str) -> JsonLinesFeed<Cursor<Vec<u8>>> {
        JsonLinesFeed::from_reader("test", Cursor::new(text.as_bytes().to_vec()))
    }

    #[test]
    fn parses_frames_and_box_formats() {
        let mut f = feed(concat!(
            r#"{"timestamp": 1.0, "detections": [{"label": "car", "bbox": [10, 20, 30, 40], "confidence": 0.8}]}"#,
            "\n\n",
            r#"{"timestamp": 2.0, "detections": [{"label": "person", "bbox": [10, 20, 30, 40], "confidence": 0.6, "box_format": "xyxy"}]}"#,
            "\n",
            r#"{"timestamp": 3.0}"#,
            "\n",
        ));
        let first = f.next_frame().unwrap().unwrap();
        assert_eq!(first.detections[0].class, ObjectClass::Vehicle);
        assert_eq!(first.detections[0].bbox, BoundingBox::new(10.0, 20.0, 30.0, 40.0));

        let second = f.next_frame().unwrap().unwrap();
        assert_eq!(second.detections[0].bbox, BoundingBox::new(10.0, 20.0, 20.0, 20.0));
        assert_eq!(second.detections[0].timestamp, 2.0);

        let third = f.next_frame().unwrap().unwrap();
        assert!(third.detections.is_empty());
        assert!(f.next_frame().unwrap().is_none());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let mut f = feed(concat!(
            "{not json}\n",
            r#"{"timestamp": 1.0, "detections": [{"label": "person", "bbox": [1, 2], "confidence": 0.8}]}"#,
            "\n",
            r#"{"timestamp": 4.0, "detections": []}"#,
            "\n",
        ));
        let frame = f.next_frame().unwrap().unwrap();
        assert_eq!(frame.timestamp, 4.0);
        assert_eq!(f.skipped(), 2);
    }
}
