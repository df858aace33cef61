use serde::{Deserialize, Serialize};

use super::bbox::BoundingBox;

/// Detector output for a single frame.
#[derive(Clone, Debug, Default)]
pub struct DetectionFrame {
    /// Frame timestamp in seconds.
    pub timestamp: f64,
    /// Zero or more detections, in no particular order.
    pub detections: Vec<Detection>,
}

impl DetectionFrame {
    pub fn new(timestamp: f64, detections: Vec<Detection>) -> Self {
        Self {
            timestamp,
            detections,
        }
    }

    pub fn empty(timestamp: f64) -> Self {
        Self::new(timestamp, Vec::new())
    }
}

/// One observation in one frame. Ephemeral: dropped after association.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class: ObjectClass,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub timestamp: f64,
}

impl Detection {
    pub fn new(class: ObjectClass, bbox: BoundingBox, confidence: f32, timestamp: f64) -> Self {
        Self {
            class,
            bbox,
            confidence,
            timestamp,
        }
    }

    /// Check the detection against ingestion rules.
    ///
    /// `last_timestamp` is the clock of the last processed frame; detections older
    /// than it are out of order.
    pub fn validate(
        &self,
        last_timestamp: Option<f64>,
        min_confidence: f32,
    ) -> Result<(), DetectionError> {
        if !self.bbox.is_finite() || !self.timestamp.is_finite() || !self.confidence.is_finite() {
            return Err(DetectionError::NonFinite);
        }
        if self.bbox.width <= 0.0 || self.bbox.height <= 0.0 {
            return Err(DetectionError::EmptyBox {
                width: self.bbox.width,
                height: self.bbox.height,
            });
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(DetectionError::ConfidenceOutOfRange(self.confidence));
        }
        if self.confidence < min_confidence {
            return Err(DetectionError::BelowConfidenceFloor {
                confidence: self.confidence,
                floor: min_confidence,
            });
        }
        if let Some(last) = last_timestamp {
            if self.timestamp < last {
                return Err(DetectionError::OutOfOrder {
                    timestamp: self.timestamp,
                    last,
                });
            }
        }
        Ok(())
    }
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Person,
    Vehicle,
    Animal,
    Package,
    Unknown,
}

impl ObjectClass {
    /// Map a raw detector label onto a class. Unrecognised labels become `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "person" | "pedestrian" | "people" => ObjectClass::Person,
            "vehicle" | "car" | "truck" | "bus" | "motorcycle" => ObjectClass::Vehicle,
            "animal" | "dog" | "cat" | "bird" => ObjectClass::Animal,
            "package" | "box" | "bag" | "backpack" | "suitcase" => ObjectClass::Package,
            _ => ObjectClass::Unknown,
        }
    }

    /// Strict parse used by configuration: unknown labels are an error.
    pub fn parse(label: &str) -> Option<Self> {
        match Self::from_label(label) {
            ObjectClass::Unknown if label.trim().to_lowercase() != "unknown" => None,
            class => Some(class),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectClass::Person => "person",
            ObjectClass::Vehicle => "vehicle",
            ObjectClass::Animal => "animal",
            ObjectClass::Package => "package",
            ObjectClass::Unknown => "unknown",
        }
    }
}

/// Why a detection was rejected at ingestion.
#[derive(Clone, Debug, PartialEq)]
pub enum DetectionError {
    NonFinite,
    EmptyBox { width: f32, height: f32 },
    ConfidenceOutOfRange(f32),
    BelowConfidenceFloor { confidence: f32, floor: f32 },
    OutOfOrder { timestamp: f64, last: f64 },
}

impl std::fmt::Display for DetectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionError::NonFinite => write!(f, "non-finite coordinate, confidence or timestamp"),
            DetectionError::EmptyBox { width, height } => {
                write!(f, "bounding box has no area ({}x{})", width, height)
            }
            DetectionError::ConfidenceOutOfRange(c) => {
                write!(f, "confidence {} outside 0..=1", c)
            }
            DetectionError::BelowConfidenceFloor { confidence, floor } => {
                write!(f, "confidence {} below floor {}", confidence, floor)
            }
            DetectionError::OutOfOrder { timestamp, last } => write!(
                f,
                "timestamp {:.3} precedes last processed frame {:.3}",
                timestamp, last
            ),
        }
    }
}

impl std::error::Error for DetectionError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(x: f32, y: f32, ts: f64) -> Detection {
        Detection::new(ObjectClass::Person, BoundingBox::new(x, y, 40.0, 80.0), 0.9, ts)
    }

    #[test]
    fn accepts_well_formed_detection() {
        assert_eq!(person(10.0, 10.0, 1.0).validate(Some(0.5), 0.0), Ok(()));
    }

    #[test]
    fn rejects_zero_and_negative_area() {
        let mut det = person(0.0, 0.0, 0.0);
        det.bbox.width = 0.0;
        assert!(matches!(det.validate(None, 0.0), Err(DetectionError::EmptyBox { .. })));
        det.bbox.width = 10.0;
        det.bbox.height = -3.0;
        assert!(matches!(det.validate(None, 0.0), Err(DetectionError::EmptyBox { .. })));
    }

    #[test]
    fn rejects_out_of_order_timestamp() {
        let det = person(0.0, 0.0, 4.0);
        assert_eq!(
            det.validate(Some(5.0), 0.0),
            Err(DetectionError::OutOfOrder {
                timestamp: 4.0,
                last: 5.0
            })
        );
        // equal timestamps are not out of order
        assert!(det.validate(Some(4.0), 0.0).is_ok());
    }

    #[test]
    fn rejects_bad_confidence() {
        let mut det = person(0.0, 0.0, 0.0);
        det.confidence = 1.2;
        assert!(det.validate(None, 0.0).is_err());
        det.confidence = 0.2;
        assert!(det.validate(None, 0.3).is_err());
        det.confidence = f32::NAN;
        assert_eq!(det.validate(None, 0.0), Err(DetectionError::NonFinite));
    }

    #[test]
    fn labels_map_to_classes() {
        assert_eq!(ObjectClass::from_label("Person"), ObjectClass::Person);
        assert_eq!(ObjectClass::from_label("truck"), ObjectClass::Vehicle);
        assert_eq!(ObjectClass::from_label("dog"), ObjectClass::Animal);
        assert_eq!(ObjectClass::from_label("toaster"), ObjectClass::Unknown);
        assert_eq!(ObjectClass::parse("toaster"), None);
        assert_eq!(ObjectClass::parse("unknown"), Some(ObjectClass::Unknown));
        assert_eq!(ObjectClass::parse("car"), Some(ObjectClass::Vehicle));
    }
}
