mod bbox;
mod result;

pub use bbox::{iou, BoundingBox, Point};
pub use result::{Detection, DetectionError, DetectionFrame, ObjectClass};
