//! Builder for creating Detection objects from various input formats.

use crate::tracker::{DEFAULT_TARGET_LABEL, Detection, Rect};

/// Builder for creating `Detection` objects from various input formats.
#[derive(Debug, Clone)]
pub struct DetectionBuilder {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
    label: String,
}

impl Default for DetectionBuilder {
    fn default() -> Self {
        Self {
            x1: 0.0,
            y1: 0.0,
            x2: 0.0,
            y2: 0.0,
            confidence: 0.0,
            label: DEFAULT_TARGET_LABEL.to_string(),
        }
    }
}

impl DetectionBuilder {
    /// Create a new detection builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bounding box in TLBR format (x1, y1, x2, y2).
    pub fn tlbr(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.x1 = x1;
        self.y1 = y1;
        self.x2 = x2;
        self.y2 = y2;
        self
    }

    /// Set bounding box from an `[x1, y1, x2, y2]` array.
    pub fn bbox(self, bbox: [f32; 4]) -> Self {
        self.tlbr(bbox[0], bbox[1], bbox[2], bbox[3])
    }

    /// Set bounding box in XYWH format (center_x, center_y, width, height).
    pub fn xywh(mut self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.x1 = cx - w / 2.0;
        self.y1 = cy - h / 2.0;
        self.x2 = cx + w / 2.0;
        self.y2 = cy + h / 2.0;
        self
    }

    /// Set bounding box in TLWH format (left, top, width, height).
    pub fn tlwh(mut self, x: f32, y: f32, w: f32, h: f32) -> Self {
        self.x1 = x;
        self.y1 = y;
        self.x2 = x + w;
        self.y2 = y + h;
        self
    }

    /// Set the confidence score.
    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Set the class label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Build the final `Detection`. No validation happens here; the engine
    /// checks detections at its boundary.
    pub fn build(self) -> Detection {
        Detection::from_rect(
            Rect::from_tlbr(self.x1, self.y1, self.x2, self.y2),
            self.confidence,
        )
        .with_label(self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_builder() {
        let det = DetectionBuilder::new()
            .tlbr(10.0, 20.0, 50.0, 80.0)
            .confidence(0.95)
            .build();

        assert_eq!(det.confidence, 0.95);
        assert_eq!(det.label, "person");
        assert_eq!(det.bbox.to_tlbr(), [10.0, 20.0, 50.0, 80.0]);
    }

    #[test]
    fn test_center_and_corner_formats_agree() {
        let a = DetectionBuilder::new().xywh(30.0, 50.0, 40.0, 60.0).build();
        let b = DetectionBuilder::new().tlwh(10.0, 20.0, 40.0, 60.0).build();
        assert_eq!(a.bbox, b.bbox);
    }

    #[test]
    fn test_label_override() {
        let det = DetectionBuilder::new()
            .bbox([0.0, 0.0, 1.0, 1.0])
            .label("cat")
            .build();
        assert_eq!(det.label, "cat");
    }
}
