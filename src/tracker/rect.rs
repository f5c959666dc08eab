/// Axis-aligned bounding box in the coordinate space reported by the detector.
///
/// Stored as top-left corner plus dimensions. Detectors and the alert schema
/// exchange boxes in TLBR order (`[x1, y1, x2, y2]`); use [`Rect::from_tlbr`]
/// and [`Rect::to_tlbr`] at those boundaries. No unit conversion is performed,
/// so pixel and normalized coordinates must not be mixed within one engine.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    /// Top-left x coordinate
    pub x: f32,
    /// Top-left y coordinate
    pub y: f32,
    /// Width of the bounding box
    pub width: f32,
    /// Height of the bounding box
    pub height: f32,
}

impl Rect {
    /// Create a new Rect from top-left coordinates and dimensions (TLWH format).
    #[inline]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a Rect from TLBR format (top-left x, top-left y, bottom-right x, bottom-right y).
    #[inline]
    pub fn from_tlbr(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    /// Convert to TLBR format: (x1, y1, x2, y2).
    #[inline]
    pub fn to_tlbr(&self) -> [f32; 4] {
        [self.x, self.y, self.x + self.width, self.y + self.height]
    }

    /// True when every coordinate is finite and the box has positive extent.
    pub fn is_well_formed(&self) -> bool {
        let coords = [self.x, self.y, self.width, self.height];
        coords.iter().all(|c| c.is_finite()) && self.width > 0.0 && self.height > 0.0
    }

    /// Get the center point of the bounding box.
    #[inline]
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Get the area of the bounding box.
    #[inline]
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Width divided by height; zero for a degenerate box.
    #[inline]
    pub fn aspect_ratio(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        }
    }

    /// Euclidean distance between the centers of two boxes.
    pub fn center_distance(&self, other: &Rect) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    /// Calculate Intersection over Union (IoU) with another bounding box.
    ///
    /// Symmetric, always within `[0, 1]`, and zero for disjoint boxes.
    pub fn iou(&self, other: &Rect) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter_width = (x2 - x1).max(0.0);
        let inter_height = (y2 - y1).max(0.0);
        let inter_area = inter_width * inter_height;

        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            (inter_area / union_area).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

use ndarray::Array2;

/// Calculate IoU matrix between two sets of bounding boxes.
///
/// Returns a matrix of shape (M, N) where M is the length of `boxes_a`
/// and N is the length of `boxes_b`.
pub fn iou_batch(boxes_a: &[Rect], boxes_b: &[Rect]) -> Array2<f32> {
    let mut ious = Array2::zeros((boxes_a.len(), boxes_b.len()));
    for (i, a) in boxes_a.iter().enumerate() {
        for (j, b) in boxes_b.iter().enumerate() {
            ious[[i, j]] = a.iou(b);
        }
    }
    ious
}
