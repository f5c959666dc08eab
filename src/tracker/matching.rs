//! Association of per-frame detections with live tracks.

use std::fmt;

use ndarray::Array2;
use serde::Deserialize;

use crate::error::DetectionError;
use crate::tracker::rect::{Rect, iou_batch};
use crate::tracker::track::Track;

/// Class label the engine watches when none is configured.
pub const DEFAULT_TARGET_LABEL: &str = "person";

/// Detection input for the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Bounding box (constructed from TLBR x1, y1, x2, y2)
    pub bbox: Rect,
    /// Detection confidence score
    pub confidence: f32,
    /// Semantic class reported by the detector
    pub label: String,
}

impl Detection {
    /// A detection of the default target class.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self {
            bbox: Rect::from_tlbr(x1, y1, x2, y2),
            confidence,
            label: DEFAULT_TARGET_LABEL.to_string(),
        }
    }

    pub fn from_rect(bbox: Rect, confidence: f32) -> Self {
        Self {
            bbox,
            confidence,
            label: DEFAULT_TARGET_LABEL.to_string(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Boundary check applied before a detection may reach the state machine.
    pub fn validate(&self) -> Result<(), DetectionError> {
        let bbox = self.bbox.to_tlbr();
        let raw = [self.bbox.x, self.bbox.y, self.bbox.width, self.bbox.height];
        if raw.iter().chain(bbox.iter()).any(|c| !c.is_finite()) {
            return Err(DetectionError::NonFiniteBox { bbox });
        }
        if !self.bbox.is_well_formed() {
            return Err(DetectionError::InvertedBox { bbox });
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(DetectionError::ConfidenceOutOfRange {
                confidence: self.confidence,
            });
        }
        Ok(())
    }
}

/// Outcome of associating one frame's detections with the live tracks.
///
/// Indices refer to positions in the slices handed to [`Matcher::assign`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentResult {
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

impl AssignmentResult {
    fn all_unmatched(num_tracks: usize, num_detections: usize) -> Self {
        Self {
            matches: vec![],
            unmatched_tracks: (0..num_tracks).collect(),
            unmatched_detections: (0..num_detections).collect(),
        }
    }

    fn from_matches(matches: Vec<(usize, usize)>, num_tracks: usize, num_detections: usize) -> Self {
        let mut track_matched = vec![false; num_tracks];
        let mut det_matched = vec![false; num_detections];
        for &(t, d) in &matches {
            track_matched[t] = true;
            det_matched[d] = true;
        }
        Self {
            matches,
            unmatched_tracks: unmatched(&track_matched),
            unmatched_detections: unmatched(&det_matched),
        }
    }
}

fn unmatched(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, &m)| if m { None } else { Some(i) })
        .collect()
}

/// Tracking-by-association strategy.
///
/// Each detection maps to at most one track and each track to at most one
/// detection. Implementations never create or remove tracks.
pub trait Matcher: fmt::Debug + Send {
    fn assign(&self, tracks: &[Track], detections: &[Detection]) -> AssignmentResult;
}

/// Greedy IoU association, highest overlap first across all candidate pairs.
///
/// Pairs are committed in descending IoU order; ties go to the lower track id,
/// then the earlier detection. Only pairs with IoU strictly above `min_iou`
/// are candidates.
#[derive(Debug, Clone)]
pub struct GreedyIouMatcher {
    pub min_iou: f32,
}

impl GreedyIouMatcher {
    pub fn new(min_iou: f32) -> Self {
        Self { min_iou }
    }
}

impl Matcher for GreedyIouMatcher {
    fn assign(&self, tracks: &[Track], detections: &[Detection]) -> AssignmentResult {
        if tracks.is_empty() || detections.is_empty() {
            return AssignmentResult::all_unmatched(tracks.len(), detections.len());
        }

        let ious = pairwise_iou(tracks, detections);
        let mut candidates: Vec<(usize, usize, f32)> = ious
            .indexed_iter()
            .filter(|&(_, &iou)| iou > self.min_iou)
            .map(|((t, d), &iou)| (t, d, iou))
            .collect();
        candidates.sort_by(|a, b| {
            b.2.total_cmp(&a.2)
                .then_with(|| tracks[a.0].track_id.cmp(&tracks[b.0].track_id))
                .then_with(|| a.1.cmp(&b.1))
        });

        let mut track_taken = vec![false; tracks.len()];
        let mut det_taken = vec![false; detections.len()];
        let mut matches = Vec::new();
        for (t, d, _) in candidates {
            if track_taken[t] || det_taken[d] {
                continue;
            }
            track_taken[t] = true;
            det_taken[d] = true;
            matches.push((t, d));
        }

        AssignmentResult::from_matches(matches, tracks.len(), detections.len())
    }
}

/// Globally optimal one-to-one association on the `1 - IoU` cost matrix,
/// solved with Jonker-Volgenant. Pairs at or below `min_iou` are discarded
/// after solving.
#[derive(Debug, Clone)]
pub struct HungarianMatcher {
    pub min_iou: f32,
}

impl HungarianMatcher {
    pub fn new(min_iou: f32) -> Self {
        Self { min_iou }
    }
}

impl Matcher for HungarianMatcher {
    fn assign(&self, tracks: &[Track], detections: &[Detection]) -> AssignmentResult {
        let (num_rows, num_cols) = (tracks.len(), detections.len());
        if num_rows == 0 || num_cols == 0 {
            return AssignmentResult::all_unmatched(num_rows, num_cols);
        }

        let ious = pairwise_iou(tracks, detections);
        let size = num_rows.max(num_cols);
        let mut padded = Array2::<f64>::from_elem((size, size), 1e6);
        for ((i, j), &iou) in ious.indexed_iter() {
            padded[[i, j]] = 1.0 - iou as f64;
        }

        let mut matches = Vec::new();
        match lapjv::lapjv(&padded) {
            Ok((row_to_col, _)) => {
                for (row, &col) in row_to_col.iter().enumerate().take(num_rows) {
                    if col < num_cols && ious[[row, col]] > self.min_iou {
                        matches.push((row, col));
                    }
                }
            }
            Err(e) => {
                log::warn!("assignment solver failed, leaving frame unmatched: {:?}", e);
            }
        }

        AssignmentResult::from_matches(matches, num_rows, num_cols)
    }
}

fn pairwise_iou(tracks: &[Track], detections: &[Detection]) -> Array2<f32> {
    let track_rects: Vec<Rect> = tracks.iter().map(|t| t.rect()).collect();
    let det_rects: Vec<Rect> = detections.iter().map(|d| d.bbox).collect();
    iou_batch(&track_rects, &det_rects)
}

/// Configurable choice of [`Matcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherKind {
    #[default]
    Greedy,
    Hungarian,
}

impl MatcherKind {
    pub fn build(self, min_iou: f32) -> Box<dyn Matcher> {
        match self {
            MatcherKind::Greedy => Box::new(GreedyIouMatcher::new(min_iou)),
            MatcherKind::Hungarian => Box::new(HungarianMatcher::new(min_iou)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn track(id: u64, x1: f32, y1: f32, x2: f32, y2: f32) -> Track {
        Track::new(id, &Detection::new(x1, y1, x2, y2, 0.9), now())
    }

    #[test]
    fn test_validate_rejects_malformed() {
        assert!(Detection::new(0.0, 0.0, 10.0, 10.0, 0.5).validate().is_ok());
        assert!(matches!(
            Detection::new(10.0, 0.0, 0.0, 10.0, 0.5).validate(),
            Err(DetectionError::InvertedBox { .. })
        ));
        assert!(matches!(
            Detection::new(0.0, 0.0, f32::NAN, 10.0, 0.5).validate(),
            Err(DetectionError::NonFiniteBox { .. })
        ));
        assert!(matches!(
            Detection::new(0.0, 0.0, 10.0, 10.0, 1.5).validate(),
            Err(DetectionError::ConfidenceOutOfRange { .. })
        ));
        assert!(Detection::new(0.0, 0.0, 10.0, 10.0, f32::NAN).validate().is_err());
    }

    #[test]
    fn test_no_tracks_all_detections_new() {
        let dets = vec![Detection::new(0.0, 0.0, 10.0, 10.0, 0.9)];
        let result = GreedyIouMatcher::new(0.3).assign(&[], &dets);
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_no_detections_all_tracks_unmatched() {
        let tracks = vec![track(1, 0.0, 0.0, 10.0, 10.0), track(2, 50.0, 50.0, 60.0, 60.0)];
        let result = GreedyIouMatcher::new(0.3).assign(&tracks, &[]);
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_tracks, vec![0, 1]);
    }

    #[test]
    fn test_below_threshold_spawns() {
        let tracks = vec![track(1, 0.0, 0.0, 10.0, 10.0)];
        let dets = vec![Detection::new(8.0, 8.0, 18.0, 18.0, 0.9)];
        let result = GreedyIouMatcher::new(0.3).assign(&tracks, &dets);
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_tracks, vec![0]);
        assert_eq!(result.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_greedy_highest_iou_first() {
        // Detection 0 is the best match for both tracks. Track 2 overlaps it
        // more, so it wins and track 1 falls back to detection 1.
        let tracks = vec![track(1, 0.0, 0.0, 100.0, 100.0), track(2, 40.0, 0.0, 140.0, 100.0)];
        let dets = vec![
            Detection::new(30.0, 0.0, 130.0, 100.0, 0.9),
            Detection::new(-40.0, 0.0, 60.0, 100.0, 0.9),
        ];
        let result = GreedyIouMatcher::new(0.3).assign(&tracks, &dets);
        assert_eq!(result.matches, vec![(1, 0), (0, 1)]);
        assert!(result.unmatched_tracks.is_empty());
        assert!(result.unmatched_detections.is_empty());
    }

    #[test]
    fn test_greedy_tie_goes_to_lower_track_id() {
        let tracks = vec![track(7, 0.0, 0.0, 10.0, 10.0), track(3, 0.0, 0.0, 10.0, 10.0)];
        let dets = vec![Detection::new(0.0, 0.0, 10.0, 10.0, 0.9)];
        let result = GreedyIouMatcher::new(0.3).assign(&tracks, &dets);
        assert_eq!(result.matches, vec![(1, 0)]);
        assert_eq!(result.unmatched_tracks, vec![0]);
    }

    #[test]
    fn test_hungarian_agrees_on_clear_scene() {
        let tracks = vec![track(1, 0.0, 0.0, 10.0, 10.0), track(2, 100.0, 100.0, 110.0, 110.0)];
        let dets = vec![
            Detection::new(101.0, 100.0, 111.0, 110.0, 0.9),
            Detection::new(1.0, 0.0, 11.0, 10.0, 0.9),
            Detection::new(500.0, 500.0, 510.0, 510.0, 0.9),
        ];
        let mut greedy = GreedyIouMatcher::new(0.3).assign(&tracks, &dets);
        let mut hungarian = HungarianMatcher::new(0.3).assign(&tracks, &dets);
        greedy.matches.sort();
        hungarian.matches.sort();
        assert_eq!(greedy, hungarian);
        assert_eq!(hungarian.matches, vec![(0, 1), (1, 0)]);
        assert_eq!(hungarian.unmatched_detections, vec![2]);
    }

    #[test]
    fn test_hungarian_rejects_low_overlap() {
        let tracks = vec![track(1, 0.0, 0.0, 10.0, 10.0)];
        let dets = vec![
            Detection::new(9.0, 9.0, 19.0, 19.0, 0.9),
            Detection::new(200.0, 200.0, 210.0, 210.0, 0.9),
        ];
        let result = HungarianMatcher::new(0.3).assign(&tracks, &dets);
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_tracks, vec![0]);
        assert_eq!(result.unmatched_detections, vec![0, 1]);
    }
}
