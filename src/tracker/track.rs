//! Single subject track for persistence analysis.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::clock::seconds_between;
use crate::tracker::matching::Detection;
use crate::tracker::rect::Rect;
use crate::tracker::track_state::TrackState;

/// How displacement between consecutive observations is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplacementMetric {
    /// `1 - IoU` against the box recorded when the current stationary period
    /// began. Tolerance is a fraction in `[0, 1]`.
    #[default]
    AnchorIou,
    /// Distance between the centers of the previous and new box, in the
    /// detector's coordinate units.
    CenterDistance,
}

/// One physical subject observed across frames.
#[derive(Debug, Clone)]
pub struct Track {
    /// Unique identifier, never reused within an engine
    pub track_id: u64,
    /// Current state machine position
    pub state: TrackState,
    /// Most recent matched bounding box
    pub current_bbox: Rect,
    /// Box recorded at `stationary_since`
    pub anchor_bbox: Rect,
    /// Confidence of the most recent matched detection
    pub confidence: f32,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    /// Start of the current unbroken still period
    pub stationary_since: Option<DateTime<Utc>>,
    pub last_alert_at: Option<DateTime<Utc>>,
    /// Matched detections observed since `stationary_since`
    pub stationary_hits: u32,
    /// Matched detections over the whole lifetime
    pub hits: u32,
}

impl Track {
    /// Spawn a track from an unmatched detection. A new track starts its
    /// still period immediately.
    pub fn new(track_id: u64, detection: &Detection, now: DateTime<Utc>) -> Self {
        Self {
            track_id,
            state: TrackState::Tracking,
            current_bbox: detection.bbox,
            anchor_bbox: detection.bbox,
            confidence: detection.confidence,
            first_seen_at: now,
            last_seen_at: now,
            stationary_since: Some(now),
            last_alert_at: None,
            stationary_hits: 1,
            hits: 1,
        }
    }

    pub fn rect(&self) -> Rect {
        self.current_bbox
    }

    /// Displacement of `bbox` relative to this track under `metric`.
    pub fn displacement(&self, bbox: &Rect, metric: DisplacementMetric) -> f32 {
        match metric {
            DisplacementMetric::AnchorIou => 1.0 - self.anchor_bbox.iou(bbox),
            DisplacementMetric::CenterDistance => self.current_bbox.center_distance(bbox),
        }
    }

    /// Apply a matched detection. Returns whether the track was still this step.
    pub fn observe(
        &mut self,
        detection: &Detection,
        now: DateTime<Utc>,
        metric: DisplacementMetric,
        tolerance: f32,
    ) -> bool {
        let stationary = self.displacement(&detection.bbox, metric) <= tolerance;

        if stationary {
            self.stationary_hits += 1;
        } else {
            self.stationary_since = Some(now);
            self.anchor_bbox = detection.bbox;
            self.stationary_hits = 1;
            if self.state == TrackState::Alerting {
                self.state = TrackState::Tracking;
            }
        }

        self.current_bbox = detection.bbox;
        self.confidence = detection.confidence;
        self.last_seen_at = now;
        self.hits += 1;
        stationary
    }

    /// Seconds the track has been still as of `now`; zero if moving.
    pub fn stationary_seconds(&self, now: DateTime<Utc>) -> f64 {
        self.stationary_since
            .map(|since| seconds_between(now, since).max(0.0))
            .unwrap_or(0.0)
    }

    /// Seconds since the last matched detection.
    pub fn unseen_seconds(&self, now: DateTime<Utc>) -> f64 {
        seconds_between(now, self.last_seen_at)
    }

    pub fn is_expired(&self, now: DateTime<Utc>, expiry_seconds: f64) -> bool {
        self.unseen_seconds(now) > expiry_seconds
    }

    pub fn mark_alerting(&mut self) {
        self.state = TrackState::Alerting;
    }

    pub fn mark_alerted(&mut self, now: DateTime<Utc>) {
        self.state = TrackState::CoolingDown;
        self.last_alert_at = Some(now);
    }

    pub fn mark_tracking(&mut self) {
        self.state = TrackState::Tracking;
    }
}
