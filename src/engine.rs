//! Per-frame driver tying boundary validation, tracking and formatting
//! together.
//!
//! One engine serves one camera feed. It is driven by a single caller, one
//! [`Engine::step`] per sampled frame in timestamp order, and performs no I/O.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::alert::{AlertFormatter, AlertProfile, AlertRecord, AspectRatioClassifier, PostureClassifier};
use crate::error::{DetectionError, EngineError};
use crate::tracker::{DEFAULT_TARGET_LABEL, Detection, Matcher, PersistenceTracker, Track, TrackerConfig};

/// What to do with a frame stamped earlier than the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockRegressionPolicy {
    /// Refuse the step; no state changes.
    #[default]
    Reject,
    /// Process the step at the previous timestamp so no time elapses.
    Clamp,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Only detections carrying this label are considered
    pub target_label: String,
    /// Detections below this confidence are dropped before matching
    pub min_confidence: f32,
    pub clock_regression: ClockRegressionPolicy,
    pub tracker: TrackerConfig,
    pub alert: AlertProfile,
    /// Width/height ratio above which a box is reported as horizontal
    pub horizontal_aspect_ratio: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_label: DEFAULT_TARGET_LABEL.to_string(),
            min_confidence: 0.3,
            clock_regression: ClockRegressionPolicy::Reject,
            tracker: TrackerConfig::default(),
            alert: AlertProfile::default(),
            horizontal_aspect_ratio: 1.0,
        }
    }
}

/// One sampled frame's worth of detector output.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub frame_id: u64,
    pub timestamp: DateTime<Utc>,
    pub detections: Vec<Detection>,
}

impl Frame {
    pub fn new(frame_id: u64, timestamp: DateTime<Utc>, detections: Vec<Detection>) -> Self {
        Self {
            frame_id,
            timestamp,
            detections,
        }
    }
}

/// Result of one processing step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub frame_id: u64,
    /// Time the step was processed at (differs from the frame's under clamping)
    pub timestamp: DateTime<Utc>,
    pub alerts: Vec<AlertRecord>,
    /// Detections discarded as malformed
    pub rejected: Vec<DetectionError>,
    /// Well-formed detections ignored for label or confidence
    pub filtered: usize,
    pub live_tracks: usize,
}

pub struct Engine {
    target_label: String,
    min_confidence: f32,
    clock_regression: ClockRegressionPolicy,
    tracker: PersistenceTracker,
    formatter: AlertFormatter,
    last_step_at: Option<DateTime<Utc>>,
    alerts_emitted: u64,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let classifier = AspectRatioClassifier {
            horizontal_ratio: config.horizontal_aspect_ratio,
        };
        let formatter = AlertFormatter::with_classifier(
            config.alert,
            config.tracker.persistence_threshold_seconds,
            Box::new(classifier),
        );
        Self {
            target_label: config.target_label,
            min_confidence: config.min_confidence,
            clock_regression: config.clock_regression,
            tracker: PersistenceTracker::new(config.tracker),
            formatter,
            last_step_at: None,
            alerts_emitted: 0,
        }
    }

    /// Replace the posture classifier used when formatting alerts.
    pub fn with_classifier(mut self, classifier: Box<dyn PostureClassifier>) -> Self {
        let threshold = self.tracker.config().persistence_threshold_seconds;
        self.formatter =
            AlertFormatter::with_classifier(self.formatter.profile().clone(), threshold, classifier);
        self
    }

    /// Replace the association strategy. Must be called before the first step.
    pub fn with_matcher(mut self, matcher: Box<dyn Matcher>) -> Self {
        self.tracker = PersistenceTracker::with_matcher(self.tracker.config().clone(), matcher);
        self
    }

    pub fn tracks(&self) -> &[Track] {
        self.tracker.tracks()
    }

    pub fn alerts_emitted(&self) -> u64 {
        self.alerts_emitted
    }

    pub fn last_step_at(&self) -> Option<DateTime<Utc>> {
        self.last_step_at
    }

    /// Process one frame.
    pub fn step(&mut self, frame: Frame) -> Result<StepReport, EngineError> {
        let now = self.effective_time(frame.timestamp)?;
        let (detections, rejected, filtered) = self.admit(frame.frame_id, frame.detections);

        let triggers = self.tracker.update(detections, now);
        self.last_step_at = Some(now);

        let alerts: Vec<AlertRecord> = triggers.iter().map(|t| self.formatter.format(t)).collect();
        for alert in &alerts {
            log::info!(
                "ALERT {} track={} persisted={:.1}s confidence={:.2} frame={}",
                alert.metadata.alert_type,
                alert.metadata.track_id,
                alert.how_much.persistence_seconds,
                alert.how.confidence_score,
                frame.frame_id
            );
        }
        self.alerts_emitted += alerts.len() as u64;

        Ok(StepReport {
            frame_id: frame.frame_id,
            timestamp: now,
            alerts,
            rejected,
            filtered,
            live_tracks: self.tracker.tracks().len(),
        })
    }

    fn effective_time(&self, presented: DateTime<Utc>) -> Result<DateTime<Utc>, EngineError> {
        match self.last_step_at {
            Some(previous) if presented < previous => match self.clock_regression {
                ClockRegressionPolicy::Reject => {
                    log::warn!(
                        "rejecting frame stamped {} before previous step {}",
                        presented,
                        previous
                    );
                    Err(EngineError::ClockRegression {
                        previous,
                        presented,
                    })
                }
                ClockRegressionPolicy::Clamp => {
                    log::warn!("clamping frame stamped {} to previous step {}", presented, previous);
                    Ok(previous)
                }
            },
            _ => Ok(presented),
        }
    }

    /// Split raw detections into admitted, malformed and filtered.
    fn admit(
        &self,
        frame_id: u64,
        detections: Vec<Detection>,
    ) -> (Vec<Detection>, Vec<DetectionError>, usize) {
        let mut admitted = Vec::with_capacity(detections.len());
        let mut rejected = Vec::new();
        let mut filtered = 0;

        for det in detections {
            if let Err(e) = det.validate() {
                log::warn!("frame {}: discarding malformed detection: {}", frame_id, e);
                rejected.push(e);
            } else if det.label != self.target_label || det.confidence < self.min_confidence {
                filtered += 1;
            } else {
                admitted.push(det);
            }
        }
        (admitted, rejected, filtered)
    }
}
