//! Conversion of alert triggers into 5W2H records.

use std::fmt;

use crate::alert::record::{
    AlertLocation, AlertMetadata, AlertMethod, AlertQuantity, AlertRecord, Orientation, Severity,
};
use crate::tracker::{AlertTrigger, Rect};

/// Posture estimate from a bounding box.
///
/// Scenario variants supply their own classifier without touching the
/// persistence state machine.
pub trait PostureClassifier: fmt::Debug + Send {
    fn classify(&self, bbox: &Rect) -> Orientation;
}

/// Aspect-ratio posture heuristic.
///
/// A box whose width exceeds `horizontal_ratio` times its height is reported
/// as horizontal, a rough proxy for a reclining subject. This is an
/// approximation only: camera angle, partial occlusion and crops all distort
/// box shape, so the descriptor must not be treated as ground truth.
#[derive(Debug, Clone)]
pub struct AspectRatioClassifier {
    pub horizontal_ratio: f32,
}

impl Default for AspectRatioClassifier {
    fn default() -> Self {
        Self {
            horizontal_ratio: 1.0,
        }
    }
}

impl PostureClassifier for AspectRatioClassifier {
    fn classify(&self, bbox: &Rect) -> Orientation {
        if bbox.aspect_ratio() > self.horizontal_ratio {
            Orientation::Horizontal
        } else {
            Orientation::Vertical
        }
    }
}

/// Static, deployment-specific parts of every alert.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertProfile {
    pub what: String,
    pub who: String,
    pub location: String,
    pub method: String,
    pub prompt: String,
    pub alert_type: String,
    pub severity: Severity,
    pub requires_action: bool,
}

impl Default for AlertProfile {
    fn default() -> Self {
        Self {
            what: "Sleeping person detected".to_string(),
            who: "dwelltrack".to_string(),
            location: "Camera Feed".to_string(),
            method: "Text prompt detection".to_string(),
            prompt: "person sleeping".to_string(),
            alert_type: "sleeping_person".to_string(),
            severity: Severity::Medium,
            requires_action: true,
        }
    }
}

/// Pure trigger-to-record conversion. No I/O.
#[derive(Debug)]
pub struct AlertFormatter {
    profile: AlertProfile,
    classifier: Box<dyn PostureClassifier>,
    persistence_threshold_seconds: f64,
}

impl AlertFormatter {
    pub fn new(profile: AlertProfile, persistence_threshold_seconds: f64) -> Self {
        Self::with_classifier(
            profile,
            persistence_threshold_seconds,
            Box::new(AspectRatioClassifier::default()),
        )
    }

    pub fn with_classifier(
        profile: AlertProfile,
        persistence_threshold_seconds: f64,
        classifier: Box<dyn PostureClassifier>,
    ) -> Self {
        Self {
            profile,
            classifier,
            persistence_threshold_seconds,
        }
    }

    pub fn profile(&self) -> &AlertProfile {
        &self.profile
    }

    pub fn format(&self, trigger: &AlertTrigger) -> AlertRecord {
        let bbox = trigger.track.current_bbox;
        let orientation = self.classifier.classify(&bbox);
        let why = format!(
            "subject stationary in a {} position for {:.1}s, at or beyond the {}s persistence threshold",
            orientation, trigger.persistence_seconds, self.persistence_threshold_seconds
        );

        AlertRecord {
            what: self.profile.what.clone(),
            when: trigger.at,
            location: AlertLocation {
                location: self.profile.location.clone(),
                bounding_box: bbox.to_tlbr(),
                orientation,
            },
            who: self.profile.who.clone(),
            why,
            how: AlertMethod {
                method: self.profile.method.clone(),
                prompt_used: self.profile.prompt.clone(),
                confidence_score: trigger.confidence,
            },
            how_much: AlertQuantity {
                detection_count_in_period: trigger.detection_count,
                persistence_seconds: trigger.persistence_seconds,
            },
            metadata: AlertMetadata {
                alert_type: self.profile.alert_type.clone(),
                severity: self.profile.severity,
                requires_action: self.profile.requires_action,
                track_id: trigger.track.track_id,
            },
        }
    }
}
