//! 5W2H alert record delivered to sinks.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse posture descriptor derived from the bounding box shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Horizontal,
    Vertical,
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::Horizontal => write!(f, "horizontal"),
            Orientation::Vertical => write!(f, "vertical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}

/// One alert, created once per qualifying transition and never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub what: String,
    pub when: DateTime<Utc>,
    #[serde(rename = "where")]
    pub location: AlertLocation,
    pub who: String,
    pub why: String,
    pub how: AlertMethod,
    pub how_much: AlertQuantity,
    pub metadata: AlertMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertLocation {
    pub location: String,
    /// `[x1, y1, x2, y2]` in detector coordinates
    pub bounding_box: [f32; 4],
    pub orientation: Orientation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMethod {
    pub method: String,
    pub prompt_used: String,
    pub confidence_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertQuantity {
    pub detection_count_in_period: u32,
    pub persistence_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMetadata {
    pub alert_type: String,
    pub severity: Severity,
    pub requires_action: bool,
    pub track_id: u64,
}
