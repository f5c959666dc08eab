//! Error taxonomy for the engine boundary and the alert sinks.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A detection that failed boundary validation and was discarded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectionError {
    #[error("bounding box has non-finite coordinates: {bbox:?}")]
    NonFiniteBox { bbox: [f32; 4] },
    #[error("bounding box is inverted or empty (x1 >= x2 or y1 >= y2): {bbox:?}")]
    InvertedBox { bbox: [f32; 4] },
    #[error("confidence {confidence} is outside [0, 1]")]
    ConfidenceOutOfRange { confidence: f32 },
}

/// Failures of a whole processing step.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("frame timestamp {presented} is earlier than previous step at {previous}")]
    ClockRegression {
        previous: DateTime<Utc>,
        presented: DateTime<Utc>,
    },
}

/// Alert delivery failures. These never roll back an emitted alert.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("delivery failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<SinkError>,
    },
    #[error("failed to serialize alert: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("delivery queue is full, alert for track {track_id} dropped")]
    QueueFull { track_id: u64 },
    #[error("delivery worker has stopped")]
    WorkerGone,
}

/// Errors surfaced by [`crate::integration::AlertPipeline`].
#[derive(Debug, Error)]
pub enum PipelineError<E> {
    #[error("detection source failed: {0}")]
    Source(E),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Failures reading detector output.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read detections: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid detection record on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}
