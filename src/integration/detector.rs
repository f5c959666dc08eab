//! Detector output feeding the engine.

use std::io::BufRead;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::DetectionBuilder;
use crate::error::SourceError;
use crate::tracker::{DEFAULT_TARGET_LABEL, Detection};

/// Detections for one frame as reported by a detection source.
///
/// Missing frame ids and timestamps are filled in by the pipeline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceFrame {
    pub frame_id: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub detections: Vec<Detection>,
}

/// Trait for object detection inference backends.
///
/// Implement this trait to connect any detection model, or a recorded
/// stream of its output, to the engine. The caller controls cadence: one
/// `next_frame` call per sampled frame.
///
/// # Example
///
/// ```ignore
/// use dwelltrack::{DetectionSource, SourceFrame};
///
/// struct MyDetector {
///     // Your model here
/// }
///
/// impl DetectionSource for MyDetector {
///     type Error = std::io::Error;
///
///     fn next_frame(&mut self) -> Result<Option<SourceFrame>, Self::Error> {
///         // Grab a frame, run inference, return boxes
///         Ok(None)
///     }
/// }
/// ```
pub trait DetectionSource {
    /// Error type for detection failures.
    type Error;

    /// Next frame's detections, or `None` when the stream has ended.
    fn next_frame(&mut self) -> Result<Option<SourceFrame>, Self::Error>;
}

#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(default)]
    frame_id: Option<u64>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    detections: Vec<WireDetection>,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    bbox: [f32; 4],
    confidence: f32,
    #[serde(default = "default_label")]
    label: String,
}

fn default_label() -> String {
    DEFAULT_TARGET_LABEL.to_string()
}

/// Newline-delimited JSON detector output, one frame per line:
///
/// ```text
/// {"frame_id": 7, "timestamp": "2024-05-01T12:00:00Z",
///  "detections": [{"bbox": [100, 100, 200, 300], "confidence": 0.95, "label": "person"}]}
/// ```
///
/// Blank lines are skipped.
pub struct JsonLinesSource<R> {
    reader: R,
    line: usize,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, line: 0 }
    }
}

impl<R: BufRead> DetectionSource for JsonLinesSource<R> {
    type Error = SourceError;

    fn next_frame(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        let mut buf = String::new();
        loop {
            buf.clear();
            if self.reader.read_line(&mut buf)? == 0 {
                return Ok(None);
            }
            self.line += 1;
            if !buf.trim().is_empty() {
                break;
            }
        }

        let wire: WireFrame = serde_json::from_str(buf.trim()).map_err(|source| SourceError::Parse {
            line: self.line,
            source,
        })?;
        let detections = wire
            .detections
            .into_iter()
            .map(|d| {
                DetectionBuilder::new()
                    .bbox(d.bbox)
                    .confidence(d.confidence)
                    .label(d.label)
                    .build()
            })
            .collect();

        Ok(Some(SourceFrame {
            frame_id: wire.frame_id,
            timestamp: wire.timestamp,
            detections,
        }))
    }
}
