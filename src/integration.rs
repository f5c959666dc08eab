//! Integration module for connecting object detection backends with the engine.
//!
//! This module provides the source trait detectors implement, a builder for
//! detections, and the pipeline that carries alerts out to the sinks.

mod builder;
mod detector;
mod pipeline;

pub use builder::DetectionBuilder;
pub use detector::{DetectionSource, JsonLinesSource, SourceFrame};
pub use pipeline::{AlertPipeline, FrameOutcome, FrameReport, RunSummary};
