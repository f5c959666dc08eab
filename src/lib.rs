//! Temporal-persistence detection: track per-frame person detections, notice
//! when one stays in place too long, and raise a structured 5W2H alert.

pub mod alert;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod integration;
pub mod tracker;

pub use alert::{AlertFormatter, AlertRecord, AlertSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use engine::{ClockRegressionPolicy, Engine, EngineConfig, Frame, StepReport};
pub use error::{DetectionError, EngineError, PipelineError, SinkError, SourceError};
pub use integration::{AlertPipeline, DetectionBuilder, DetectionSource, JsonLinesSource, SourceFrame};
pub use tracker::{CooldownPolicy, Detection, PersistenceTracker, Rect, Track, TrackState, TrackerConfig};
