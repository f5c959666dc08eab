//! AlertPipeline for combining a detection source, the engine and alert sinks.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

use super::{DetectionSource, SourceFrame};
use crate::alert::AlertSink;
use crate::clock::{Clock, SystemClock, seconds_between};
use crate::engine::{Engine, Frame, StepReport};
use crate::error::{EngineError, PipelineError, SinkError};

/// A processed frame together with any delivery failures seen while
/// handling it.
#[derive(Debug)]
pub struct FrameReport {
    pub step: StepReport,
    pub delivery_failures: Vec<SinkError>,
}

#[derive(Debug)]
pub enum FrameOutcome {
    Processed(FrameReport),
    /// Arrived sooner than the sampling interval allows
    Skipped { frame_id: u64 },
}

/// Totals for a [`AlertPipeline::run`] session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub skipped: u64,
    pub alerts: u64,
    pub delivery_failures: u64,
    pub clock_regressions: u64,
}

/// Drives one feed end to end: pull detections, step the engine, hand alerts
/// to every sink.
///
/// Delivery results never feed back into the engine; a failed delivery is
/// logged and reported, and the alert stays emitted.
pub struct AlertPipeline<D: DetectionSource, C: Clock = SystemClock> {
    source: D,
    engine: Engine,
    sinks: Vec<Box<dyn AlertSink>>,
    clock: C,
    sample_interval_seconds: f64,
    last_sampled: Option<DateTime<Utc>>,
    next_frame_id: u64,
}

impl<D: DetectionSource> AlertPipeline<D, SystemClock> {
    /// Create a pipeline stamping undated frames with the wall clock.
    pub fn new(source: D, engine: Engine) -> Self {
        Self::with_clock(source, engine, SystemClock)
    }
}

impl<D: DetectionSource, C: Clock> AlertPipeline<D, C> {
    pub fn with_clock(source: D, engine: Engine, clock: C) -> Self {
        Self {
            source,
            engine,
            sinks: Vec::new(),
            clock,
            sample_interval_seconds: 0.0,
            last_sampled: None,
            next_frame_id: 0,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Process at most one frame per `seconds`; zero processes every frame.
    pub fn with_sample_interval(mut self, seconds: f64) -> Self {
        self.sample_interval_seconds = seconds.max(0.0);
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Pull and process the next frame. `Ok(None)` means the source ended.
    pub fn process_next(&mut self) -> Result<Option<FrameOutcome>, PipelineError<D::Error>> {
        let Some(raw) = self.source.next_frame().map_err(PipelineError::Source)? else {
            return Ok(None);
        };
        let frame = self.stamp(raw);

        if let Some(last) = self.last_sampled {
            if seconds_between(frame.timestamp, last) < self.sample_interval_seconds
                && frame.timestamp >= last
            {
                log::trace!("frame {} skipped by sampling interval", frame.frame_id);
                return Ok(Some(FrameOutcome::Skipped {
                    frame_id: frame.frame_id,
                }));
            }
        }

        let step = self.engine.step(frame)?;
        self.last_sampled = Some(step.timestamp);

        let mut delivery_failures = Vec::new();
        for alert in &step.alerts {
            for sink in self.sinks.iter_mut() {
                if let Err(e) = sink.deliver(alert) {
                    log::error!(
                        "{} failed to deliver alert for track {}: {}",
                        sink.name(),
                        alert.metadata.track_id,
                        e
                    );
                    delivery_failures.push(e);
                }
            }
        }
        for sink in self.sinks.iter_mut() {
            delivery_failures.extend(sink.drain_failures());
        }

        Ok(Some(FrameOutcome::Processed(FrameReport {
            step,
            delivery_failures,
        })))
    }

    /// Process frames until the source ends or `stop` is raised.
    ///
    /// Clock regressions are logged and the offending frame dropped; source
    /// errors end the run.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<RunSummary, PipelineError<D::Error>> {
        let mut summary = RunSummary::default();
        while !stop.load(Ordering::Relaxed) {
            match self.process_next() {
                Ok(None) => break,
                Ok(Some(FrameOutcome::Skipped { .. })) => {
                    summary.frames += 1;
                    summary.skipped += 1;
                }
                Ok(Some(FrameOutcome::Processed(report))) => {
                    summary.frames += 1;
                    summary.alerts += report.step.alerts.len() as u64;
                    summary.delivery_failures += report.delivery_failures.len() as u64;
                }
                Err(PipelineError::Engine(EngineError::ClockRegression { .. })) => {
                    summary.frames += 1;
                    summary.clock_regressions += 1;
                }
                Err(e) => return Err(e),
            }
        }
        for sink in self.sinks.iter_mut() {
            summary.delivery_failures += sink.drain_failures().len() as u64;
        }
        Ok(summary)
    }

    fn stamp(&mut self, raw: SourceFrame) -> Frame {
        let frame_id = raw.frame_id.unwrap_or(self.next_frame_id);
        self.next_frame_id = frame_id.wrapping_add(1);
        let timestamp = raw.timestamp.unwrap_or_else(|| self.clock.now());
        Frame::new(frame_id, timestamp, raw.detections)
    }
}
