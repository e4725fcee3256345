//! Pipeline orchestrator.
//!
//! Drives one stream through read → sample → detect → annotate → output as an
//! explicit state machine:
//!
//! ```text
//! Idle → Connecting → Streaming ⇄ Reconnecting
//!            │            │            │
//!            │            └─→ Draining ←┘   (stop signal / frame limit)
//!            └──────────────→ Terminated ←── (fatal error, exhaustion, drained)
//! ```
//!
//! Frame-level failures (a bad read, a detector error) never leave the loop:
//! reads go through the reconnect policy and detector failures are absorbed by
//! the `DetectionAdapter`. Connection failure, reconnect exhaustion and
//! annotation/output failures terminate the run and are returned to the caller.
//! Resources are released exactly once on every path.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::annotate::Annotator;
use crate::detect::DetectionAdapter;
use crate::error::{panic_message, PipelineError};
use crate::frame::Frame;
use crate::ingest::{redact_uri, Connector, Reconnect, StreamSource};
use crate::output::OutputSink;
use crate::schedule::FrameScheduler;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Streaming,
    Reconnecting,
    Draining,
    Terminated,
}

/// Counters for the current run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineState {
    /// Frames read on the current connection.
    pub frames_seen: u64,
    /// Consecutive read failures since the last good frame.
    pub reconnect_attempts: u32,
    /// Frames read over the whole run; drives sampling.
    pub sample_counter: u64,
}

/// Cooperative stop flag, polled once per iteration.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The stop signal was raised.
    UserStop,
    /// The configured number of frames was read.
    FrameLimit,
}

/// Summary of a run that ended without a fatal error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub reason: StopReason,
    /// Frames read over the whole run, across reconnects.
    pub frames_seen: u64,
    pub frames_processed: u64,
    pub reconnects: u64,
}

pub struct Pipeline<'a, C: Connector> {
    source: StreamSource<C>,
    scheduler: FrameScheduler,
    detector: &'a mut DetectionAdapter,
    annotator: Annotator,
    sink: OutputSink,
    stop: StopSignal,
    max_frames: Option<u64>,
    phase: Phase,
    history: Vec<Phase>,
    frames_processed: u64,
    started: bool,
    released: bool,
}

impl<'a, C: Connector> Pipeline<'a, C> {
    /// Assemble a pipeline. The detector stays owned by the caller.
    pub fn new(
        source: StreamSource<C>,
        scheduler: FrameScheduler,
        detector: &'a mut DetectionAdapter,
        annotator: Annotator,
        sink: OutputSink,
    ) -> Self {
        Self {
            source,
            scheduler,
            detector,
            annotator,
            sink,
            stop: StopSignal::new(),
            max_frames: None,
            phase: Phase::Idle,
            history: vec![Phase::Idle],
            frames_processed: 0,
            started: false,
            released: false,
        }
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Stop (as a normal exit) once this many frames have been read.
    pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Handle that stops the run from another thread or a signal handler.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run until stopped or a fatal error. May only be called once.
    pub fn run(&mut self) -> Result<RunReport, PipelineError> {
        if self.started {
            return Err(PipelineError::Config(
                "pipeline has already been run".to_string(),
            ));
        }
        self.started = true;

        let outcome = self.drive();
        let released = self.release();
        match (outcome, released) {
            (Ok(reason), Ok(())) => Ok(self.report(reason)),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                log::error!("teardown after failure also failed: {}", close_err);
                Err(err)
            }
        }
    }

    fn drive(&mut self) -> Result<StopReason, PipelineError> {
        self.transition(Phase::Connecting);
        log::info!("connecting to {}", redact_uri(self.source.uri()));
        let properties = self.source.open()?;
        self.sink.start(properties)?;
        self.transition(Phase::Streaming);

        let mut last_health_log = Instant::now();
        loop {
            if let Some(reason) = self.stop_requested() {
                self.transition(Phase::Draining);
                log::info!("stopping: {:?}", reason);
                return Ok(reason);
            }

            match self.phase {
                Phase::Reconnecting => match self.source.reconnect()? {
                    Reconnect::Reopened => self.transition(Phase::Streaming),
                    Reconnect::StillDown => {}
                },
                _ => match self.source.read_frame() {
                    Ok(frame) => self.process(frame)?,
                    Err(err) if err.is_recoverable() => self.transition(Phase::Reconnecting),
                    Err(err) => return Err(err),
                },
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let state = self.state();
                log::info!(
                    "stream health={} frames_seen={} processed={} reconnects={} detector_failures={}",
                    self.source.is_open(),
                    state.sample_counter,
                    self.frames_processed,
                    self.source.total_reconnects(),
                    self.detector.failures()
                );
                last_health_log = Instant::now();
            }
        }
    }

    fn stop_requested(&self) -> Option<StopReason> {
        if self.stop.is_set() {
            return Some(StopReason::UserStop);
        }
        match self.max_frames {
            Some(limit) if self.scheduler.sample_counter() >= limit => {
                Some(StopReason::FrameLimit)
            }
            _ => None,
        }
    }

    /// Sample gate, then detect, annotate and output one frame.
    fn process(&mut self, frame: Frame) -> Result<(), PipelineError> {
        let (index, admitted) = self.scheduler.admit();
        if !admitted {
            log::trace!("frame {} skipped by sampler", index);
            return Ok(());
        }

        let detections = self.detector.detect(&frame);
        let annotator = &self.annotator;
        let annotated = panic::catch_unwind(AssertUnwindSafe(|| {
            annotator.annotate(frame, &detections)
        }))
        .map_err(|payload| PipelineError::Annotation(panic_message(payload.as_ref())))?;

        self.sink.write(&annotated)?;
        self.sink.present(&annotated)?;
        self.frames_processed += 1;
        log::debug!(
            "frame {}: persons={} animals={}",
            index,
            annotated.overlay.summary.persons,
            annotated.overlay.summary.animals
        );
        Ok(())
    }

    /// Close the stream and the sink. Runs once; later calls are no-ops.
    fn release(&mut self) -> Result<(), PipelineError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        log::info!("cleaning up resources");
        self.source.close();
        let result = self.sink.close();
        self.transition(Phase::Terminated);
        result
    }

    fn transition(&mut self, next: Phase) {
        if self.phase == next {
            return;
        }
        log::debug!("pipeline: {:?} -> {:?}", self.phase, next);
        self.phase = next;
        self.history.push(next);
    }

    fn report(&self, reason: StopReason) -> RunReport {
        RunReport {
            reason,
            frames_seen: self.scheduler.sample_counter(),
            frames_processed: self.frames_processed,
            reconnects: self.source.total_reconnects(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Every phase entered so far, starting with `Idle`.
    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    pub fn state(&self) -> PipelineState {
        PipelineState {
            frames_seen: self.source.frames_seen(),
            reconnect_attempts: self.source.reconnect_attempts(),
            sample_counter: self.scheduler.sample_counter(),
        }
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn source(&self) -> &StreamSource<C> {
        &self.source
    }

    pub fn sink(&self) -> &OutputSink {
        &self.sink
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl<C: Connector> Drop for Pipeline<'_, C> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::error!("pipeline teardown failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubDetector;
    use crate::ingest::{CaptureOptions, RtspConnector, Sleeper};

    struct NoSleep;

    impl Sleeper for NoSleep {
        fn sleep(&mut self, _duration: Duration) {}
    }

    fn source(uri: &str) -> StreamSource<RtspConnector> {
        let options = CaptureOptions {
            width: 32,
            height: 24,
            ..CaptureOptions::default()
        };
        StreamSource::new(RtspConnector::new(), uri, options).with_sleeper(NoSleep)
    }

    #[test]
    fn frame_limit_drains_and_terminates() -> Result<(), PipelineError> {
        let mut detector = DetectionAdapter::new(StubDetector::new());
        let mut pipeline = Pipeline::new(
            source("stub://cam"),
            FrameScheduler::new(2)?,
            &mut detector,
            Annotator::new(),
            OutputSink::none(),
        )
        .with_max_frames(Some(6));

        let report = pipeline.run()?;
        assert_eq!(report.reason, StopReason::FrameLimit);
        assert_eq!(report.frames_seen, 6);
        assert_eq!(report.frames_processed, 3);
        assert_eq!(
            pipeline.history(),
            &[
                Phase::Idle,
                Phase::Connecting,
                Phase::Streaming,
                Phase::Draining,
                Phase::Terminated
            ]
        );
        assert!(pipeline.is_released());
        drop(pipeline);
        assert_eq!(detector.calls(), 3);
        Ok(())
    }

    #[test]
    fn stop_signal_before_first_read() -> Result<(), PipelineError> {
        let mut detector = DetectionAdapter::new(StubDetector::new());
        let mut pipeline = Pipeline::new(
            source("stub://cam"),
            FrameScheduler::default(),
            &mut detector,
            Annotator::new(),
            OutputSink::none(),
        );
        pipeline.stop_signal().trigger();

        let report = pipeline.run()?;
        assert_eq!(report.reason, StopReason::UserStop);
        assert_eq!(report.frames_seen, 0);
        assert_eq!(pipeline.phase(), Phase::Terminated);
        Ok(())
    }

    #[test]
    fn unreachable_source_terminates_from_connecting() {
        let mut detector = DetectionAdapter::new(StubDetector::new());
        let mut pipeline = Pipeline::new(
            source("stub://cam?unreachable"),
            FrameScheduler::default(),
            &mut detector,
            Annotator::new(),
            OutputSink::none(),
        );

        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, PipelineError::Connection { .. }));
        assert_eq!(err.exit_code(), crate::error::EXIT_CONNECTION);
        assert_eq!(
            pipeline.history(),
            &[Phase::Idle, Phase::Connecting, Phase::Terminated]
        );
    }

    #[test]
    fn run_twice_is_rejected() -> Result<(), PipelineError> {
        let mut detector = DetectionAdapter::new(StubDetector::new());
        let mut pipeline = Pipeline::new(
            source("stub://cam"),
            FrameScheduler::default(),
            &mut detector,
            Annotator::new(),
            OutputSink::none(),
        )
        .with_max_frames(Some(1));
        pipeline.run()?;
        assert!(matches!(pipeline.run(), Err(PipelineError::Config(_))));
        Ok(())
    }
}
