//! RTSP Sentry
//!
//! Watches a live network video stream for people and animals and records an
//! annotated copy of it, running indefinitely on unreliable networks.
//!
//! # Architecture
//!
//! One synchronous pipeline per process:
//!
//! 1. **Ingest**: `StreamSource` owns the single connection, detects read
//!    failures and reconnects with a bounded number of attempts.
//! 2. **Sample**: `FrameScheduler` forwards every Nth frame; the rest are dropped
//!    before detection.
//! 3. **Detect**: `DetectionAdapter` calls the detector and turns per-frame
//!    failures into empty results.
//! 4. **Annotate**: `Annotator` draws boxes, labels, counters and a timestamp.
//! 5. **Output**: `OutputSink` writes to a file and/or a live display.
//!
//! `Pipeline` drives the steps as an explicit state machine and guarantees that
//! the connection and sink are released exactly once on every exit path.
//!
//! # Module Structure
//!
//! - `ingest`: capture backends (GStreamer, FFmpeg, synthetic) and `StreamSource`
//! - `schedule`: frame sampling
//! - `detect`: detector trait, backends, category table, adapter
//! - `annotate`: overlay drawing
//! - `output`: file writers, live display, `OutputSink`
//! - `pipeline`: orchestrator, stop signal
//! - `config`: layered configuration (file, environment)
//! - `error`: error taxonomy and process exit codes

pub mod annotate;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod output;
pub mod pipeline;
pub mod schedule;
pub mod ui;

pub use annotate::{Annotator, Overlay};
pub use config::{DetectorBackend, SentryConfig};
pub use detect::{
    BoundingBox, Detection, DetectionAdapter, DetectionCategory, Detector, RawDetection,
    RunSummary, StubDetector,
};
pub use error::PipelineError;
pub use frame::{AnnotatedFrame, Frame};
pub use ingest::{
    CaptureOptions, CaptureStream, Connector, ReconnectPolicy, RtspConnector, StreamProperties,
    StreamSource,
};
pub use output::{FrameWriter, OutputSink, Presenter};
pub use pipeline::{Phase, Pipeline, PipelineState, RunReport, StopReason, StopSignal};
pub use schedule::FrameScheduler;
