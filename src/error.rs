//! Pipeline error taxonomy.
//!
//! Collaborators (capture backends, detectors, writers) speak `anyhow`. At the
//! pipeline boundary their failures are classified into `PipelineError` so the
//! orchestrator can tell connection-level failures (which drive the state
//! machine) from frame-level ones (which are logged and absorbed).

use thiserror::Error;

/// Process exit code for a user-requested stop.
pub const EXIT_USER_STOP: i32 = 0;
/// Process exit code when reconnect attempts are exhausted.
pub const EXIT_STREAM_EXHAUSTED: i32 = 1;
/// Process exit code when the stream cannot be opened at all.
pub const EXIT_CONNECTION: i32 = 2;
/// Process exit code for every other fatal failure.
pub const EXIT_FATAL: i32 = 3;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The source could not be reached. Fatal, never retried.
    #[error("could not open stream {uri}: {reason}")]
    Connection { uri: String, reason: String },

    /// A read returned end-of-stream or a transport error. Recoverable.
    #[error("failed to grab frame from stream: {0}")]
    ReadFailure(String),

    /// More consecutive read failures than the configured ceiling.
    #[error("stream exhausted after {attempts} reconnect attempts (max {max_attempts})")]
    StreamExhausted { attempts: u32, max_attempts: u32 },

    /// The detector failed on one frame. Absorbed by the detection adapter.
    #[error("detection failed: {0}")]
    Detection(String),

    /// The overlay could not be drawn. Fatal.
    #[error("annotation failed: {0}")]
    Annotation(String),

    /// The annotated frame could not be written or presented. Fatal.
    #[error("output failed: {0}")]
    Output(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    /// Frame-level failures that never terminate the run on their own.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ReadFailure(_) | Self::Detection(_))
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::StreamExhausted { .. } => EXIT_STREAM_EXHAUSTED,
            Self::Connection { .. } => EXIT_CONNECTION,
            _ => EXIT_FATAL,
        }
    }

    pub(crate) fn output(err: anyhow::Error) -> Self {
        Self::Output(format!("{:#}", err))
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
