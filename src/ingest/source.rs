//! Stream source: the single live connection and its reconnect policy.
//!
//! `StreamSource` owns at most one open `CaptureStream`. Read failures are not
//! fatal on their own: the caller asks for a `reconnect()`, which closes the
//! handle, waits a fixed backoff and reopens. Once more consecutive failures
//! have been seen than the policy allows, `reconnect()` returns
//! `StreamExhausted`. A successful read resets the failure counter.

use std::time::Duration;

use super::{redact_uri, CaptureOptions, CaptureStream, Connector, StreamProperties};
use crate::error::PipelineError;
use crate::frame::Frame;

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Bounded reconnect policy with a fixed backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            backoff: DEFAULT_RECONNECT_BACKOFF,
        }
    }
}

/// Blocking wait used for the reconnect backoff.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Sleeps the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Outcome of one reconnect attempt that did not exhaust the policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconnect {
    /// A fresh handle is open.
    Reopened,
    /// The reopen failed; the attempt is spent and no handle is open.
    StillDown,
}

pub struct StreamSource<C: Connector> {
    connector: C,
    uri: String,
    options: CaptureOptions,
    policy: ReconnectPolicy,
    sleeper: Box<dyn Sleeper>,
    handle: Option<C::Stream>,
    properties: Option<StreamProperties>,
    /// Consecutive read failures since the last good frame.
    reconnect_attempts: u32,
    /// Frames read on the current connection.
    frames_seen: u64,
    /// Reconnects performed over the whole run.
    total_reconnects: u64,
}

impl<C: Connector> StreamSource<C> {
    pub fn new(connector: C, uri: impl Into<String>, options: CaptureOptions) -> Self {
        Self {
            connector,
            uri: uri.into(),
            options,
            policy: ReconnectPolicy::default(),
            sleeper: Box::new(ThreadSleeper),
            handle: None,
            properties: None,
            reconnect_attempts: 0,
            frames_seen: 0,
            total_reconnects: 0,
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    /// Open the stream.
    ///
    /// Fails fast with `PipelineError::Connection` when the source cannot be
    /// reached. Does not touch the reconnect counter.
    pub fn open(&mut self) -> Result<StreamProperties, PipelineError> {
        self.close();
        let stream = self
            .connector
            .connect(&self.uri, &self.options)
            .map_err(|err| PipelineError::Connection {
                uri: redact_uri(&self.uri),
                reason: format!("{:#}", err),
            })?;
        Ok(self.install(stream))
    }

    /// Read the next frame from the open handle.
    pub fn read_frame(&mut self) -> Result<Frame, PipelineError> {
        let Some(stream) = self.handle.as_mut() else {
            log::warn!("failed to grab frame from stream: stream is not open");
            return Err(PipelineError::ReadFailure("stream is not open".to_string()));
        };
        match stream.read() {
            Ok(Some(frame)) => {
                self.reconnect_attempts = 0;
                self.frames_seen += 1;
                Ok(frame)
            }
            Ok(None) => {
                log::warn!("failed to grab frame from stream: end of stream");
                Err(PipelineError::ReadFailure("end of stream".to_string()))
            }
            Err(err) => {
                log::warn!("failed to grab frame from stream: {:#}", err);
                Err(PipelineError::ReadFailure(format!("{:#}", err)))
            }
        }
    }

    /// Spend one reconnect attempt after a read failure.
    ///
    /// Returns `StreamExhausted` (with the handle closed) once the number of
    /// consecutive failures exceeds `max_attempts`.
    pub fn reconnect(&mut self) -> Result<Reconnect, PipelineError> {
        self.reconnect_attempts += 1;
        let max_attempts = self.policy.max_attempts;
        if self.reconnect_attempts > max_attempts {
            log::error!(
                "max reconnection attempts reached ({}), giving up on {}",
                max_attempts,
                redact_uri(&self.uri)
            );
            self.close();
            return Err(PipelineError::StreamExhausted {
                attempts: self.reconnect_attempts,
                max_attempts,
            });
        }

        log::warn!(
            "attempting to reconnect... ({}/{})",
            self.reconnect_attempts,
            max_attempts
        );
        self.close();
        self.sleeper.sleep(self.policy.backoff);
        self.total_reconnects += 1;

        match self.connector.connect(&self.uri, &self.options) {
            Ok(stream) => {
                self.install(stream);
                Ok(Reconnect::Reopened)
            }
            Err(err) => {
                log::warn!(
                    "reconnect attempt {} failed: {:#}",
                    self.reconnect_attempts,
                    err
                );
                Ok(Reconnect::StillDown)
            }
        }
    }

    /// Release the handle. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.handle.take() {
            stream.close();
            log::debug!("RtspSource: closed {}", redact_uri(&self.uri));
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Native properties of the most recently opened connection.
    pub fn properties(&self) -> Option<StreamProperties> {
        self.properties
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn total_reconnects(&self) -> u64 {
        self.total_reconnects
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    fn install(&mut self, stream: C::Stream) -> StreamProperties {
        let properties = stream.properties();
        log::info!(
            "RtspSource: opened {} ({}x{} @ {:.1} fps, buffer {} frames, codec hint {})",
            redact_uri(&self.uri),
            properties.width,
            properties.height,
            properties.fps,
            self.options.buffer_frames,
            self.options.codec_hint
        );
        self.handle = Some(stream);
        self.properties = Some(properties);
        self.frames_seen = 0;
        properties
    }
}

impl<C: Connector> Drop for StreamSource<C> {
    fn drop(&mut self) {
        self.close();
    }
}
