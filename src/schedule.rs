//! Frame sampling.
//!
//! The source has no flow-control signal, so sampling is the only backpressure:
//! every Nth successfully read frame is forwarded to detection and the rest are
//! dropped before the detector ever sees them. The sample counter is monotonic
//! for the whole run, so the sampling phase survives reconnects.

use crate::error::PipelineError;

pub const DEFAULT_FRAME_SKIP: u32 = 2;

#[derive(Clone, Debug)]
pub struct FrameScheduler {
    frame_skip: u32,
    sample_counter: u64,
}

impl FrameScheduler {
    pub fn new(frame_skip: u32) -> Result<Self, PipelineError> {
        if frame_skip == 0 {
            return Err(PipelineError::Config(
                "frame skip must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            frame_skip,
            sample_counter: 0,
        })
    }

    /// Whether the frame with this (1-based) index is forwarded for processing.
    pub fn should_process(&self, frame_index: u64) -> bool {
        frame_index % self.frame_skip as u64 == 0
    }

    /// Count one successfully read frame and decide whether it is processed.
    ///
    /// Returns the frame's index alongside the decision.
    pub fn admit(&mut self) -> (u64, bool) {
        self.sample_counter += 1;
        (self.sample_counter, self.should_process(self.sample_counter))
    }

    pub fn sample_counter(&self) -> u64 {
        self.sample_counter
    }

    pub fn frame_skip(&self) -> u32 {
        self.frame_skip
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self {
            frame_skip: DEFAULT_FRAME_SKIP,
            sample_counter: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_processes_every_other_frame() {
        let mut scheduler = FrameScheduler::default();
        let decisions: Vec<bool> = (0..6).map(|_| scheduler.admit().1).collect();
        assert_eq!(decisions, vec![false, true, false, true, false, true]);
        assert_eq!(scheduler.sample_counter(), 6);
    }

    #[test]
    fn exactly_every_nth_frame_is_forwarded() -> Result<(), PipelineError> {
        for n in 1..=7u32 {
            let mut scheduler = FrameScheduler::new(n)?;
            let forwarded: Vec<u64> = (0..70)
                .map(|_| scheduler.admit())
                .filter(|(_, process)| *process)
                .map(|(index, _)| index)
                .collect();
            assert_eq!(forwarded.len(), 70 / n as usize);
            assert!(forwarded.iter().all(|index| index % n as u64 == 0));
        }
        Ok(())
    }

    #[test]
    fn zero_skip_is_rejected() {
        assert!(matches!(
            FrameScheduler::new(0),
            Err(PipelineError::Config(_))
        ));
    }
}
