//! Audio source strategy traits shared by the capture, tap and file sources.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::SourceError;
use crate::PcmFrame;

/// Result of polling a source for its next frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SourcePoll {
    /// The next captured frame, in capture order.
    Frame(PcmFrame),
    /// Nothing arrived within the timeout.
    Pending,
    /// The source has no more frames and never will.
    Finished,
}

/// A stream of PCM frames pulled by the inference worker.
///
/// Implementations deliver each captured frame exactly once, in order, with
/// sample values untouched.
pub trait AudioFrameSource: Send {
    /// Wait up to `timeout` for the next frame.
    fn next_frame(&mut self, timeout: Duration) -> Result<SourcePoll, SourceError>;

    /// Release the underlying audio resource. Safe to call more than once.
    fn stop(&mut self);
}

/// Opens a fresh source for each detection session.
pub trait SourceFactory: Send + Sync {
    /// Whether opening this source needs the audio recording permission.
    fn requires_record_permission(&self) -> bool;

    fn open(&self) -> Result<Box<dyn AudioFrameSource>, SourceError>;
}

/// Recording permission precondition, checked before any audio resource exists.
pub trait RecordPermission: Send + Sync {
    fn is_granted(&self) -> bool;
}

impl<F> RecordPermission for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_granted(&self) -> bool {
        self()
    }
}

/// A permission answer fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticPermission(pub bool);

impl RecordPermission for StaticPermission {
    fn is_granted(&self) -> bool {
        self.0
    }
}

/// In-memory source replaying a fixed list of frames.
#[derive(Debug, Default)]
pub struct QueuedSource {
    frames: VecDeque<PcmFrame>,
    keep_open: bool,
    stopped: bool,
}

impl QueuedSource {
    pub fn new<I: IntoIterator<Item = PcmFrame>>(frames: I) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            keep_open: false,
            stopped: false,
        }
    }

    /// Report `Pending` instead of `Finished` once the queue drains.
    pub fn keep_open(mut self) -> Self {
        self.keep_open = true;
        self
    }
}

impl AudioFrameSource for QueuedSource {
    fn next_frame(&mut self, timeout: Duration) -> Result<SourcePoll, SourceError> {
        if self.stopped {
            return Ok(SourcePoll::Finished);
        }
        match self.frames.pop_front() {
            Some(frame) => Ok(SourcePoll::Frame(frame)),
            None if self.keep_open => {
                std::thread::sleep(timeout);
                Ok(SourcePoll::Pending)
            }
            None => Ok(SourcePoll::Finished),
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.frames.clear();
    }
}
