//! Passive tap on an externally owned call audio pipeline.
//!
//! The call engine invokes the observer on its own audio thread. The tap only
//! copies the samples into a channel and returns, so the audio path never
//! waits on inference; the worker pulls frames from the other end.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::error::SourceError;
use crate::rechunker::Rechunker;
use crate::source::{AudioFrameSource, SourceFactory, SourcePoll};
use crate::{PcmFrame, TapConfig, TapStream};

/// One raw PCM callback payload from the call engine.
#[derive(Debug, Clone, Copy)]
pub struct RawAudioFrame<'a> {
    /// Interleaved samples.
    pub data: &'a [i16],
    pub samples_per_channel: usize,
    pub channels: u16,
    pub sample_rate: u32,
}

/// Raw audio frame callbacks exposed by the call engine.
///
/// Each callback returns whether the engine should keep the frame; observers
/// here never modify audio, so the defaults return `true`.
pub trait AudioFrameObserver: Send + Sync {
    fn on_record_frame(&self, _frame: &RawAudioFrame<'_>) -> bool {
        true
    }

    fn on_playback_frame(&self, _frame: &RawAudioFrame<'_>) -> bool {
        true
    }

    fn on_mixed_frame(&self, _frame: &RawAudioFrame<'_>) -> bool {
        true
    }

    fn on_playback_frame_before_mixing(
        &self,
        _channel_id: &str,
        _uid: u32,
        _frame: &RawAudioFrame<'_>,
    ) -> bool {
        true
    }
}

/// The call engine's observer registration point. Passing `None` detaches the
/// current observer.
pub trait RawFrameProvider: Send + Sync {
    fn register_audio_frame_observer(
        &self,
        observer: Option<Arc<dyn AudioFrameObserver>>,
    ) -> Result<(), SourceError>;
}

struct ForwardingObserver {
    stream: TapStream,
    tx: Sender<PcmFrame>,
    next_seq: AtomicU64,
}

impl ForwardingObserver {
    fn forward(&self, stream: TapStream, frame: &RawAudioFrame<'_>) -> bool {
        if stream != self.stream {
            return true;
        }
        let len = (frame.samples_per_channel * frame.channels.max(1) as usize).min(frame.data.len());
        let pcm = PcmFrame {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            samples: frame.data[..len].to_vec(),
            channels: frame.channels.max(1),
            sample_rate: frame.sample_rate,
        };
        if self.tx.send(pcm).is_err() {
            log::trace!("tap receiver gone, dropping {:?} frame", stream);
        }
        true
    }
}

impl AudioFrameObserver for ForwardingObserver {
    fn on_record_frame(&self, frame: &RawAudioFrame<'_>) -> bool {
        self.forward(TapStream::Record, frame)
    }

    fn on_playback_frame(&self, frame: &RawAudioFrame<'_>) -> bool {
        self.forward(TapStream::Playback, frame)
    }

    fn on_mixed_frame(&self, frame: &RawAudioFrame<'_>) -> bool {
        self.forward(TapStream::Mixed, frame)
    }
}

/// Source fed by an observer registered on a [`RawFrameProvider`].
pub struct TapSource {
    provider: Arc<dyn RawFrameProvider>,
    recv: Receiver<PcmFrame>,
    rechunker: Option<Rechunker>,
    pending: VecDeque<PcmFrame>,
    attached: bool,
}

impl TapSource {
    /// Register the forwarding observer on `provider`.
    pub fn attach(provider: Arc<dyn RawFrameProvider>, config: &TapConfig) -> Result<Self, SourceError> {
        let (tx, recv) = unbounded();
        let observer = Arc::new(ForwardingObserver {
            stream: config.stream,
            tx,
            next_seq: AtomicU64::new(0),
        });
        provider.register_audio_frame_observer(Some(observer))?;
        log::info!("audio frame observer registered ({:?} stream)", config.stream);

        Ok(Self {
            provider,
            recv,
            rechunker: config.frame_len.map(Rechunker::new),
            pending: VecDeque::new(),
            attached: true,
        })
    }
}

impl AudioFrameSource for TapSource {
    fn next_frame(&mut self, timeout: Duration) -> Result<SourcePoll, SourceError> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(SourcePoll::Frame(frame));
        }
        if !self.attached {
            return Ok(SourcePoll::Finished);
        }

        let frame = match self.recv.recv_timeout(timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => return Ok(SourcePoll::Pending),
            Err(RecvTimeoutError::Disconnected) => return Ok(SourcePoll::Finished),
        };

        match self.rechunker.as_mut() {
            None => Ok(SourcePoll::Frame(frame)),
            Some(rechunker) => {
                self.pending.extend(rechunker.push(frame));
                Ok(self
                    .pending
                    .pop_front()
                    .map(SourcePoll::Frame)
                    .unwrap_or(SourcePoll::Pending))
            }
        }
    }

    fn stop(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;
        self.pending.clear();
        if let Err(e) = self.provider.register_audio_frame_observer(None) {
            log::warn!("failed to detach audio frame observer: {}", e);
        } else {
            log::info!("audio frame observer detached");
        }
    }
}

impl Drop for TapSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens a [`TapSource`] on the same provider for every session.
pub struct TapSourceFactory {
    provider: Arc<dyn RawFrameProvider>,
    config: TapConfig,
}

impl TapSourceFactory {
    pub fn new(provider: Arc<dyn RawFrameProvider>, config: TapConfig) -> Self {
        Self { provider, config }
    }
}

impl SourceFactory for TapSourceFactory {
    fn requires_record_permission(&self) -> bool {
        false
    }

    fn open(&self) -> Result<Box<dyn AudioFrameSource>, SourceError> {
        Ok(Box::new(TapSource::attach(self.provider.clone(), &self.config)?))
    }
}
