//! WAV file source for offline runs.

use std::path::{Path, PathBuf};

use crate::error::SourceError;
use crate::rechunker::Rechunker;
use crate::source::{AudioFrameSource, QueuedSource, SourceFactory};
use crate::{source_frame_len, PcmFrame};

#[derive(Debug, Clone, Copy)]
enum FrameLen {
    /// Samples per channel, whatever the file's rate.
    Fixed(usize),
    /// Model input length at the model rate, scaled to the file's rate.
    ModelWindow(usize),
}

/// Decode a 16-bit integer WAV file into frames of `frame_len` samples per
/// channel. The trailing partial frame is kept as-is.
pub fn read_wav_frames<P: AsRef<Path>>(path: P, frame_len: usize) -> Result<Vec<PcmFrame>, SourceError> {
    decode(path.as_ref(), FrameLen::Fixed(frame_len))
}

fn decode(path: &Path, frame_len: FrameLen) -> Result<Vec<PcmFrame>, SourceError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(SourceError::DeviceUnavailable(format!(
            "{}: expected 16-bit integer PCM, got {}-bit {:?}",
            path.display(),
            spec.bits_per_sample,
            spec.sample_format
        )));
    }

    let samples = reader
        .samples::<i16>()
        .collect::<Result<Vec<_>, _>>()?;

    let frame_len = match frame_len {
        FrameLen::Fixed(len) => len,
        FrameLen::ModelWindow(len) => source_frame_len(len, spec.sample_rate),
    };
    let mut rechunker = Rechunker::new(frame_len);
    let mut frames = rechunker.push(PcmFrame {
        seq: 0,
        samples,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
    });
    frames.extend(rechunker.flush());

    log::debug!(
        "decoded {} frames of {} samples from {} ({}ch/{}Hz)",
        frames.len(),
        frame_len,
        path.display(),
        spec.channels,
        spec.sample_rate
    );
    Ok(frames)
}

/// Replays a WAV file once per session, then finishes.
pub struct WavSourceFactory {
    path: PathBuf,
    frame_len: FrameLen,
}

impl WavSourceFactory {
    pub fn new<P: Into<PathBuf>>(path: P, frame_len: usize) -> Self {
        Self {
            path: path.into(),
            frame_len: FrameLen::Fixed(frame_len),
        }
    }

    /// Frames cover `model_input_len` samples of model-rate audio, at the
    /// file's own rate.
    pub fn for_model<P: Into<PathBuf>>(path: P, model_input_len: usize) -> Self {
        Self {
            path: path.into(),
            frame_len: FrameLen::ModelWindow(model_input_len),
        }
    }
}

impl SourceFactory for WavSourceFactory {
    fn requires_record_permission(&self) -> bool {
        false
    }

    fn open(&self) -> Result<Box<dyn AudioFrameSource>, SourceError> {
        let frames = decode(&self.path, self.frame_len)?;
        Ok(Box::new(QueuedSource::new(frames)))
    }
}
