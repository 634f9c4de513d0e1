use std::collections::VecDeque;

use crate::PcmFrame;

/// Rechunker collects frames of any length and emits frames of a fixed
/// number of samples per channel.
///
/// Sample values and order are preserved; only frame boundaries move. Output
/// frames are numbered from zero in emission order.
#[derive(Debug)]
pub struct Rechunker {
    frame_len: usize,
    buffer: VecDeque<i16>,
    channels: u16,
    sample_rate: u32,
    next_seq: u64,
}

impl Rechunker {
    pub fn new(frame_len: usize) -> Self {
        let frame_len = frame_len.max(1);
        Self {
            frame_len,
            buffer: VecDeque::with_capacity(frame_len * 2),
            channels: 1,
            sample_rate: 0,
            next_seq: 0,
        }
    }

    /// Number of interleaved samples waiting for a full frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one frame; returns every complete output frame it produced.
    pub fn push(&mut self, frame: PcmFrame) -> Vec<PcmFrame> {
        let channels = frame.channels.max(1);
        if channels != self.channels || frame.sample_rate != self.sample_rate {
            if !self.buffer.is_empty() {
                log::warn!(
                    "audio format changed ({}ch/{}Hz -> {}ch/{}Hz), dropping {} buffered samples",
                    self.channels,
                    self.sample_rate,
                    channels,
                    frame.sample_rate,
                    self.buffer.len()
                );
            }
            self.buffer.clear();
            self.channels = channels;
            self.sample_rate = frame.sample_rate;
        }

        self.buffer.extend(frame.samples);

        let out_len = self.frame_len * self.channels as usize;
        let mut out = Vec::with_capacity(self.buffer.len() / out_len);
        // Emit output chunks while we have enough samples buffered
        while self.buffer.len() >= out_len {
            let samples: Vec<i16> = self.buffer.drain(..out_len).collect();
            out.push(PcmFrame {
                seq: self.next_seq,
                samples,
                channels: self.channels,
                sample_rate: self.sample_rate,
            });
            self.next_seq += 1;
        }
        out
    }

    /// Emit whatever is buffered as a short final frame.
    pub fn flush(&mut self) -> Option<PcmFrame> {
        if self.buffer.is_empty() {
            return None;
        }
        let frame = PcmFrame {
            seq: self.next_seq,
            samples: self.buffer.drain(..).collect(),
            channels: self.channels,
            sample_rate: self.sample_rate,
        };
        self.next_seq += 1;
        Some(frame)
    }
}
