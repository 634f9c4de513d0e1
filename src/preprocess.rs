//! PCM frame to model input conversion.

use rubato::{FftFixedIn, Resampler};

use crate::error::PreprocessError;
use crate::{LengthPolicy, PcmFrame, MODEL_SAMPLE_RATE};

/// Map a signed 16-bit sample to approximately [-1, 1].
#[inline]
pub fn normalize_sample(v: i16) -> f32 {
    v as f32 / 32768.0
}

/// Normalized mono samples sized to the model input.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor(Vec<f32>);

impl InputTensor {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f32>> for InputTensor {
    fn from(v: Vec<f32>) -> Self {
        Self(v)
    }
}

/// Stateless frame preprocessor: downmix, scale, convert to the model's
/// sample rate, then fit to the input length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preprocessor {
    input_len: usize,
    policy: LengthPolicy,
}

impl Preprocessor {
    pub fn new(input_len: usize, policy: LengthPolicy) -> Self {
        Self { input_len, policy }
    }

    pub fn process(&self, frame: &PcmFrame) -> Result<InputTensor, PreprocessError> {
        let mono = downmix(frame);
        let rate = match frame.sample_rate {
            0 => MODEL_SAMPLE_RATE,
            rate => rate,
        };
        let mono = convert(&mono, rate as usize, MODEL_SAMPLE_RATE as usize)?;

        let fitted = match self.policy {
            LengthPolicy::PadOrTruncate => pad_or_truncate(mono, self.input_len),
            LengthPolicy::Resample => {
                let mut out = convert(&mono, mono.len(), self.input_len)?;
                out.resize(self.input_len, 0.0);
                out
            }
        };
        Ok(InputTensor(fitted))
    }
}

fn downmix(frame: &PcmFrame) -> Vec<f32> {
    let channels = frame.channels.max(1) as usize;
    if channels == 1 {
        return frame.samples.iter().copied().map(normalize_sample).collect();
    }
    frame
        .samples
        .chunks_exact(channels)
        .map(|c| {
            let sum: i32 = c.iter().map(|&s| s as i32).sum();
            sum as f32 / channels as f32 / 32768.0
        })
        .collect()
}

fn pad_or_truncate(mut samples: Vec<f32>, len: usize) -> Vec<f32> {
    if samples.len() > len {
        // keep the most recent audio
        samples.drain(..samples.len() - len);
    } else {
        samples.resize(len, 0.0);
    }
    samples
}

/// Band-limited conversion of a whole buffer by the ratio `to / from`.
///
/// The buffer is processed as one chunk, then flushed, and the resampler's
/// delay is trimmed so output sample `i` lines up with input time `i * from / to`.
fn convert(samples: &[f32], from: usize, to: usize) -> Result<Vec<f32>, PreprocessError> {
    if from == to || samples.is_empty() || to == 0 {
        return Ok(samples.to_vec());
    }
    let out_len = (samples.len() * to + from / 2) / from;
    if samples.len() == 1 {
        return Ok(vec![samples[0]; out_len]);
    }

    let err = |message: String| PreprocessError::Resample { from, to, message };
    let mut resampler = FftFixedIn::<f32>::new(from, to, samples.len(), 1, 1)
        .map_err(|e| err(e.to_string()))?;
    let delay = resampler.output_delay();

    let mut out: Vec<f32> = resampler
        .process(&[samples], None)
        .map_err(|e| err(e.to_string()))?
        .into_iter()
        .next()
        .unwrap_or_default();
    while out.len() < delay + out_len {
        let tail = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| err(e.to_string()))?
            .into_iter()
            .next()
            .unwrap_or_default();
        if tail.is_empty() {
            break;
        }
        out.extend(tail);
    }

    out.drain(..delay.min(out.len()));
    out.resize(out_len, 0.0);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn normalization_bounds() {
        assert_eq!(normalize_sample(i16::MIN), -1.0);
        assert_eq!(normalize_sample(0), 0.0);
        assert_relative_eq!(normalize_sample(i16::MAX), 0.999_969_5, epsilon = 1e-7);
        for v in [-32768i16, -12345, -1, 1, 16384, 32767] {
            assert_eq!(normalize_sample(v), v as f32 / 32768.0);
            assert!((-1.0..1.0).contains(&normalize_sample(v)));
        }
    }

    #[test]
    fn mono_frame_of_exact_length_is_only_scaled() {
        let p = Preprocessor::new(4, LengthPolicy::PadOrTruncate);
        let t = p.process(&PcmFrame::mono(0, vec![-32768, -16384, 16384, 32767])).unwrap();
        assert_eq!(t.as_slice(), &[-1.0, -0.5, 0.5, 32767.0 / 32768.0]);
    }

    #[test]
    fn short_frames_are_zero_padded() {
        let p = Preprocessor::new(5, LengthPolicy::PadOrTruncate);
        let t = p.process(&PcmFrame::mono(0, vec![16384, 16384])).unwrap();
        assert_eq!(t.as_slice(), &[0.5, 0.5, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn long_frames_keep_the_tail() {
        let p = Preprocessor::new(2, LengthPolicy::PadOrTruncate);
        let t = p.process(&PcmFrame::mono(0, vec![0, 0, 16384, -16384])).unwrap();
        assert_eq!(t.as_slice(), &[0.5, -0.5]);
    }

    #[test]
    fn stereo_is_averaged() {
        let p = Preprocessor::new(2, LengthPolicy::PadOrTruncate);
        let frame = PcmFrame {
            seq: 0,
            samples: vec![16384, 0, -32768, -32768],
            channels: 2,
            sample_rate: 16000,
        };
        assert_eq!(p.process(&frame).unwrap().as_slice(), &[0.25, -1.0]);
    }

    #[test]
    fn frames_above_model_rate_are_decimated() {
        // 3 ms ramp at 48 kHz is 48 samples at 16 kHz; none of it should be cut.
        let ramp: Vec<i16> = (0..144).map(|i| i * 100).collect();
        let frame = PcmFrame {
            seq: 0,
            samples: ramp,
            channels: 1,
            sample_rate: 48000,
        };
        let t = Preprocessor::new(48, LengthPolicy::PadOrTruncate)
            .process(&frame)
            .unwrap();

        assert_eq!(t.len(), 48);
        assert!(t.as_slice()[0].abs() < 0.05, "first = {}", t.as_slice()[0]);
        // output sample i sits at input sample 3 * i
        for i in [12usize, 24, 36] {
            assert_relative_eq!(
                t.as_slice()[i],
                normalize_sample((3 * i * 100) as i16),
                epsilon = 0.02
            );
        }
    }

    #[test]
    fn rate_conversion_length_follows_the_ratio() {
        assert_eq!(convert(&[0.1; 144], 48000, 16000).unwrap().len(), 48);
        assert_eq!(convert(&[0.1; 80], 8000, 16000).unwrap().len(), 160);
        assert_eq!(convert(&[0.1, 0.2], 16000, 16000).unwrap(), vec![0.1, 0.2]);
    }

    #[test]
    fn resample_policy_preserves_level() {
        let p = Preprocessor::new(160, LengthPolicy::Resample);
        let t = p.process(&PcmFrame::mono(0, vec![16384; 100])).unwrap();
        assert_eq!(t.len(), 160);
        assert_relative_eq!(t.as_slice()[80], 0.5, epsilon = 0.02);
    }

    #[test]
    fn output_length_depends_only_on_input_length() {
        for policy in [LengthPolicy::PadOrTruncate, LengthPolicy::Resample] {
            let p = Preprocessor::new(160, policy);
            for n in [0usize, 1, 80, 160, 161, 480] {
                let frame = PcmFrame::mono(0, vec![100; n]);
                let a = p.process(&frame).unwrap();
                let b = p.process(&frame).unwrap();
                assert_eq!(a.len(), 160);
                assert_eq!(a, b);
            }
        }
    }
}
