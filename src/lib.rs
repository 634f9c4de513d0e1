use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;
pub use error::{
    ClassifierError, ConfigError, DetectorError, ErrorKind, PreprocessError, SourceError,
};

mod rechunker;
pub use rechunker::Rechunker;

mod source;
pub use source::{
    AudioFrameSource, QueuedSource, RecordPermission, SourceFactory, SourcePoll, StaticPermission,
};

mod tap;
pub use tap::{AudioFrameObserver, RawAudioFrame, RawFrameProvider, TapSource, TapSourceFactory};

mod sampler;
pub use sampler::{Sampler, SamplerFactory};

mod wav;
pub use wav::{read_wav_frames, WavSourceFactory};

mod preprocess;
pub use preprocess::{normalize_sample, InputTensor, Preprocessor};

mod classifier;
pub use classifier::{Category, Classifier, ClassifierEngine, EngineState, ModelLoader};

mod model;
pub use model::{OnnxClassifier, OnnxModelLoader};

mod aggregate;
pub use aggregate::ScoreAggregator;

mod bridge;
pub use bridge::{DetectionEvent, EventBridge, EventSink, MainExecutor, MainQueue, MainQueueHandle};

mod session;
pub use session::{DetectionSession, PipelineSettings, SessionState, StartOutcome};

mod channel;
pub use channel::{Command, DetectorChannel, Reply, UnsupportedOperation};

/// Sample rate the bundled model was trained at.
pub const MODEL_SAMPLE_RATE: u32 = 16000;

/// Samples per channel at `sample_rate` covering the same span as
/// `model_input_len` samples at [`MODEL_SAMPLE_RATE`].
pub fn source_frame_len(model_input_len: usize, sample_rate: u32) -> usize {
    let model_rate = MODEL_SAMPLE_RATE as u64;
    let rate = match sample_rate {
        0 => model_rate,
        rate => rate as u64,
    };
    ((model_input_len as u64 * rate + model_rate / 2) / model_rate).max(1) as usize
}

/// A buffer of interleaved signed 16-bit PCM samples, as delivered by a source.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmFrame {
    /// Capture order, assigned by the source.
    pub seq: u64,
    pub samples: Vec<i16>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl PcmFrame {
    pub fn mono(seq: u64, samples: Vec<i16>) -> Self {
        Self {
            seq,
            samples,
            channels: 1,
            sample_rate: MODEL_SAMPLE_RATE,
        }
    }

    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub labels_path: PathBuf,
    /// Shape of the model's single f32 input; its product is the frame length.
    pub input_shape: Vec<usize>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/deepvoice_classifier.onnx"),
            labels_path: PathBuf::from("models/deepvoice_labels.txt"),
            input_shape: vec![1, 15600],
        }
    }
}

impl ModelConfig {
    pub fn input_len(&self) -> usize {
        self.input_shape.iter().product()
    }
}

/// Options applied to the classifier's own result set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierOptions {
    /// Categories scoring below this are dropped from the results.
    pub score_threshold: f32,
    /// Cap on returned categories per frame; `None` keeps all of them.
    pub max_results: Option<usize>,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            score_threshold: 0.3,
            max_results: Some(1),
        }
    }
}

/// How frames whose length differs from the model input are fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LengthPolicy {
    /// Zero-pad short frames, keep the most recent samples of long ones.
    #[default]
    PadOrTruncate,
    /// Resample the whole frame to the model input length.
    Resample,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub length_policy: LengthPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Dedicated microphone recording session.
    #[default]
    Capture,
    /// Observer on an externally owned call audio pipeline.
    Tap,
    /// Offline WAV file.
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Recorder executable, fed raw S16_LE on stdout.
    pub recorder: String,
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel per frame; defaults to the model input length.
    pub frame_len: Option<usize>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            recorder: "arecord".to_string(),
            device: None,
            sample_rate: MODEL_SAMPLE_RATE,
            channels: 1,
            frame_len: None,
        }
    }
}

/// Which raw frame callback of the call engine the tap listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TapStream {
    Record,
    #[default]
    Playback,
    Mixed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    pub stream: TapStream,
    /// Reassemble callbacks into frames of this many samples per channel.
    pub frame_len: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub path: Option<PathBuf>,
    pub frame_len: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub mode: SourceMode,
    pub capture: CaptureConfig,
    pub tap: TapConfig,
    pub file: FileConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long the worker waits for a frame before re-checking the running flag.
    pub poll_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub classifier: ClassifierOptions,
    pub target_label: String,
    pub preprocess: PreprocessConfig,
    pub source: SourceConfig,
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            classifier: ClassifierOptions::default(),
            target_label: "fake".to_string(),
            preprocess: PreprocessConfig::default(),
            source: SourceConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.classifier.score_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid {
                field: "classifier.score_threshold",
                message: format!("{} is outside [0, 1]", threshold),
            });
        }
        if self.classifier.max_results == Some(0) {
            return Err(ConfigError::Invalid {
                field: "classifier.max_results",
                message: "must be at least 1".into(),
            });
        }
        if self.model.input_len() == 0 {
            return Err(ConfigError::Invalid {
                field: "model.input_shape",
                message: format!("{:?} has no elements", self.model.input_shape),
            });
        }
        if self.target_label.is_empty() {
            return Err(ConfigError::Invalid {
                field: "target_label",
                message: "must not be empty".into(),
            });
        }
        if self.source.capture.channels == 0 {
            return Err(ConfigError::Invalid {
                field: "source.capture.channels",
                message: "must be at least 1".into(),
            });
        }
        if self.source.mode == SourceMode::File && self.source.file.path.is_none() {
            return Err(ConfigError::Invalid {
                field: "source.file.path",
                message: "required in file mode".into(),
            });
        }
        Ok(())
    }

    /// Settings the session controller needs from this configuration.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            classifier: self.classifier,
            target_label: self.target_label.clone(),
            length_policy: self.preprocess.length_policy,
            poll_interval: Duration::from_millis(self.session.poll_interval_ms.max(1)),
        }
    }
}
