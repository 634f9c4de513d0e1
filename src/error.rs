//! Error types for the detection pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by audio frame sources.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("recording permission denied: {0}")]
    PermissionDenied(String),

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("failed to register audio frame observer: {0}")]
    Observer(String),

    #[error("failed to read audio file: {0}")]
    Wav(#[from] hound::Error),

    #[error("audio I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading or running the classification model.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("failed to load model {path}: {message}")]
    ModelLoad { path: PathBuf, message: String },

    #[error("failed to load labels {path}: {message}")]
    Labels { path: PathBuf, message: String },

    #[error("classifier is not loaded")]
    NotLoaded,

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("model produced {actual} scores per row, label vocabulary has {expected}")]
    OutputShape { expected: usize, actual: usize },
}

/// Errors raised while fitting a frame to the model input.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("cannot resample {from} to {to}: {message}")]
    Resample {
        from: usize,
        to: usize,
        message: String,
    },
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Category of a failure as seen by the application layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Recording permission missing; retry after the grant.
    PermissionDenied,
    /// Model or audio device could not be initialized for this session.
    InitError,
    /// The running pipeline failed after a successful start.
    InferenceError,
}

impl ErrorKind {
    /// Wire code used on the control and event surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::InitError => "INIT_ERROR",
            ErrorKind::InferenceError => "INFERENCE_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Session-level error surfaced by the controller.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("audio recording permission not granted")]
    PermissionDenied,

    #[error("model initialization failed: {0}")]
    ModelLoad(String),

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("classification failed: {0}")]
    Inference(String),

    #[error("failed to spawn inference worker: {0}")]
    Worker(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DetectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DetectorError::PermissionDenied => ErrorKind::PermissionDenied,
            DetectorError::Inference(_) => ErrorKind::InferenceError,
            DetectorError::ModelLoad(_)
            | DetectorError::DeviceUnavailable(_)
            | DetectorError::Worker(_)
            | DetectorError::Config(_) => ErrorKind::InitError,
        }
    }
}

impl From<ClassifierError> for DetectorError {
    fn from(e: ClassifierError) -> Self {
        match e {
            ClassifierError::ModelLoad { .. } | ClassifierError::Labels { .. } => {
                DetectorError::ModelLoad(e.to_string())
            }
            ClassifierError::NotLoaded
            | ClassifierError::Inference(_)
            | ClassifierError::OutputShape { .. } => DetectorError::Inference(e.to_string()),
        }
    }
}

impl From<PreprocessError> for DetectorError {
    fn from(e: PreprocessError) -> Self {
        DetectorError::Inference(e.to_string())
    }
}

impl From<SourceError> for DetectorError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::PermissionDenied(_) => DetectorError::PermissionDenied,
            other => DetectorError::DeviceUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_wire_codes() {
        assert_eq!(DetectorError::PermissionDenied.kind().code(), "PERMISSION_DENIED");
        assert_eq!(DetectorError::ModelLoad("x".into()).kind().code(), "INIT_ERROR");
        assert_eq!(
            DetectorError::DeviceUnavailable("busy".into()).kind(),
            ErrorKind::InitError
        );
        assert_eq!(
            DetectorError::Inference("boom".into()).kind().code(),
            "INFERENCE_ERROR"
        );
    }

    #[test]
    fn classifier_errors_split_between_init_and_inference() {
        let load = DetectorError::from(ClassifierError::ModelLoad {
            path: PathBuf::from("missing.onnx"),
            message: "no such file".into(),
        });
        assert_eq!(load.kind(), ErrorKind::InitError);
        assert!(load.to_string().contains("missing.onnx"));

        let shape = DetectorError::from(ClassifierError::OutputShape {
            expected: 2,
            actual: 521,
        });
        assert_eq!(shape.kind(), ErrorKind::InferenceError);
    }

    #[test]
    fn source_permission_error_is_permission_denied() {
        let e = DetectorError::from(SourceError::PermissionDenied("mic".into()));
        assert!(matches!(e, DetectorError::PermissionDenied));

        let e = DetectorError::from(SourceError::DeviceUnavailable("busy".into()));
        assert!(matches!(e, DetectorError::DeviceUnavailable(_)));
    }

    #[test]
    fn resample_failure_is_an_inference_error() {
        let e = DetectorError::from(PreprocessError::Resample {
            from: 48000,
            to: 16000,
            message: "bad chunk".into(),
        });
        assert_eq!(e.kind(), ErrorKind::InferenceError);
        assert!(e.to_string().contains("48000"));
    }
}
