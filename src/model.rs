use std::io::Cursor;
use std::path::{Path, PathBuf};

use tract_onnx::prelude::*;

use crate::classifier::{Category, Classifier, ModelLoader};
use crate::error::ClassifierError;
use crate::preprocess::InputTensor;
use crate::ModelConfig;

/// Audio classifier backed by an ONNX model run through tract.
///
/// The model takes one f32 tensor of `input_shape` holding normalized mono
/// PCM, and returns scores whose last axis is the label vocabulary. Models
/// that score several patches per input yield one row per patch; rows are
/// averaged per label.
pub struct OnnxClassifier {
    model: TypedRunnableModel<TypedModel>,
    input_shape: Vec<usize>,
    labels: Vec<String>,
}

impl OnnxClassifier {
    pub fn from_bytes(
        model_bytes: &[u8],
        input_shape: Vec<usize>,
        labels: Vec<String>,
    ) -> TractResult<Self> {
        let model = tract_onnx::onnx()
            // load the model
            .model_for_read(&mut Cursor::new(model_bytes))?
            .with_input_fact(0, f32::fact(input_shape.clone()).into())?
            .into_optimized()?
            .into_runnable()?;

        Ok(Self {
            model,
            input_shape,
            labels,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn input_len(&self) -> usize {
        self.input_shape.iter().product()
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn classify(&mut self, input: &InputTensor) -> Result<Vec<Category>, ClassifierError> {
        let samples = Tensor::from_shape(&self.input_shape, input.as_slice())
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        // run the classifier on the input
        let out = self
            .model
            .run(tvec!(samples.into()))
            .map_err(|e| ClassifierError::Inference(e.to_string()))?
            .remove(0);
        let scores = out
            .as_slice::<f32>()
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let width = out.shape().last().copied().unwrap_or(scores.len());
        if width != self.labels.len() || width == 0 {
            return Err(ClassifierError::OutputShape {
                expected: self.labels.len(),
                actual: width,
            });
        }

        let rows = scores.len() / width;
        let mut means = vec![0f32; width];
        scores.chunks_exact(width).for_each(|row| {
            means
                .iter_mut()
                .zip(row)
                .for_each(|(m, s)| *m += *s / rows as f32);
        });

        Ok(self
            .labels
            .iter()
            .zip(means)
            .enumerate()
            .map(|(index, (label, score))| Category {
                index,
                label: label.clone(),
                score,
            })
            .collect())
    }
}

/// Reads the model asset and its label file at session start.
#[derive(Debug, Clone)]
pub struct OnnxModelLoader {
    model_path: PathBuf,
    labels_path: PathBuf,
    input_shape: Vec<usize>,
}

impl OnnxModelLoader {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            model_path: config.path.clone(),
            labels_path: config.labels_path.clone(),
            input_shape: config.input_shape.clone(),
        }
    }
}

/// One label per line; surrounding whitespace and blank lines are ignored.
pub(crate) fn parse_labels(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

fn read_labels(path: &Path) -> Result<Vec<String>, ClassifierError> {
    let content = std::fs::read_to_string(path).map_err(|e| ClassifierError::Labels {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let labels = parse_labels(&content);
    if labels.is_empty() {
        return Err(ClassifierError::Labels {
            path: path.to_path_buf(),
            message: "label file is empty".into(),
        });
    }
    Ok(labels)
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self) -> Result<Box<dyn Classifier>, ClassifierError> {
        let labels = read_labels(&self.labels_path)?;
        let bytes = std::fs::read(&self.model_path).map_err(|e| ClassifierError::ModelLoad {
            path: self.model_path.clone(),
            message: e.to_string(),
        })?;
        log::debug!(
            "model asset {} read, {} bytes",
            self.model_path.display(),
            bytes.len()
        );

        let classifier = OnnxClassifier::from_bytes(&bytes, self.input_shape.clone(), labels)
            .map_err(|e| ClassifierError::ModelLoad {
                path: self.model_path.clone(),
                message: e.to_string(),
            })?;
        Ok(Box::new(classifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;
    use tract_onnx::pb;
    use tract_onnx::pb::tensor_proto::DataType;

    fn float_value(name: &str, dims: &[i64]) -> pb::ValueInfoProto {
        let dim = dims
            .iter()
            .map(|d| pb::tensor_shape_proto::Dimension {
                value: Some(pb::tensor_shape_proto::dimension::Value::DimValue(*d)),
                ..Default::default()
            })
            .collect();
        pb::ValueInfoProto {
            name: name.into(),
            r#type: Some(pb::TypeProto {
                value: Some(pb::type_proto::Value::TensorType(pb::type_proto::Tensor {
                    elem_type: DataType::Float as i32,
                    shape: Some(pb::TensorShapeProto { dim }),
                })),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// A graph that reshapes a [1, 6] input into three rows of two scores.
    fn three_row_model() -> Vec<u8> {
        let shape = pb::TensorProto {
            name: "shape".into(),
            dims: vec![2],
            data_type: DataType::Int64 as i32,
            int64_data: vec![3, 2],
            ..Default::default()
        };
        let graph = pb::GraphProto {
            name: "scores".into(),
            node: vec![pb::NodeProto {
                name: "reshape".into(),
                op_type: "Reshape".into(),
                input: vec!["input".into(), "shape".into()],
                output: vec!["scores".into()],
                ..Default::default()
            }],
            initializer: vec![shape],
            input: vec![float_value("input", &[1, 6])],
            output: vec![float_value("scores", &[3, 2])],
            ..Default::default()
        };
        let model = pb::ModelProto {
            ir_version: 7,
            opset_import: vec![pb::OperatorSetIdProto {
                domain: String::new(),
                version: 13,
            }],
            graph: Some(graph),
            ..Default::default()
        };
        prost::Message::encode_to_vec(&model)
    }

    #[test]
    fn rows_are_averaged_per_label() {
        let labels = vec!["real".to_string(), "fake".to_string()];
        let mut classifier = OnnxClassifier::from_bytes(&three_row_model(), vec![1, 6], labels).unwrap();
        assert_eq!(classifier.input_len(), 6);

        let input = InputTensor::from(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.9]);
        let out = classifier.classify(&input).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].index, out[0].label.as_str()), (0, "real"));
        assert_eq!((out[1].index, out[1].label.as_str()), (1, "fake"));
        assert_relative_eq!(out[0].score, 0.3, epsilon = 1e-6);
        assert_relative_eq!(out[1].score, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn label_count_must_match_score_width() {
        let labels = vec!["real".to_string(), "fake".to_string(), "speech".to_string()];
        let mut classifier = OnnxClassifier::from_bytes(&three_row_model(), vec![1, 6], labels).unwrap();

        let err = classifier.classify(&InputTensor::from(vec![0.0; 6])).unwrap_err();
        assert!(matches!(
            err,
            ClassifierError::OutputShape {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn loader_builds_a_working_classifier() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model.onnx");
        let labels = dir.path().join("labels.txt");
        std::fs::write(&model, three_row_model()).unwrap();
        std::fs::write(&labels, "real\nfake\n").unwrap();

        let loader = OnnxModelLoader::new(&ModelConfig {
            path: model,
            labels_path: labels,
            input_shape: vec![1, 6],
        });
        let mut classifier = loader.load().unwrap();
        assert_eq!(classifier.labels(), &["real".to_string(), "fake".to_string()]);
        let out = classifier.classify(&InputTensor::from(vec![1.0; 6])).unwrap();
        assert_relative_eq!(out[1].score, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn labels_skip_blank_lines() {
        let labels = parse_labels("real\n\n  fake  \r\nspeech\n");
        assert_eq!(labels, vec!["real", "fake", "speech"]);
    }

    #[test]
    fn missing_labels_fail_before_model_is_read() {
        let loader = OnnxModelLoader::new(&ModelConfig {
            path: "/nonexistent/model.onnx".into(),
            labels_path: "/nonexistent/labels.txt".into(),
            input_shape: vec![1, 16],
        });
        assert!(matches!(loader.load(), Err(ClassifierError::Labels { .. })));
    }

    #[test]
    fn missing_model_is_a_load_error() {
        let mut labels = tempfile::NamedTempFile::new().unwrap();
        writeln!(labels, "real\nfake").unwrap();

        let loader = OnnxModelLoader::new(&ModelConfig {
            path: "/nonexistent/model.onnx".into(),
            labels_path: labels.path().to_path_buf(),
            input_shape: vec![1, 16],
        });
        match loader.load() {
            Err(ClassifierError::ModelLoad { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/model.onnx"))
            }
            Err(e) => panic!("unexpected error {:?}", e),
            Ok(_) => panic!("model should not load"),
        }
    }

    #[test]
    fn corrupt_model_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model.onnx");
        let labels = dir.path().join("labels.txt");
        std::fs::write(&model, b"definitely not protobuf").unwrap();
        std::fs::write(&labels, "real\nfake\n").unwrap();

        let loader = OnnxModelLoader::new(&ModelConfig {
            path: model,
            labels_path: labels,
            input_shape: vec![1, 16],
        });
        assert!(matches!(loader.load(), Err(ClassifierError::ModelLoad { .. })));
    }
}
