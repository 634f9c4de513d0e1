//! Classifier abstraction and the per-session engine lifecycle.

use crate::error::ClassifierError;
use crate::preprocess::InputTensor;
use crate::ClassifierOptions;

/// One labeled confidence from a single inference.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub index: usize,
    pub label: String,
    pub score: f32,
}

impl Category {
    pub fn new<S: Into<String>>(index: usize, label: S, score: f32) -> Self {
        Self {
            index,
            label: label.into(),
            score,
        }
    }
}

/// A loaded audio classification model.
pub trait Classifier: Send {
    /// Number of f32 samples the model consumes per inference.
    fn input_len(&self) -> usize;

    fn labels(&self) -> &[String];

    /// Raw confidence for every label in the vocabulary.
    fn classify(&mut self, input: &InputTensor) -> Result<Vec<Category>, ClassifierError>;
}

/// Builds a fresh classifier for each session.
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn Classifier>, ClassifierError>;
}

impl ClassifierOptions {
    /// Filter to the classifier's result set: drop categories below the
    /// threshold, order by descending score, keep at most `max_results`.
    pub fn apply(&self, mut categories: Vec<Category>) -> Vec<Category> {
        categories.retain(|c| c.score >= self.score_threshold);
        categories.sort_by(|a, b| b.score.total_cmp(&a.score));
        if let Some(max) = self.max_results {
            categories.truncate(max);
        }
        categories
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Loaded,
    Released,
}

/// Owns one loaded classifier for the lifetime of a session.
pub struct ClassifierEngine {
    classifier: Option<Box<dyn Classifier>>,
    options: ClassifierOptions,
    state: EngineState,
}

impl ClassifierEngine {
    pub fn new(options: ClassifierOptions) -> Self {
        Self {
            classifier: None,
            options,
            state: EngineState::Uninitialized,
        }
    }

    /// Load the model. A failure leaves the engine uninitialized.
    pub fn load(&mut self, loader: &dyn ModelLoader) -> Result<(), ClassifierError> {
        self.release();
        let classifier = loader.load()?;
        log::info!(
            "classifier loaded: {} labels, {} input samples",
            classifier.labels().len(),
            classifier.input_len()
        );
        self.classifier = Some(classifier);
        self.state = EngineState::Loaded;
        Ok(())
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn input_len(&self) -> Option<usize> {
        self.classifier.as_ref().map(|c| c.input_len())
    }

    /// Run one inference and filter the result set through the options.
    pub fn classify(&mut self, input: &InputTensor) -> Result<Vec<Category>, ClassifierError> {
        let classifier = self.classifier.as_mut().ok_or(ClassifierError::NotLoaded)?;
        let categories = classifier.classify(input)?;
        Ok(self.options.apply(categories))
    }

    /// Free the model. Returns whether this call released anything.
    pub fn release(&mut self) -> bool {
        match self.classifier.take() {
            Some(classifier) => {
                drop(classifier);
                self.state = EngineState::Released;
                log::info!("classifier released");
                true
            }
            None => false,
        }
    }
}

impl Drop for ClassifierEngine {
    fn drop(&mut self) {
        self.release();
    }
}
