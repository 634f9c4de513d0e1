use crate::classifier::Category;

/// Reduces a frame's result set to the probability of the target class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScoreAggregator {
    target_label: String,
}

impl Default for ScoreAggregator {
    fn default() -> Self {
        Self::new("fake")
    }
}

impl ScoreAggregator {
    pub fn new<S: Into<String>>(target_label: S) -> Self {
        Self {
            target_label: target_label.into(),
        }
    }

    /// Best-scoring category carrying the target label, if any.
    pub fn best_match<'a>(&self, categories: &'a [Category]) -> Option<&'a Category> {
        categories
            .iter()
            .filter(|c| c.label == self.target_label)
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }

    /// Score for this frame; 0.0 when the target label is absent.
    pub fn select(&self, categories: &[Category]) -> f32 {
        self.best_match(categories).map(|c| c.score).unwrap_or(0.0)
    }
}
