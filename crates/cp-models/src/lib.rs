//! Classifier families and cross-validation for Caliper.
//!
//! Every family implements [`Classifier`]. Models are trained on a
//! [`Dataset`] and predict one label per feature row. Most families wrap a
//! `linfa` estimator; extra trees and the gradient booster are native.

pub mod adaboost;
pub mod cv;
pub mod forest;
pub mod gbm;
pub mod knn;
pub mod logistic;
pub mod naive_bayes;
pub mod svm;
pub mod tree;

pub use adaboost::AdaBoostClassifier;
pub use cv::{cross_val_score, CvStrategy, Fold, KFold, StratifiedKFold};
pub use forest::{ExtraTreesClassifier, RandomForestClassifier};
pub use gbm::GradientBoostedClassifier;
pub use knn::{KNearestNeighbors, NeighborAlgorithm, NeighborWeights};
pub use logistic::{LogisticRegression, MultiClass};
pub use naive_bayes::GaussianNaiveBayes;
pub use svm::{Gamma, Kernel, SupportVectorClassifier};
pub use tree::{Criterion, MaxFeatures, TreeParams};

use ndarray::{Array1, Array2, Axis};

use cp_types::{CpResult, Dataset, ExternalError, Label};

/// A trainable label predictor.
pub trait Classifier: Send + Sync + std::fmt::Debug {
    /// Fit on the whole of `data`, replacing any earlier fit.
    fn fit(&mut self, data: &Dataset) -> CpResult<()>;

    /// Predict the label of one feature row.
    fn predict_row(&self, row: &[f64]) -> CpResult<Label>;

    /// Predict a label for every row of `data`.
    fn predict(&self, data: &Dataset) -> CpResult<Vec<Label>> {
        data.rows().map(|row| self.predict_row(row)).collect()
    }

    /// Fraction of rows of `data` predicted correctly.
    fn score(&self, data: &Dataset) -> CpResult<f64> {
        let predicted = self.predict(data)?;
        Ok(accuracy(data.labels(), &predicted))
    }

    /// Short model name used in logs and errors.
    fn name(&self) -> &str;
}

/// Fraction of positions where `truth` and `predicted` agree.
pub fn accuracy(truth: &[Label], predicted: &[Label]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let correct = truth.iter().zip(predicted).filter(|(t, p)| t == p).count();
    correct as f64 / truth.len() as f64
}

/// Label set of the training data plus each row's index into it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EncodedLabels {
    pub classes: Vec<Label>,
    pub indices: Vec<usize>,
}

impl EncodedLabels {
    pub fn new(data: &Dataset) -> Self {
        let classes = data.classes();
        let indices = data
            .labels()
            .iter()
            .map(|l| classes.binary_search(l).unwrap_or(0))
            .collect();
        Self { classes, indices }
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    /// Class indices as a target array.
    pub fn targets(&self) -> Array1<usize> {
        Array1::from(self.indices.clone())
    }

    /// Map predicted class indices back to labels.
    pub fn decode(&self, predicted: &Array1<usize>) -> Vec<Label> {
        predicted.iter().map(|&i| self.classes[i]).collect()
    }
}

/// Reject training sets no family can learn from.
pub(crate) fn check_trainable(data: &Dataset, model: &str) -> CpResult<()> {
    if data.is_empty() {
        return Err(ExternalError::FitFailed {
            model: model.to_string(),
            message: "training data is empty".to_string(),
        }
        .into());
    }
    Ok(())
}

pub(crate) fn not_fitted(model: &str) -> cp_types::CpError {
    ExternalError::NotFitted {
        model: model.to_string(),
    }
    .into()
}

/// Index of the largest value, earliest on ties.
pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// Training rows as an `n x d` matrix.
pub(crate) fn records(data: &Dataset) -> Array2<f64> {
    Array2::from_shape_fn((data.len(), data.n_features()), |(i, j)| data.row(i)[j])
}

/// One feature row as a `1 x d` matrix.
pub(crate) fn row_records(row: &[f64]) -> Array2<f64> {
    Array1::from(row.to_vec()).insert_axis(Axis(0))
}

pub(crate) fn fit_failed(model: &str, err: impl std::fmt::Display) -> cp_types::CpError {
    ExternalError::FitFailed {
        model: model.to_string(),
        message: err.to_string(),
    }
    .into()
}

/// Reject rows whose width differs from the training data.
pub(crate) fn check_width(model: &str, expected: usize, actual: usize) -> CpResult<()> {
    if expected != actual {
        return Err(ExternalError::Other(format!(
            "{model} was fitted on {expected} features, got {actual}"
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use cp_types::Dataset;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Gaussian blobs around well separated centres, one per class.
    pub fn blobs(per_class: usize, n_classes: usize, n_features: usize, seed: u64) -> Dataset {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for class in 0..n_classes {
            for _ in 0..per_class {
                let row: Vec<f64> = (0..n_features)
                    .map(|f| {
                        let centre = if f % n_classes == class { 4.0 } else { 0.0 };
                        centre + rng.gen_range(-1.0..1.0)
                    })
                    .collect();
                rows.push(row);
                labels.push(class as i64);
            }
        }
        Dataset::new(rows, labels).unwrap()
    }
}
