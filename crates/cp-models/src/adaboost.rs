//! Multi-class AdaBoost (SAMME) over `linfa-trees` stumps.
//!
//! Sample weights are kept at mean one so the stump's minimum leaf weight
//! still means roughly one row.

use linfa::prelude::*;
use linfa_trees::DecisionTree;
use ndarray::{Array1, Array2};
use tracing::debug;

use cp_types::{CpResult, Dataset, ExternalError, Label};

use crate::{
    argmax, check_trainable, check_width, fit_failed, not_fitted, records, row_records, Classifier,
    EncodedLabels,
};

#[derive(Debug)]
struct Fitted {
    labels: EncodedLabels,
    n_features: usize,
    learners: Vec<(DecisionTree<f64, usize>, f64)>,
}

#[derive(Debug)]
pub struct AdaBoostClassifier {
    pub n_estimators: usize,
    /// Shrinks every learner's vote.
    pub learning_rate: f64,
    fitted: Option<Fitted>,
}

impl AdaBoostClassifier {
    pub fn new(n_estimators: usize, learning_rate: f64) -> Self {
        Self {
            n_estimators,
            learning_rate,
            fitted: None,
        }
    }

    /// Number of learners kept after early stopping.
    pub fn n_learners(&self) -> usize {
        self.fitted.as_ref().map_or(0, |f| f.learners.len())
    }

    fn stump(&self, x: &Array2<f64>, y: &Array1<usize>, weights: &[f64]) -> CpResult<DecisionTree<f64, usize>> {
        let weights: Array1<f32> = weights.iter().map(|&w| w as f32).collect();
        let train = linfa::Dataset::new(x.clone(), y.clone()).with_weights(weights);
        DecisionTree::params()
            .max_depth(Some(1))
            .fit(&train)
            .map_err(|e| fit_failed(self.name(), e))
    }

    fn predict_records(&self, x: &Array2<f64>) -> CpResult<Vec<Label>> {
        let fitted = self.fitted.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        check_width(self.name(), fitted.n_features, x.ncols())?;
        let mut votes = vec![vec![0.0; fitted.labels.n_classes()]; x.nrows()];
        for (tree, alpha) in &fitted.learners {
            let predicted: Array1<usize> = tree.predict(x);
            for (row_votes, class) in votes.iter_mut().zip(predicted.iter()) {
                row_votes[*class] += alpha;
            }
        }
        Ok(votes
            .iter()
            .map(|v| fitted.labels.classes[argmax(v)])
            .collect())
    }
}

impl Classifier for AdaBoostClassifier {
    fn fit(&mut self, data: &Dataset) -> CpResult<()> {
        check_trainable(data, self.name())?;
        if self.n_estimators == 0 || !(self.learning_rate > 0.0) {
            return Err(ExternalError::FitFailed {
                model: self.name().to_string(),
                message: format!(
                    "need n_estimators >= 1 and learning_rate > 0, got {} and {}",
                    self.n_estimators, self.learning_rate
                ),
            }
            .into());
        }

        let labels = EncodedLabels::new(data);
        let k = labels.n_classes();
        let n = data.len();
        let x = records(data);
        let y = labels.targets();
        let mut weights = vec![1.0; n];
        let mut learners = Vec::new();

        if k == 1 {
            learners.push((self.stump(&x, &y, &weights)?, 1.0));
        }

        while k > 1 && learners.len() < self.n_estimators {
            let tree = self.stump(&x, &y, &weights)?;
            let predicted: Array1<usize> = tree.predict(&x);
            let missed: Vec<bool> = predicted.iter().zip(y.iter()).map(|(p, t)| p != t).collect();
            let total: f64 = weights.iter().sum();
            let error = missed
                .iter()
                .zip(&weights)
                .filter(|(m, _)| **m)
                .map(|(_, w)| w)
                .sum::<f64>()
                / total;

            if error <= 0.0 {
                learners.push((tree, 1.0));
                break;
            }
            if error >= 1.0 - 1.0 / k as f64 {
                if learners.is_empty() {
                    learners.push((tree, 1.0));
                }
                break;
            }

            let alpha = self.learning_rate * (((1.0 - error) / error).ln() + ((k - 1) as f64).ln());
            for (w, m) in weights.iter_mut().zip(&missed) {
                if *m {
                    *w *= alpha.exp();
                }
            }
            let total: f64 = weights.iter().sum();
            for w in weights.iter_mut() {
                *w *= n as f64 / total;
            }
            learners.push((tree, alpha));
        }
        debug!("{}: kept {} of {} stumps", self.name(), learners.len(), self.n_estimators);

        self.fitted = Some(Fitted {
            labels,
            n_features: data.n_features(),
            learners,
        });
        Ok(())
    }

    fn predict_row(&self, row: &[f64]) -> CpResult<Label> {
        Ok(self.predict_records(&row_records(row))?[0])
    }

    fn predict(&self, data: &Dataset) -> CpResult<Vec<Label>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        self.predict_records(&records(data))
    }

    fn name(&self) -> &str {
        "adaboost"
    }
}
