//! Second-order gradient boosting with a softmax objective.
//!
//! Each round grows one regression tree per class on the gradient and
//! hessian of the multi-class log loss. Split gain and leaf weights use
//! the regularised second-order form:
//!
//! ```text
//! gain = 1/2 [ G_L^2/(H_L+lambda) + G_R^2/(H_R+lambda) - G^2/(H+lambda) ] - gamma
//! w    = -G / (H + lambda)
//! ```

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use cp_types::{CpResult, Dataset, ExternalError, Label};

use crate::{argmax, check_trainable, not_fitted, Classifier, EncodedLabels};

const MIN_HESSIAN: f64 = 1e-16;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn value(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf(v) => return *v,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

struct TreeGrower<'a> {
    model: &'a GradientBoostedClassifier,
    data: &'a Dataset,
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    nodes: Vec<Node>,
}

impl TreeGrower<'_> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let lambda = self.model.lambda;
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| self.hess[r]).sum();
        let idx = self.nodes.len();
        self.nodes
            .push(Node::Leaf(-g / (h + lambda) * self.model.learning_rate));

        if depth >= self.model.max_depth || rows.len() < 2 {
            return idx;
        }

        let parent = g * g / (h + lambda);
        let mut best: Option<(usize, f64, f64)> = None;
        for &feature in self.features {
            let value = |r: usize| self.data.row(r)[feature];
            let mut sorted = rows.clone();
            sorted.sort_by(|a, b| {
                value(*a)
                    .partial_cmp(&value(*b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let (mut gl, mut hl) = (0.0, 0.0);
            for pos in 0..sorted.len() - 1 {
                let r = sorted[pos];
                gl += self.grad[r];
                hl += self.hess[r];
                let (here, next) = (value(r), value(sorted[pos + 1]));
                let (gr, hr) = (g - gl, h - hl);
                if here == next
                    || hl < self.model.min_child_weight
                    || hr < self.model.min_child_weight
                {
                    continue;
                }
                let gain = 0.5 * (gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent)
                    - self.model.gamma;
                if gain > 0.0 && best.map_or(true, |(_, _, b)| gain > b) {
                    let mid = here + (next - here) / 2.0;
                    best = Some((feature, if mid < next { mid } else { here }, gain));
                }
            }
        }

        let Some((feature, threshold, _)) = best else {
            return idx;
        };
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.data.row(r)[feature] <= threshold);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        idx
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Fitted {
    classes: Vec<Label>,
    /// `rounds[m][c]` is round `m`'s tree for class `c`.
    rounds: Vec<Vec<RegressionTree>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradientBoostedClassifier {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// Minimum hessian sum in each child.
    pub min_child_weight: f64,
    /// Minimum loss reduction to make a split.
    pub gamma: f64,
    /// Fraction of features sampled per tree.
    pub colsample_bytree: f64,
    /// L2 penalty on leaf weights.
    pub lambda: f64,
    pub seed: u64,
    fitted: Option<Fitted>,
}

impl GradientBoostedClassifier {
    pub fn new(n_estimators: usize, max_depth: usize, learning_rate: f64) -> Self {
        Self {
            n_estimators,
            max_depth,
            learning_rate,
            min_child_weight: 1.0,
            gamma: 0.0,
            colsample_bytree: 1.0,
            lambda: 1.0,
            seed: 0,
            fitted: None,
        }
    }

    pub fn with_min_child_weight(mut self, min_child_weight: f64) -> Self {
        self.min_child_weight = min_child_weight;
        self
    }

    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_colsample_bytree(mut self, colsample_bytree: f64) -> Self {
        self.colsample_bytree = colsample_bytree;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn margins(rounds: &[Vec<RegressionTree>], k: usize, row: &[f64]) -> Vec<f64> {
        let mut margin = vec![0.0; k];
        for round in rounds {
            for (m, tree) in margin.iter_mut().zip(round) {
                *m += tree.value(row);
            }
        }
        margin
    }
}

fn softmax_in_place(z: &mut [f64]) {
    let max = z.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut total = 0.0;
    for v in z.iter_mut() {
        *v = (*v - max).exp();
        total += *v;
    }
    for v in z.iter_mut() {
        *v /= total;
    }
}

impl Classifier for GradientBoostedClassifier {
    fn fit(&mut self, data: &Dataset) -> CpResult<()> {
        check_trainable(data, self.name())?;
        if !(self.learning_rate > 0.0) || !(self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0) {
            return Err(ExternalError::FitFailed {
                model: self.name().to_string(),
                message: format!(
                    "learning_rate must be > 0 and colsample_bytree in (0, 1], got {} and {}",
                    self.learning_rate, self.colsample_bytree
                ),
            }
            .into());
        }

        let enc = EncodedLabels::new(data);
        let k = enc.n_classes();
        let n = data.len();
        let d = data.n_features();
        let n_cols = ((self.colsample_bytree * d as f64).floor() as usize).clamp(1, d.max(1));
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        let mut margins = vec![vec![0.0; k]; n];
        let mut rounds = Vec::with_capacity(self.n_estimators);
        if k > 1 {
            for _ in 0..self.n_estimators {
                let probs: Vec<Vec<f64>> = margins
                    .iter()
                    .map(|m| {
                        let mut p = m.clone();
                        softmax_in_place(&mut p);
                        p
                    })
                    .collect();

                let mut round = Vec::with_capacity(k);
                for class in 0..k {
                    let grad: Vec<f64> = probs
                        .iter()
                        .zip(&enc.indices)
                        .map(|(p, &y)| p[class] - if y == class { 1.0 } else { 0.0 })
                        .collect();
                    let hess: Vec<f64> = probs
                        .iter()
                        .map(|p| (2.0 * p[class] * (1.0 - p[class])).max(MIN_HESSIAN))
                        .collect();

                    let mut features: Vec<usize> = (0..d).collect();
                    if n_cols < d {
                        features = features.partial_shuffle(&mut rng, n_cols).0.to_vec();
                        features.sort_unstable();
                    }

                    let mut grower = TreeGrower {
                        model: self,
                        data,
                        grad: &grad,
                        hess: &hess,
                        features: &features,
                        nodes: Vec::new(),
                    };
                    grower.grow((0..n).collect(), 0);
                    round.push(RegressionTree {
                        nodes: grower.nodes,
                    });
                }

                for (i, row) in data.rows().enumerate() {
                    for (m, tree) in margins[i].iter_mut().zip(&round) {
                        *m += tree.value(row);
                    }
                }
                rounds.push(round);
            }
        }
        debug!(rounds = rounds.len(), classes = k, "boosted regression trees");

        self.fitted = Some(Fitted {
            classes: enc.classes,
            rounds,
        });
        Ok(())
    }

    fn predict_row(&self, row: &[f64]) -> CpResult<Label> {
        let fitted = self.fitted.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        let margin = Self::margins(&fitted.rounds, fitted.classes.len(), row);
        Ok(fitted.classes[argmax(&margin)])
    }

    fn name(&self) -> &str {
        "gradient_boosting"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::blobs;

    #[test]
    fn boosting_separates_blobs() {
        let train = blobs(30, 3, 4, 41);
        let test = blobs(10, 3, 4, 42);
        let mut gbm = GradientBoostedClassifier::new(30, 3, 0.3);
        gbm.fit(&train).unwrap();
        assert!(gbm.score(&test).unwrap() > 0.9);
    }

    #[test]
    fn high_gamma_prunes_every_split() {
        let train = blobs(10, 2, 2, 43);
        let mut gbm = GradientBoostedClassifier::new(5, 4, 0.1).with_gamma(1e9);
        gbm.fit(&train).unwrap();
        let fitted = gbm.fitted.as_ref().unwrap();
        assert!(fitted
            .rounds
            .iter()
            .flatten()
            .all(|tree| tree.nodes.len() == 1));
    }

    #[test]
    fn column_sampling_is_seeded() {
        let train = blobs(15, 3, 6, 44);
        let mut a = GradientBoostedClassifier::new(5, 2, 0.1)
            .with_colsample_bytree(0.5)
            .with_seed(3);
        let mut b = a.clone();
        a.fit(&train).unwrap();
        b.fit(&train).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_colsample_rejected() {
        let mut gbm = GradientBoostedClassifier::new(5, 2, 0.1).with_colsample_bytree(0.0);
        assert!(gbm.fit(&blobs(5, 2, 2, 0)).unwrap_err().is_external());
    }

    #[test]
    fn leaf_weight_follows_second_order_formula() {
        // Single round, depth 0: every row gets -G/(H+lambda) * eta.
        let data = Dataset::new(vec![vec![0.0], vec![1.0]], vec![0, 1]).unwrap();
        let mut gbm = GradientBoostedClassifier::new(1, 0, 1.0);
        gbm.fit(&data).unwrap();
        let fitted = gbm.fitted.as_ref().unwrap();
        // p = 0.5 everywhere: G = 0 for both classes, so the leaf is 0.
        assert_eq!(fitted.rounds[0][0].value(&[0.0]), 0.0);
    }
}
