//! Tree ensembles: random forests on `linfa-trees` and extremely
//! randomised trees.
//!
//! Trees are grown in parallel, tree `i` seeded with `seed + i`, so a
//! fitted ensemble does not depend on the thread count.

use linfa::prelude::*;
use linfa_trees::{DecisionTree, SplitQuality};
use ndarray::{Array1, Array2, Axis};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

use cp_types::{CpResult, Dataset, ExternalError, Label};

use crate::tree::{Criterion, RandomizedTree, TreeParams};
use crate::{
    argmax, check_trainable, check_width, fit_failed, not_fitted, records, row_records, Classifier,
    EncodedLabels,
};

fn check_estimators(model: &str, n_estimators: usize) -> CpResult<()> {
    if n_estimators == 0 {
        return Err(ExternalError::FitFailed {
            model: model.to_string(),
            message: "n_estimators must be at least 1".to_string(),
        }
        .into());
    }
    Ok(())
}

fn sample_rows(rng: &mut ChaCha8Rng, n: usize, bootstrap: bool) -> Vec<usize> {
    if bootstrap {
        (0..n).map(|_| rng.gen_range(0..n)).collect()
    } else {
        (0..n).collect()
    }
}

/// One forest member: a CART tree over a random feature subset.
#[derive(Debug)]
struct Member {
    features: Vec<usize>,
    tree: DecisionTree<f64, usize>,
}

#[derive(Debug)]
struct Forest {
    labels: EncodedLabels,
    n_features: usize,
    members: Vec<Member>,
}

/// Bootstrap-aggregated CART trees, each grown on a random subspace of
/// `max_features` columns. Members vote by majority.
#[derive(Debug)]
pub struct RandomForestClassifier {
    pub n_estimators: usize,
    pub params: TreeParams,
    pub bootstrap: bool,
    pub seed: u64,
    fitted: Option<Forest>,
}

impl RandomForestClassifier {
    pub fn new(n_estimators: usize) -> Self {
        Self {
            n_estimators,
            params: TreeParams::default(),
            bootstrap: true,
            seed: 0,
            fitted: None,
        }
    }

    pub fn with_params(mut self, params: TreeParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn predict_records(&self, x: &Array2<f64>) -> CpResult<Vec<Label>> {
        let forest = self.fitted.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        check_width(self.name(), forest.n_features, x.ncols())?;
        let mut votes = vec![vec![0.0; forest.labels.n_classes()]; x.nrows()];
        for member in &forest.members {
            let predicted: Array1<usize> = member.tree.predict(&x.select(Axis(1), &member.features));
            for (row_votes, class) in votes.iter_mut().zip(predicted.iter()) {
                row_votes[*class] += 1.0;
            }
        }
        Ok(votes
            .iter()
            .map(|v| forest.labels.classes[argmax(v)])
            .collect())
    }
}

impl Classifier for RandomForestClassifier {
    fn fit(&mut self, data: &Dataset) -> CpResult<()> {
        let model = self.name();
        check_trainable(data, model)?;
        check_estimators(model, self.n_estimators)?;

        let labels = EncodedLabels::new(data);
        let x = records(data);
        let y = labels.targets();
        let (n, d) = x.dim();
        let m = self.params.max_features.resolve(d);
        let quality = match self.params.criterion {
            Criterion::Gini => SplitQuality::Gini,
            Criterion::Entropy => SplitQuality::Entropy,
        };
        let params = self.params;

        let members = (0..self.n_estimators)
            .into_par_iter()
            .map(|i| -> CpResult<Member> {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(i as u64));
                let rows = sample_rows(&mut rng, n, self.bootstrap);
                let mut features = index::sample(&mut rng, d, m).into_vec();
                features.sort_unstable();

                let subset = linfa::Dataset::new(
                    x.select(Axis(0), &rows).select(Axis(1), &features),
                    y.select(Axis(0), &rows),
                );
                let tree = DecisionTree::params()
                    .split_quality(quality)
                    .max_depth(params.max_depth)
                    .min_weight_split(params.min_samples_split as f32)
                    .min_weight_leaf(params.min_samples_leaf as f32)
                    .fit(&subset)
                    .map_err(|e| fit_failed(model, e))?;
                Ok(Member { features, tree })
            })
            .collect::<CpResult<Vec<_>>>()?;
        debug!("{}: grew {} trees on {} rows, {} of {} features each", model, members.len(), n, m, d);

        self.fitted = Some(Forest {
            labels,
            n_features: d,
            members,
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
        "random_forest"
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Ensemble {
    classes: Vec<Label>,
    n_features: usize,
    trees: Vec<RandomizedTree>,
}

impl Ensemble {
    /// Class with the highest mean leaf distribution.
    fn vote(&self, row: &[f64]) -> Label {
        let mut mean = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            for (m, p) in mean.iter_mut().zip(tree.distribution(row)) {
                *m += p;
            }
        }
        self.classes[argmax(&mean)]
    }
}

/// Trees with uniformly drawn split thresholds, trained on the full set
/// unless bootstrapping is switched on.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraTreesClassifier {
    pub n_estimators: usize,
    pub params: TreeParams,
    pub bootstrap: bool,
    pub seed: u64,
    fitted: Option<Ensemble>,
}

impl ExtraTreesClassifier {
    pub fn new(n_estimators: usize) -> Self {
        Self {
            n_estimators,
            params: TreeParams::default(),
            bootstrap: false,
            seed: 0,
            fitted: None,
        }
    }

    pub fn with_params(mut self, params: TreeParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

impl Classifier for ExtraTreesClassifier {
    fn fit(&mut self, data: &Dataset) -> CpResult<()> {
        let model = self.name();
        check_trainable(data, model)?;
        check_estimators(model, self.n_estimators)?;

        let enc = EncodedLabels::new(data);
        let weights = vec![1.0; data.len()];
        let n = data.len();
        let trees = (0..self.n_estimators)
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(i as u64));
                let rows = sample_rows(&mut rng, n, self.bootstrap);
                RandomizedTree::fit(
                    &self.params,
                    data,
                    &enc.indices,
                    &weights,
                    enc.n_classes(),
                    rows,
                    &mut rng,
                )
            })
            .collect::<Vec<_>>();
        debug!("{}: grew {} trees on {} rows", model, trees.len(), n);

        self.fitted = Some(Ensemble {
            classes: enc.classes,
            n_features: data.n_features(),
            trees,
        });
        Ok(())
    }

    fn predict_row(&self, row: &[f64]) -> CpResult<Label> {
        let ensemble = self.fitted.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        check_width(self.name(), ensemble.n_features, row.len())?;
        Ok(ensemble.vote(row))
    }

    fn name(&self) -> &str {
        "extra_trees"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::blobs;

    #[test]
    fn forest_separates_blobs() {
        let train = blobs(30, 3, 4, 21);
        let test = blobs(10, 3, 4, 22);
        let mut rf = RandomForestClassifier::new(25).with_seed(4);
        rf.fit(&train).unwrap();
        assert!(rf.score(&test).unwrap() > 0.9);
    }

    #[test]
    fn extra_trees_separate_blobs() {
        let train = blobs(30, 3, 4, 23);
        let test = blobs(10, 3, 4, 24);
        let mut et = ExtraTreesClassifier::new(25).with_seed(4);
        et.fit(&train).unwrap();
        assert!(et.score(&test).unwrap() > 0.9);
    }

    #[test]
    fn seeded_forest_is_reproducible() {
        let train = blobs(15, 2, 3, 25);
        let test = blobs(10, 2, 3, 26);
        let params = TreeParams {
            criterion: Criterion::Entropy,
            max_depth: Some(3),
            ..TreeParams::default()
        };
        let mut a = RandomForestClassifier::new(8).with_params(params).with_seed(7);
        let mut b = RandomForestClassifier::new(8).with_params(params).with_seed(7);
        a.fit(&train).unwrap();
        b.fit(&train).unwrap();
        assert_eq!(a.predict(&test).unwrap(), b.predict(&test).unwrap());
        let members = &a.fitted.as_ref().unwrap().members;
        let features: Vec<_> = members.iter().map(|m| m.features.clone()).collect();
        let again: Vec<_> = b.fitted.as_ref().unwrap().members.iter().map(|m| m.features.clone()).collect();
        assert_eq!(features, again);
    }

    #[test]
    fn subspace_size_follows_max_features() {
        let train = blobs(10, 2, 9, 27);
        let mut rf = RandomForestClassifier::new(4).with_seed(1);
        rf.fit(&train).unwrap();
        for member in &rf.fitted.as_ref().unwrap().members {
            assert_eq!(member.features.len(), 3);
        }
    }

    #[test]
    fn seeded_extra_trees_are_reproducible() {
        let train = blobs(15, 2, 3, 28);
        let mut a = ExtraTreesClassifier::new(6).with_seed(3);
        let mut b = ExtraTreesClassifier::new(6).with_seed(3);
        a.fit(&train).unwrap();
        b.fit(&train).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_estimators_rejected() {
        let mut rf = RandomForestClassifier::new(0);
        assert!(rf.fit(&blobs(5, 2, 2, 0)).unwrap_err().is_external());
        let mut et = ExtraTreesClassifier::new(0);
        assert!(et.fit(&blobs(5, 2, 2, 0)).unwrap_err().is_external());
    }
}
