//! Cross-validation splitting and scoring.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use cp_types::{CpResult, Dataset, ExternalError};

use crate::Classifier;

/// Row indices of one train/validation split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// A policy for splitting a dataset into train/validation folds.
pub trait CvStrategy: Send + Sync + std::fmt::Debug {
    fn split(&self, data: &Dataset) -> CpResult<Vec<Fold>>;

    fn name(&self) -> &str;
}

fn check_splits(n_splits: usize, n_samples: usize) -> CpResult<()> {
    if n_splits < 2 {
        return Err(ExternalError::CrossValidation {
            message: format!("n_splits must be at least 2, got {n_splits}"),
        }
        .into());
    }
    if n_splits > n_samples {
        return Err(ExternalError::CrossValidation {
            message: format!("cannot split {n_samples} samples into {n_splits} folds"),
        }
        .into());
    }
    Ok(())
}

/// Build folds from per-fold validation sets; train is the complement.
fn folds_from_validation(n_samples: usize, mut validation: Vec<Vec<usize>>) -> Vec<Fold> {
    validation
        .iter_mut()
        .map(|val| {
            val.sort_unstable();
            let mut in_val = vec![false; n_samples];
            for &i in val.iter() {
                in_val[i] = true;
            }
            let train = (0..n_samples).filter(|&i| !in_val[i]).collect();
            Fold {
                train,
                validation: val.clone(),
            }
        })
        .collect()
}

/// Contiguous k-fold splitting, optionally shuffled first.
///
/// The first `n % k` folds get one extra row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KFold {
    pub n_splits: usize,
    pub shuffle: bool,
    pub seed: u64,
}

impl KFold {
    pub fn new(n_splits: usize) -> Self {
        Self {
            n_splits,
            shuffle: false,
            seed: 0,
        }
    }

    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.seed = seed;
        self
    }
}

impl CvStrategy for KFold {
    fn split(&self, data: &Dataset) -> CpResult<Vec<Fold>> {
        let n = data.len();
        check_splits(self.n_splits, n)?;

        let mut order: Vec<usize> = (0..n).collect();
        if self.shuffle {
            order.shuffle(&mut ChaCha8Rng::seed_from_u64(self.seed));
        }

        let base = n / self.n_splits;
        let extra = n % self.n_splits;
        let mut start = 0;
        let mut validation = Vec::with_capacity(self.n_splits);
        for fold in 0..self.n_splits {
            let size = base + usize::from(fold < extra);
            validation.push(order[start..start + size].to_vec());
            start += size;
        }

        Ok(folds_from_validation(n, validation))
    }

    fn name(&self) -> &str {
        "kfold"
    }
}

/// K-fold splitting that keeps class proportions roughly equal per fold.
///
/// Rows of each class are dealt round-robin across folds, continuing from
/// where the previous class stopped so fold sizes stay balanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratifiedKFold {
    pub n_splits: usize,
    pub shuffle: bool,
    pub seed: u64,
}

impl StratifiedKFold {
    pub fn new(n_splits: usize) -> Self {
        Self {
            n_splits,
            shuffle: false,
            seed: 0,
        }
    }

    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.seed = seed;
        self
    }
}

impl CvStrategy for StratifiedKFold {
    fn split(&self, data: &Dataset) -> CpResult<Vec<Fold>> {
        let n = data.len();
        check_splits(self.n_splits, n)?;

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut validation = vec![Vec::new(); self.n_splits];
        let mut next_fold = 0;
        for class in data.classes() {
            let mut members: Vec<usize> = (0..n).filter(|&i| data.label(i) == class).collect();
            if self.shuffle {
                members.shuffle(&mut rng);
            }
            for idx in members {
                validation[next_fold].push(idx);
                next_fold = (next_fold + 1) % self.n_splits;
            }
        }

        Ok(folds_from_validation(n, validation))
    }

    fn name(&self) -> &str {
        "stratified_kfold"
    }
}

/// Validation accuracy of a freshly built classifier on every fold.
///
/// Folds are evaluated in parallel; scores come back in fold order.
pub fn cross_val_score<F>(build: F, data: &Dataset, folds: &[Fold]) -> CpResult<Vec<f64>>
where
    F: Fn() -> CpResult<Box<dyn Classifier>> + Sync,
{
    folds
        .par_iter()
        .map(|fold| {
            let train = data.subset(&fold.train);
            let validation = data.subset(&fold.validation);
            let mut model = build()?;
            model.fit(&train)?;
            model.score(&validation)
        })
        .collect()
}

/// Arithmetic mean; 0 for no scores.
pub fn mean(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}
