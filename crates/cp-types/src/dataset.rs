//! Labeled feature matrices.

use std::collections::BTreeMap;

use crate::errors::{CpResult, InputError};

/// Class label attached to every row.
pub type Label = i64;

/// An ordered set of feature vectors paired with labels.
///
/// Features are stored row-major in one contiguous buffer; every row has
/// exactly `n_features` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    n_features: usize,
    features: Vec<f64>,
    labels: Vec<Label>,
}

impl Dataset {
    /// Build a dataset from per-row feature vectors.
    ///
    /// An empty dataset is allowed here; tuning calls reject it with
    /// [`InputError::EmptyDataset`].
    pub fn new(rows: Vec<Vec<f64>>, labels: Vec<Label>) -> CpResult<Self> {
        if rows.len() != labels.len() {
            return Err(InputError::LengthMismatch {
                features: rows.len(),
                labels: labels.len(),
            }
            .into());
        }

        let n_features = rows.first().map(Vec::len).unwrap_or(0);
        let mut features = Vec::with_capacity(rows.len() * n_features);
        for (row_idx, row) in rows.into_iter().enumerate() {
            if row.len() != n_features {
                return Err(InputError::RaggedRow {
                    row: row_idx,
                    expected: n_features,
                    actual: row.len(),
                }
                .into());
            }
            features.extend(row);
        }

        Self::from_flat(n_features, features, labels)
    }

    /// Build a dataset from a row-major buffer.
    pub fn from_flat(n_features: usize, features: Vec<f64>, labels: Vec<Label>) -> CpResult<Self> {
        let expected = labels.len() * n_features;
        if features.len() != expected {
            return Err(InputError::Invalid {
                message: format!(
                    "buffer holds {} values, expected {} rows x {} features",
                    features.len(),
                    labels.len(),
                    n_features
                ),
            }
            .into());
        }

        if let Some(pos) = features.iter().position(|v| !v.is_finite()) {
            return Err(InputError::NonFinite {
                row: pos / n_features.max(1),
                column: pos % n_features.max(1),
            }
            .into());
        }

        Ok(Self {
            n_features,
            features,
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Feature vector of row `idx`.
    pub fn row(&self, idx: usize) -> &[f64] {
        let start = idx * self.n_features;
        &self.features[start..start + self.n_features]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.len()).map(move |i| self.row(i))
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn label(&self, idx: usize) -> Label {
        self.labels[idx]
    }

    /// Value of `column` across all rows.
    pub fn column(&self, column: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows().map(move |row| row[column])
    }

    /// Copy of the rows at `indices`, in the given order.
    pub fn subset(&self, indices: &[usize]) -> Dataset {
        let mut features = Vec::with_capacity(indices.len() * self.n_features);
        let mut labels = Vec::with_capacity(indices.len());
        for &idx in indices {
            features.extend_from_slice(self.row(idx));
            labels.push(self.labels[idx]);
        }
        Dataset {
            n_features: self.n_features,
            features,
            labels,
        }
    }

    /// Distinct labels in ascending order.
    pub fn classes(&self) -> Vec<Label> {
        self.class_counts().into_keys().collect()
    }

    /// Number of rows per label.
    pub fn class_counts(&self) -> BTreeMap<Label, usize> {
        let mut counts = BTreeMap::new();
        for &label in &self.labels {
            *counts.entry(label).or_insert(0) += 1;
        }
        counts
    }

    /// Fail with [`InputError::EmptyDataset`] when the split has no rows.
    pub fn require_non_empty(&self, split: &str) -> CpResult<()> {
        if self.is_empty() {
            return Err(InputError::EmptyDataset {
                split: split.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Check the preconditions a train/test pair must satisfy before tuning.
pub fn check_split_pair(train: &Dataset, test: &Dataset) -> CpResult<()> {
    train.require_non_empty("train")?;
    test.require_non_empty("test")?;
    if train.n_features() != test.n_features() {
        return Err(InputError::DimensionMismatch {
            train: train.n_features(),
            test: test.n_features(),
        }
        .into());
    }
    Ok(())
}
