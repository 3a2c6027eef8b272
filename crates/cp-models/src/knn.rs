//! k-nearest-neighbour voting under Euclidean distance.

use linfa_nn::distance::L2Dist;
use linfa_nn::{CommonNearestNeighbour, NearestNeighbour, NearestNeighbourIndex};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use cp_types::{CpResult, Dataset, ExternalError, Label};

use crate::{argmax, check_trainable, check_width, not_fitted, records, Classifier, EncodedLabels};

/// How neighbours' votes are weighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeighborWeights {
    Uniform,
    /// Inverse distance; exact matches take all the weight.
    Distance,
}

/// Neighbour index used for lookups. Every variant is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeighborAlgorithm {
    Auto,
    BallTree,
    KdTree,
    Brute,
}

impl NeighborAlgorithm {
    fn index(self) -> CommonNearestNeighbour {
        match self {
            NeighborAlgorithm::Auto | NeighborAlgorithm::KdTree => CommonNearestNeighbour::KdTree,
            NeighborAlgorithm::BallTree => CommonNearestNeighbour::BallTree,
            NeighborAlgorithm::Brute => CommonNearestNeighbour::LinearSearch,
        }
    }
}

#[derive(Debug, Clone)]
struct Fitted {
    records: Array2<f64>,
    labels: EncodedLabels,
}

#[derive(Debug, Clone)]
pub struct KNearestNeighbors {
    pub n_neighbors: usize,
    pub weights: NeighborWeights,
    pub algorithm: NeighborAlgorithm,
    fitted: Option<Fitted>,
}

impl KNearestNeighbors {
    pub fn new(n_neighbors: usize) -> Self {
        Self {
            n_neighbors,
            weights: NeighborWeights::Uniform,
            algorithm: NeighborAlgorithm::Auto,
            fitted: None,
        }
    }

    pub fn with_weights(mut self, weights: NeighborWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_algorithm(mut self, algorithm: NeighborAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    fn fitted(&self) -> CpResult<&Fitted> {
        self.fitted.as_ref().ok_or_else(|| not_fitted(self.name()))
    }

    fn vote(
        &self,
        index: &dyn NearestNeighbourIndex<f64>,
        labels: &EncodedLabels,
        row: ArrayView1<'_, f64>,
    ) -> CpResult<Label> {
        let neighbours = index
            .k_nearest(row, self.n_neighbors)
            .map_err(|e| ExternalError::Other(format!("{} lookup failed: {e}", self.name())))?;

        let distances: Vec<(f64, usize)> = neighbours
            .iter()
            .map(|(point, i)| {
                let d2: f64 = point.iter().zip(row.iter()).map(|(a, b)| (a - b) * (a - b)).sum();
                (d2.sqrt(), *i)
            })
            .collect();
        let exact_match = distances.iter().any(|(d, _)| *d == 0.0);

        let mut votes = vec![0.0; labels.n_classes()];
        for (d, i) in &distances {
            let weight = match self.weights {
                NeighborWeights::Uniform => 1.0,
                NeighborWeights::Distance if exact_match => {
                    if *d == 0.0 {
                        1.0
                    } else {
                        0.0
                    }
                }
                NeighborWeights::Distance => 1.0 / d,
            };
            votes[labels.indices[*i]] += weight;
        }
        Ok(labels.classes[argmax(&votes)])
    }

    fn predict_records(&self, queries: &Array2<f64>) -> CpResult<Vec<Label>> {
        let fitted = self.fitted()?;
        check_width(self.name(), fitted.records.ncols(), queries.ncols())?;
        let index = self
            .algorithm
            .index()
            .from_batch(&fitted.records, L2Dist)
            .map_err(|e| ExternalError::Other(format!("{} index build failed: {e}", self.name())))?;
        queries
            .rows()
            .into_iter()
            .map(|row| self.vote(index.as_ref(), &fitted.labels, row))
            .collect()
    }
}

impl Classifier for KNearestNeighbors {
    fn fit(&mut self, data: &Dataset) -> CpResult<()> {
        check_trainable(data, self.name())?;
        if self.n_neighbors == 0 || self.n_neighbors > data.len() {
            return Err(ExternalError::FitFailed {
                model: self.name().to_string(),
                message: format!(
                    "n_neighbors = {} but {} training rows",
                    self.n_neighbors,
                    data.len()
                ),
            }
            .into());
        }
        self.fitted = Some(Fitted {
            records: records(data),
            labels: EncodedLabels::new(data),
        });
        Ok(())
    }

    fn predict_row(&self, row: &[f64]) -> CpResult<Label> {
        let query = crate::row_records(row);
        Ok(self.predict_records(&query)?[0])
    }

    fn predict(&self, data: &Dataset) -> CpResult<Vec<Label>> {
        if data.is_empty() {
            self.fitted()?;
            return Ok(Vec::new());
        }
        self.predict_records(&records(data))
    }

    fn name(&self) -> &str {
        "knn"
    }
}
