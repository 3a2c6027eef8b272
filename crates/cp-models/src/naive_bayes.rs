//! Gaussian naive Bayes. No hyperparameters are tuned for this family.

use linfa::prelude::*;
use linfa_bayes::GaussianNb;
use ndarray::Array1;

use cp_types::{CpResult, Dataset, Label};

use crate::{
    check_trainable, check_width, fit_failed, not_fitted, records, row_records, Classifier,
    EncodedLabels,
};

#[derive(Debug)]
struct Fitted {
    model: GaussianNb<f64, usize>,
    labels: EncodedLabels,
    n_features: usize,
}

/// Per-class independent Gaussian likelihoods with empirical priors.
#[derive(Debug)]
pub struct GaussianNaiveBayes {
    /// Fraction of the largest feature variance added to every variance.
    pub var_smoothing: f64,
    fitted: Option<Fitted>,
}

impl GaussianNaiveBayes {
    pub fn new() -> Self {
        Self {
            var_smoothing: 1e-9,
            fitted: None,
        }
    }

    fn fitted(&self) -> CpResult<&Fitted> {
        self.fitted.as_ref().ok_or_else(|| not_fitted(self.name()))
    }
}

impl Default for GaussianNaiveBayes {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for GaussianNaiveBayes {
    fn fit(&mut self, data: &Dataset) -> CpResult<()> {
        check_trainable(data, self.name())?;
        let labels = EncodedLabels::new(data);
        let train = linfa::Dataset::new(records(data), labels.targets());
        let model = GaussianNb::params()
            .var_smoothing(self.var_smoothing)
            .fit(&train)
            .map_err(|e| fit_failed(self.name(), e))?;
        self.fitted = Some(Fitted {
            model,
            labels,
            n_features: data.n_features(),
        });
        Ok(())
    }

    fn predict_row(&self, row: &[f64]) -> CpResult<Label> {
        let fitted = self.fitted()?;
        check_width(self.name(), fitted.n_features, row.len())?;
        let predicted: Array1<usize> = fitted.model.predict(&row_records(row));
        Ok(fitted.labels.decode(&predicted)[0])
    }

    fn predict(&self, data: &Dataset) -> CpResult<Vec<Label>> {
        let fitted = self.fitted()?;
        if data.is_empty() {
            return Ok(Vec::new());
        }
        check_width(self.name(), fitted.n_features, data.n_features())?;
        let predicted: Array1<usize> = fitted.model.predict(&records(data));
        Ok(fitted.labels.decode(&predicted))
    }

    fn name(&self) -> &str {
        "gaussian_nb"
    }
}
