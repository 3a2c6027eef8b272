//! L2-regularised logistic regression on `linfa-logistic`.
//!
//! The penalty is `alpha = 1 / C`, so larger `C` means weaker
//! regularisation.

use linfa::prelude::*;
use linfa_logistic::{
    FittedLogisticRegression, LogisticRegression as BinaryLogistic, MultiFittedLogisticRegression,
    MultiLogisticRegression,
};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use cp_types::{CpResult, Dataset, ExternalError, Label};

use crate::{
    argmax, check_trainable, check_width, fit_failed, not_fitted, records, row_records, Classifier,
    EncodedLabels,
};

/// Multi-class reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiClass {
    /// One-vs-rest for two classes, multinomial otherwise.
    Auto,
    Ovr,
    Multinomial,
}

#[derive(Debug)]
enum Model {
    Constant(Label),
    Binary(FittedLogisticRegression<f64, usize>),
    OneVsRest(Vec<FittedLogisticRegression<f64, bool>>),
    Multinomial(MultiFittedLogisticRegression<f64, usize>),
}

#[derive(Debug)]
struct Fitted {
    labels: EncodedLabels,
    n_features: usize,
    model: Model,
}

#[derive(Debug)]
pub struct LogisticRegression {
    /// Inverse regularisation strength.
    pub c: f64,
    pub max_iter: usize,
    pub multi_class: MultiClass,
    /// Gradient norm at which the solver stops.
    pub tol: f64,
    fitted: Option<Fitted>,
}

impl LogisticRegression {
    pub fn new(c: f64, max_iter: usize, multi_class: MultiClass) -> Self {
        Self {
            c,
            max_iter,
            multi_class,
            tol: 1e-4,
            fitted: None,
        }
    }

    fn binary_params(&self) -> BinaryLogistic<f64> {
        BinaryLogistic::<f64>::default()
            .alpha(1.0 / self.c)
            .max_iterations(self.max_iter as u64)
            .gradient_tolerance(self.tol)
    }

    fn predict_records(&self, x: &Array2<f64>) -> CpResult<Vec<Label>> {
        let fitted = self.fitted.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        check_width(self.name(), fitted.n_features, x.ncols())?;
        let labels = &fitted.labels;
        let predicted: Array1<usize> = match &fitted.model {
            Model::Constant(label) => return Ok(vec![*label; x.nrows()]),
            Model::Binary(model) => model.predict(x),
            Model::Multinomial(model) => model.predict(x),
            Model::OneVsRest(models) => {
                let scores: Vec<Array1<f64>> = models.iter().map(|m| probability_of_true(m, x)).collect();
                (0..x.nrows())
                    .map(|i| argmax(&scores.iter().map(|s| s[i]).collect::<Vec<_>>()))
                    .collect()
            }
        };
        Ok(labels.decode(&predicted))
    }
}

/// `P(true)` from a binary model, whichever class it treats as positive.
fn probability_of_true(model: &FittedLogisticRegression<f64, bool>, x: &Array2<f64>) -> Array1<f64> {
    let p = model.predict_probabilities(x);
    let hard: Array1<bool> = model.predict(x);
    p.iter()
        .zip(hard.iter())
        .map(|(&p, &is_true)| if is_true { p.max(1.0 - p) } else { p.min(1.0 - p) })
        .collect()
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, data: &Dataset) -> CpResult<()> {
        check_trainable(data, self.name())?;
        if !(self.c > 0.0) || self.max_iter == 0 {
            return Err(ExternalError::FitFailed {
                model: self.name().to_string(),
                message: format!("need C > 0 and max_iter >= 1, got {} and {}", self.c, self.max_iter),
            }
            .into());
        }

        let labels = EncodedLabels::new(data);
        let k = labels.n_classes();
        let x = records(data);
        let model = match (k, self.multi_class) {
            (1, _) => Model::Constant(labels.classes[0]),
            (2, MultiClass::Auto | MultiClass::Ovr) => Model::Binary(
                self.binary_params()
                    .fit(&linfa::Dataset::new(x, labels.targets()))
                    .map_err(|e| fit_failed(self.name(), e))?,
            ),
            (_, MultiClass::Ovr) => Model::OneVsRest(
                (0..k)
                    .map(|class| {
                        let y = labels.targets().mapv(|t| t == class);
                        self.binary_params()
                            .fit(&linfa::Dataset::new(x.clone(), y))
                            .map_err(|e| fit_failed(self.name(), e))
                    })
                    .collect::<CpResult<_>>()?,
            ),
            _ => Model::Multinomial(
                MultiLogisticRegression::<f64>::default()
                    .alpha(1.0 / self.c)
                    .max_iterations(self.max_iter as u64)
                    .gradient_tolerance(self.tol)
                    .fit(&linfa::Dataset::new(x, labels.targets()))
                    .map_err(|e| fit_failed(self.name(), e))?,
            ),
        };

        self.fitted = Some(Fitted {
            labels,
            n_features: data.n_features(),
            model,
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
        "logistic_regression"
    }
}
