//! Support vector classification on `linfa-svm`.
//!
//! Multi-class problems use one machine per class (one-vs-rest) and
//! predict the class whose machine reports the highest Platt-scaled
//! probability. Two-class problems train a single machine.

use linfa::prelude::*;
use linfa_svm::Svm;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use cp_types::{CpResult, Dataset, ExternalError, Label};

use crate::{
    argmax, check_trainable, check_width, fit_failed, not_fitted, records, row_records, Classifier,
    EncodedLabels,
};

/// RBF kernel width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Gamma {
    /// `1 / (n_features * var(X))`, computed at fit time.
    Scale,
    Value(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Kernel {
    Linear,
    Rbf { gamma: Gamma },
}

#[derive(Debug)]
enum Machines {
    Constant(Label),
    /// `P(class 1)` from one machine.
    Pair(Svm<f64, Pr>),
    OneVsRest(Vec<Svm<f64, Pr>>),
}

#[derive(Debug)]
struct Fitted {
    labels: EncodedLabels,
    n_features: usize,
    machines: Machines,
}

#[derive(Debug)]
pub struct SupportVectorClassifier {
    pub kernel: Kernel,
    /// Penalty on the hinge loss, applied to both classes.
    pub c: f64,
    fitted: Option<Fitted>,
}

impl SupportVectorClassifier {
    pub fn new(kernel: Kernel, c: f64) -> Self {
        Self {
            kernel,
            c,
            fitted: None,
        }
    }

    pub fn linear(c: f64) -> Self {
        Self::new(Kernel::Linear, c)
    }

    pub fn rbf(c: f64, gamma: Gamma) -> Self {
        Self::new(Kernel::Rbf { gamma }, c)
    }

    fn train_machine(&self, x: &Array2<f64>, positive: Array1<bool>) -> CpResult<Svm<f64, Pr>> {
        let params = Svm::<f64, Pr>::params().pos_neg_weights(self.c, self.c);
        let params = match self.kernel {
            Kernel::Linear => params.linear_kernel(),
            // linfa's Gaussian kernel is exp(-|x - y|^2 / eps).
            Kernel::Rbf { gamma } => params.gaussian_kernel(1.0 / resolve_gamma(gamma, x)),
        };
        params
            .fit(&linfa::Dataset::new(x.clone(), positive))
            .map_err(|e| fit_failed(self.name(), e))
    }

    fn predict_records(&self, x: &Array2<f64>) -> CpResult<Vec<Label>> {
        let fitted = self.fitted.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        check_width(self.name(), fitted.n_features, x.ncols())?;
        let predicted: Array1<usize> = match &fitted.machines {
            Machines::Constant(label) => return Ok(vec![*label; x.nrows()]),
            Machines::Pair(machine) => probabilities(machine, x).mapv(|p| usize::from(p > 0.5)),
            Machines::OneVsRest(machines) => {
                let scores: Vec<Array1<f64>> = machines.iter().map(|m| probabilities(m, x)).collect();
                (0..x.nrows())
                    .map(|i| argmax(&scores.iter().map(|s| s[i]).collect::<Vec<_>>()))
                    .collect()
            }
        };
        Ok(fitted.labels.decode(&predicted))
    }
}

fn probabilities(machine: &Svm<f64, Pr>, x: &Array2<f64>) -> Array1<f64> {
    let predicted: Array1<Pr> = machine.predict(x);
    predicted.iter().map(|p| f64::from(**p)).collect()
}

fn resolve_gamma(gamma: Gamma, x: &Array2<f64>) -> f64 {
    match gamma {
        Gamma::Value(g) => g,
        Gamma::Scale => {
            let mean = x.mean().unwrap_or(0.0);
            let var = x.mapv(|v| (v - mean) * (v - mean)).mean().unwrap_or(0.0);
            if var > 0.0 {
                1.0 / (x.ncols().max(1) as f64 * var)
            } else {
                1.0
            }
        }
    }
}

impl Classifier for SupportVectorClassifier {
    fn fit(&mut self, data: &Dataset) -> CpResult<()> {
        check_trainable(data, self.name())?;
        if !(self.c > 0.0) {
            return Err(ExternalError::FitFailed {
                model: self.name().to_string(),
                message: format!("C must be positive, got {}", self.c),
            }
            .into());
        }
        if let Kernel::Rbf { gamma: Gamma::Value(g) } = self.kernel {
            if !(g > 0.0) {
                return Err(ExternalError::FitFailed {
                    model: self.name().to_string(),
                    message: format!("gamma must be positive, got {g}"),
                }
                .into());
            }
        }

        let labels = EncodedLabels::new(data);
        let x = records(data);
        let targets = labels.targets();
        let machines = match labels.n_classes() {
            1 => Machines::Constant(labels.classes[0]),
            2 => Machines::Pair(self.train_machine(&x, targets.mapv(|t| t == 1))?),
            k => Machines::OneVsRest(
                (0..k)
                    .map(|class| self.train_machine(&x, targets.mapv(|t| t == class)))
                    .collect::<CpResult<_>>()?,
            ),
        };
        debug!("{}: trained on {} rows, {} classes", self.name(), data.len(), labels.n_classes());

        self.fitted = Some(Fitted {
            labels,
            n_features: data.n_features(),
            machines,
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
        match self.kernel {
            Kernel::Linear => "linear_svm",
            Kernel::Rbf { .. } => "rbf_svm",
        }
    }
}
