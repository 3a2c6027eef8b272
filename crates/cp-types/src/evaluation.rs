//! Evaluation outcomes and the identity of a tuning run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::dataset::Label;
use crate::errors::{CpResult, InputError};

/// NumPy's default `linewidth`.
const NUMPY_LINE_WIDTH: usize = 75;
/// Continuation indent; as wide as the leading "[[".
const HANGING_INDENT: &str = "  ";

/// Square count table indexed by (true label, predicted label).
///
/// Rows and columns follow the ascending order of the union of true and
/// predicted labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    labels: Vec<Label>,
    counts: Vec<i64>,
}

impl ConfusionMatrix {
    /// Tabulate (true, predicted) pairs.
    pub fn from_predictions(truth: &[Label], predicted: &[Label]) -> CpResult<Self> {
        if truth.len() != predicted.len() {
            return Err(InputError::LengthMismatch {
                features: predicted.len(),
                labels: truth.len(),
            }
            .into());
        }

        let index: BTreeMap<Label, usize> = {
            let mut seen: Vec<Label> = truth.iter().chain(predicted).copied().collect();
            seen.sort_unstable();
            seen.dedup();
            seen.into_iter().enumerate().map(|(i, l)| (l, i)).collect()
        };

        let n = index.len();
        let mut counts = vec![0i64; n * n];
        for (t, p) in truth.iter().zip(predicted) {
            counts[index[t] * n + index[p]] += 1;
        }

        Ok(Self {
            labels: index.into_keys().collect(),
            counts,
        })
    }

    /// Labels indexing both axes.
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Number of rows (and columns).
    pub fn size(&self) -> usize {
        self.labels.len()
    }

    pub fn get(&self, true_idx: usize, pred_idx: usize) -> i64 {
        self.counts[true_idx * self.size() + pred_idx]
    }

    pub fn row(&self, true_idx: usize) -> &[i64] {
        let n = self.size();
        &self.counts[true_idx * n..(true_idx + 1) * n]
    }

    /// Row-major cell values.
    pub fn as_slice(&self) -> &[i64] {
        &self.counts
    }

    /// Per-true-label instance counts.
    pub fn row_sums(&self) -> Vec<i64> {
        (0..self.size()).map(|i| self.row(i).iter().sum()).collect()
    }

    pub fn total(&self) -> i64 {
        self.counts.iter().sum()
    }

    /// Diagonal sum.
    pub fn correct(&self) -> i64 {
        (0..self.size()).map(|i| self.get(i, i)).sum()
    }

    /// Correct predictions over total; 0 for an empty table.
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.correct() as f64 / total as f64
    }

    /// Render like NumPy's `array2string(cm, separator=", ")`.
    ///
    /// Every entry is right-aligned to the widest entry in the table. Rows
    /// longer than NumPy's default line width wrap before the entry that
    /// would overflow and continue under a two-space indent.
    pub fn to_numpy_text(&self) -> String {
        let n = self.size();
        if n == 0 {
            return "[]".to_string();
        }

        let width = self
            .counts
            .iter()
            .map(|v| v.to_string().len())
            .max()
            .unwrap_or(1);
        // Leave a column for the trailing "," or "]".
        let limit = NUMPY_LINE_WIDTH - 2;

        let rows: Vec<String> = (0..n)
            .map(|i| {
                let mut text = String::new();
                let mut line = String::from(HANGING_INDENT);
                for (j, v) in self.row(i).iter().enumerate() {
                    let word = format!("{v:>width$}");
                    if line.len() + word.len() > limit && line.len() > HANGING_INDENT.len() {
                        text.push_str(line.trim_end());
                        text.push('\n');
                        line = String::from(HANGING_INDENT);
                    }
                    line.push_str(&word);
                    if j + 1 < n {
                        line.push_str(", ");
                    }
                }
                text.push_str(&line);
                format!("[{}]", &text[HANGING_INDENT.len()..])
            })
            .collect();

        format!("[{}]", rows.join(",\n "))
    }
}

/// Identifies one tuning invocation; used only to name artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRun {
    /// Physical context, e.g. "aisle_rug".
    pub deployment: String,
    /// Measurement source, e.g. "1_3" for sensor 1 at location 3.
    pub sensor: String,
    /// Distinguishes repeated outer-loop trials.
    pub run_index: String,
    pub output_dir: PathBuf,
}

impl EvaluationRun {
    pub fn new(
        deployment: impl Into<String>,
        sensor: impl Into<String>,
        run_index: impl Into<String>,
        output_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            deployment: deployment.into(),
            sensor: sensor.into(),
            run_index: run_index.into(),
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    /// `<deployment>_<sensor>_<run_index>_<family_tag>`
    pub fn artifact_stem(&self, family_tag: &str) -> String {
        format!(
            "{}_{}_{}_{}",
            self.deployment, self.sensor, self.run_index, family_tag
        )
    }

    /// Full artifact path for the given family tag and extension.
    pub fn artifact_path(&self, family_tag: &str, extension: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.artifact_stem(family_tag), extension))
    }
}
