//! Search space definitions and the exhaustive grid strategy.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use cp_types::{ConfigError, CpResult, ExternalError};

/// One concrete value per hyperparameter name.
pub type Configuration = BTreeMap<String, ParameterValue>;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Hyperparameter name as the classifier factory reads it (e.g. "max_depth").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes the domain a parameter is drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Finite ordered list of candidate values.
    Choice { values: Vec<ParameterValue> },
}

impl ParameterKind {
    /// Whether the domain is a finite enumerable list.
    pub fn is_discrete(&self) -> bool {
        matches!(self, Self::IntRange { .. } | Self::Choice { .. })
    }

    /// Every value of a discrete domain, in declared order.
    pub fn enumerate(&self) -> Option<Vec<ParameterValue>> {
        match self {
            Self::IntRange { low, high } => Some((*low..=*high).map(ParameterValue::Int).collect()),
            Self::Choice { values } => Some(values.clone()),
            _ => None,
        }
    }

    /// Whether `value` belongs to this domain.
    pub fn contains(&self, value: &ParameterValue) -> bool {
        match (self, value) {
            (Self::FloatRange { low, high }, v) | (Self::LogUniform { low, high }, v) => v
                .as_f64()
                .map(|x| x >= *low && x <= *high)
                .unwrap_or(false),
            (Self::IntRange { low, high }, ParameterValue::Int(v)) => v >= low && v <= high,
            (Self::IntRange { .. }, _) => false,
            (Self::Choice { values }, v) => values.contains(v),
        }
    }
}

/// A concrete parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    /// Explicit "no value", e.g. an unbounded tree depth.
    None,
}

impl ParameterValue {
    /// Numeric view; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
            Self::None => write!(f, "None"),
        }
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Option<i64>> for ParameterValue {
    fn from(v: Option<i64>) -> Self {
        v.map(Self::Int).unwrap_or(Self::None)
    }
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    pub fn add_choice<V: Into<ParameterValue>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice {
                values: values.into_iter().map(Into::into).collect(),
            },
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Reject empty or inverted domains.
    pub fn validate(&self) -> CpResult<()> {
        for param in &self.parameters {
            let empty = match &param.kind {
                ParameterKind::FloatRange { low, high } => !(low <= high),
                ParameterKind::IntRange { low, high } => low > high,
                ParameterKind::LogUniform { low, high } => !(*low > 0.0 && low <= high),
                ParameterKind::Choice { values } => values.is_empty(),
            };
            if empty {
                return Err(ConfigError::EmptyDomain {
                    parameter: param.name.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Total number of grid points (returns `None` if any parameter is
    /// continuous).
    pub fn grid_size(&self) -> Option<usize> {
        let mut total: usize = 1;
        for param in &self.parameters {
            let dim_size = match &param.kind {
                ParameterKind::IntRange { low, high } => (high - low + 1).max(0) as usize,
                ParameterKind::Choice { values } => values.len(),
                _ => return None,
            };
            total = total.checked_mul(dim_size)?;
        }
        Some(total)
    }

    /// Check that `config` assigns exactly one in-domain value per parameter.
    pub fn check_membership(&self, config: &Configuration) -> CpResult<()> {
        for param in &self.parameters {
            let value = config
                .get(&param.name)
                .ok_or_else(|| ConfigError::MissingParameter {
                    parameter: param.name.clone(),
                })?;
            if !param.kind.contains(value) {
                return Err(ConfigError::OutsideDomain {
                    parameter: param.name.clone(),
                    value: value.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Draw one configuration uniformly (log-uniformly for `LogUniform`).
    pub fn sample_random<R: Rng>(&self, rng: &mut R) -> Configuration {
        let mut params = Configuration::new();

        for param in &self.parameters {
            let value = match &param.kind {
                ParameterKind::FloatRange { low, high } => {
                    ParameterValue::Float(rng.gen_range(*low..=*high))
                }
                ParameterKind::IntRange { low, high } => {
                    ParameterValue::Int(rng.gen_range(*low..=*high))
                }
                ParameterKind::LogUniform { low, high } => {
                    let log_val: f64 = rng.gen_range(low.ln()..=high.ln());
                    ParameterValue::Float(log_val.exp().clamp(*low, *high))
                }
                ParameterKind::Choice { values } => {
                    values[rng.gen_range(0..values.len())].clone()
                }
            };
            params.insert(param.name.clone(), value);
        }

        params
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies.
///
/// The driver repeatedly asks for a batch, evaluates every configuration in
/// it, and reports each loss (lower is better) back in suggestion order.
/// An empty batch means the strategy is exhausted.
pub trait SearchStrategy: Send {
    /// Generate the next batch of parameter combinations to evaluate.
    fn suggest(&mut self, count: usize) -> Vec<Configuration>;

    /// Report completed trial results so adaptive strategies can learn.
    fn report(&mut self, params: &Configuration, loss: f64);

    /// The configuration the strategy settles on once exhausted.
    fn conclude(&self) -> CpResult<Configuration>;

    /// How many suggestions may be evaluated concurrently.
    fn batch_size(&self) -> usize;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

// ---- Grid search ----

/// Exhaustive grid search over discrete parameter combinations.
///
/// Combinations are generated with the last declared parameter varying
/// fastest. On equal loss the earliest generated combination wins.
#[derive(Debug, Clone)]
pub struct GridSearch {
    cursor: usize,
    combos: Vec<Configuration>,
    best: Option<(usize, f64)>,
    reported: usize,
}

impl GridSearch {
    pub fn new(space: &SearchSpace) -> CpResult<Self> {
        space.validate()?;
        let combos = Self::build_grid(space)?;
        Ok(Self {
            cursor: 0,
            combos,
            best: None,
            reported: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.combos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combos.is_empty()
    }

    /// All combinations in evaluation order.
    pub fn combinations(&self) -> &[Configuration] {
        &self.combos
    }

    fn build_grid(space: &SearchSpace) -> CpResult<Vec<Configuration>> {
        let mut axes: Vec<(&str, Vec<ParameterValue>)> = Vec::new();

        for param in &space.parameters {
            let values =
                param
                    .kind
                    .enumerate()
                    .ok_or_else(|| ConfigError::IncompatibleSpace {
                        strategy: "grid".to_string(),
                        parameter: param.name.clone(),
                        reason: "continuous domains have no finite grid".to_string(),
                    })?;
            axes.push((param.name.as_str(), values));
        }

        // Cartesian product
        let mut result: Vec<Configuration> = vec![Configuration::new()];
        for (name, values) in &axes {
            let mut next = Vec::with_capacity(result.len() * values.len());
            for existing in &result {
                for value in values {
                    let mut combo = existing.clone();
                    combo.insert(name.to_string(), value.clone());
                    next.push(combo);
                }
            }
            result = next;
        }

        Ok(result)
    }
}

impl SearchStrategy for GridSearch {
    fn suggest(&mut self, count: usize) -> Vec<Configuration> {
        let end = (self.cursor + count).min(self.combos.len());
        let batch = self.combos[self.cursor..end].to_vec();
        self.cursor = end;
        batch
    }

    fn report(&mut self, _params: &Configuration, loss: f64) {
        let position = self.reported;
        self.reported += 1;
        let improves = match self.best {
            None => true,
            Some((_, best_loss)) => loss < best_loss,
        };
        if improves {
            self.best = Some((position, loss));
        }
    }

    fn conclude(&self) -> CpResult<Configuration> {
        self.best
            .and_then(|(idx, _)| self.combos.get(idx).cloned())
            .ok_or_else(|| {
                ExternalError::SearchFailed {
                    message: "grid search finished without any scored combination".to_string(),
                }
                .into()
            })
    }

    fn batch_size(&self) -> usize {
        self.combos.len().max(1)
    }

    fn name(&self) -> &str {
        "grid"
    }
}
