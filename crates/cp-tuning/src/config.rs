//! Tuning configuration and the CLI run manifest.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cp_models::{CvStrategy, KFold, StratifiedKFold};
use cp_optimizer::TpeSearch;
use cp_types::{config_error, ConfigError, CpResult, EvaluationRun};

use crate::family::Family;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CvKind {
    Kfold,
    Stratified,
}

/// Cross-validation policy shared by every trial of one tune call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvConfig {
    pub kind: CvKind,
    pub n_splits: usize,
    pub shuffle: bool,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            kind: CvKind::Stratified,
            n_splits: 5,
            shuffle: true,
        }
    }
}

impl CvConfig {
    pub fn build(&self, seed: u64) -> Box<dyn CvStrategy> {
        match (self.kind, self.shuffle) {
            (CvKind::Kfold, false) => Box::new(KFold::new(self.n_splits)),
            (CvKind::Kfold, true) => Box::new(KFold::new(self.n_splits).shuffled(seed)),
            (CvKind::Stratified, false) => Box::new(StratifiedKFold::new(self.n_splits)),
            (CvKind::Stratified, true) => Box::new(StratifiedKFold::new(self.n_splits).shuffled(seed)),
        }
    }
}

/// Knobs for the search phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Trial budget of the sequential search.
    pub max_evals: usize,
    /// Seeds fold shuffling, the sequential search and every model.
    pub seed: u64,
    pub cv: CvConfig,
    /// Random trials before the Parzen estimators take over.
    pub startup_trials: usize,
    /// Quantile of trials treated as good.
    pub gamma: f64,
    /// Candidate draws scored per sequential suggestion.
    pub candidates: usize,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            max_evals: TpeSearch::DEFAULT_MAX_EVALS,
            seed: 42,
            cv: CvConfig::default(),
            startup_trials: TpeSearch::DEFAULT_STARTUP,
            gamma: TpeSearch::DEFAULT_GAMMA,
            candidates: TpeSearch::DEFAULT_CANDIDATES,
        }
    }
}

impl TuningConfig {
    pub fn with_max_evals(mut self, max_evals: usize) -> Self {
        self.max_evals = max_evals;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_cv(mut self, cv: CvConfig) -> Self {
        self.cv = cv;
        self
    }

    pub fn with_startup_trials(mut self, startup_trials: usize) -> Self {
        self.startup_trials = startup_trials;
        self
    }

    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_candidates(mut self, candidates: usize) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn validate(&self) -> CpResult<()> {
        if self.max_evals == 0 {
            return Err(invalid("max_evals", "must be at least 1"));
        }
        if !(self.gamma > 0.0 && self.gamma < 1.0) {
            return Err(invalid("gamma", "must lie strictly between 0 and 1"));
        }
        if self.candidates == 0 {
            return Err(invalid("candidates", "must be at least 1"));
        }
        if self.cv.n_splits < 2 {
            return Err(invalid("cv.n_splits", "must be at least 2"));
        }
        Ok(())
    }
}

fn invalid(parameter: &str, message: &str) -> cp_types::CpError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        message: message.to_string(),
    }
    .into()
}

/// Everything `caliper-tune` needs for one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub train_path: PathBuf,
    pub test_path: PathBuf,
    /// Header of the label column; every other column is a feature.
    pub label_column: String,
    pub deployment: String,
    pub sensor: String,
    pub run_index: String,
    pub output_dir: PathBuf,
    pub families: Vec<Family>,
    #[serde(default)]
    pub config: TuningConfig,
}

impl RunManifest {
    pub fn from_json_file(path: impl AsRef<Path>) -> CpResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| config_error!("cannot read manifest {}: {e}", path.display()))?;
        let manifest: RunManifest = serde_json::from_str(&raw)?;
        if manifest.families.is_empty() {
            return Err(config_error!("manifest {} lists no families", path.display()));
        }
        manifest.config.validate()?;
        Ok(manifest)
    }

    pub fn evaluation_run(&self) -> EvaluationRun {
        EvaluationRun::new(
            self.deployment.clone(),
            self.sensor.clone(),
            self.run_index.clone(),
            self.output_dir.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cp_types::Dataset;

    #[test]
    fn defaults_follow_reference_budget() {
        let cfg = TuningConfig::default();
        assert_eq!(cfg.max_evals, 60);
        assert_eq!(cfg.seed, 42);
        assert_eq!(cfg.cv.n_splits, 5);
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: TuningConfig = serde_json::from_str(r#"{"max_evals": 10, "cv": {"kind": "kfold"}}"#).unwrap();
        assert_eq!(cfg.max_evals, 10);
        assert_eq!(cfg.cv.kind, CvKind::Kfold);
        assert_eq!(cfg.cv.n_splits, 5);
        assert_eq!(cfg.startup_trials, 20);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        assert!(TuningConfig::default().with_gamma(1.5).validate().unwrap_err().is_config());
        assert!(TuningConfig::default().with_max_evals(0).validate().is_err());
        let cv = CvConfig {
            n_splits: 1,
            ..CvConfig::default()
        };
        assert!(TuningConfig::default().with_cv(cv).validate().is_err());
    }

    #[test]
    fn cv_config_builds_matching_strategy() {
        let data = Dataset::new(
            (0..10).map(|i| vec![i as f64]).collect(),
            (0..10).map(|i| i % 2).collect(),
        )
        .unwrap();
        let cv = CvConfig {
            kind: CvKind::Kfold,
            n_splits: 2,
            shuffle: false,
        };
        let strategy = cv.build(0);
        assert_eq!(strategy.name(), "kfold");
        assert_eq!(strategy.split(&data).unwrap()[0].validation, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn manifest_parses_family_tags() {
        let raw = r#"{
            "train_path": "train.csv",
            "test_path": "test.csv",
            "label_column": "label",
            "deployment": "dep1",
            "sensor": "imu",
            "run_index": "0",
            "output_dir": "out",
            "families": ["nb", "knn"]
        }"#;
        let manifest: RunManifest = serde_json::from_str(raw).unwrap();
        assert_eq!(manifest.families, vec![Family::NaiveBayes, Family::KNearestNeighbors]);
        assert_eq!(manifest.config, TuningConfig::default());
        assert_eq!(manifest.evaluation_run().artifact_stem("nb"), "dep1_imu_0_nb");
    }

    #[test]
    fn manifest_rejects_unknown_family() {
        let raw = r#"{"train_path": "a", "test_path": "b", "label_column": "y",
            "deployment": "d", "sensor": "s", "run_index": "1", "output_dir": ".",
            "families": ["svm"]}"#;
        assert!(serde_json::from_str::<RunManifest>(raw).is_err());
    }
}
