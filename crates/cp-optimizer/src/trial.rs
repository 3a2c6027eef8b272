//! Trial tracking for one search run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::search::Configuration;

/// Unique search run identifier.
pub type OptimizationId = Uuid;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Maximize
    }
}

/// Lifecycle state for a search run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Aggregate status of a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStatus {
    pub id: OptimizationId,
    /// Family tag the search is tuning (e.g. "rf").
    pub name: String,
    /// Strategy name ("grid" or "tpe").
    pub strategy: String,
    pub direction: ObjectiveDirection,
    pub state: OptimizationState,
    pub trials: Vec<Trial>,
    pub trials_completed: usize,
    pub trials_failed: usize,
    pub best_trial: Option<TrialResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl OptimizationStatus {
    pub fn new(name: impl Into<String>, strategy: impl Into<String>, direction: ObjectiveDirection) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            strategy: strategy.into(),
            direction,
            state: OptimizationState::Pending,
            trials: Vec::new(),
            trials_completed: 0,
            trials_failed: 0,
            best_trial: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = OptimizationState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = OptimizationState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = OptimizationState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Number of the next trial to be created.
    pub fn next_trial_number(&self) -> usize {
        self.trials.len()
    }

    /// Store a finished trial and fold it into the counters.
    pub fn record(&mut self, trial: Trial) {
        match trial.status {
            TrialStatus::Completed => {
                self.trials_completed += 1;
                if let Some(result) = &trial.result {
                    self.update_best(result);
                }
            }
            TrialStatus::Failed => self.trials_failed += 1,
            _ => {}
        }
        self.trials.push(trial);
    }

    /// Update the best trial if `result` strictly improves on the current best.
    pub fn update_best(&mut self, result: &TrialResult) {
        let dominated = match &self.best_trial {
            None => true,
            Some(current_best) => match self.direction {
                ObjectiveDirection::Maximize => result.objective > current_best.objective,
                ObjectiveDirection::Minimize => result.objective < current_best.objective,
            },
        };
        if dominated {
            self.best_trial = Some(result.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// A single trial (one configuration scored under cross-validation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub optimization_id: OptimizationId,
    pub trial_number: usize,
    pub parameters: Configuration,
    pub status: TrialStatus,
    pub result: Option<TrialResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(optimization_id: OptimizationId, trial_number: usize, parameters: Configuration) -> Self {
        Self {
            id: Uuid::new_v4(),
            optimization_id,
            trial_number,
            parameters,
            status: TrialStatus::Pending,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, objective: f64, fold_scores: Vec<f64>) {
        let finished = Utc::now();
        let duration_ms = self
            .started_at
            .map(|start| (finished - start).num_milliseconds().max(0) as u64);
        self.status = TrialStatus::Completed;
        self.finished_at = Some(finished);
        self.result = Some(TrialResult {
            trial_id: self.id,
            objective,
            fold_scores,
            parameters: self.parameters.clone(),
            duration_ms,
        });
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Result of a single trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: Uuid,
    /// Mean cross-validated accuracy.
    pub objective: f64,
    /// Per-fold validation accuracy.
    pub fold_scores: Vec<f64>,
    pub parameters: Configuration,
    pub duration_ms: Option<u64>,
}
