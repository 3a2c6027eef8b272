//! # cp-optimizer
//!
//! Hyperparameter search for Caliper.
//!
//! Provides search space definitions, the exhaustive grid strategy, the
//! sequential Tree-structured Parzen Estimator strategy, and trial tracking.

mod search;
mod tpe;
mod trial;

pub use search::{
    Configuration, GridSearch, ParameterDef, ParameterKind, ParameterValue, SearchSpace,
    SearchStrategy,
};
pub use tpe::TpeSearch;
pub use trial::{
    ObjectiveDirection, OptimizationId, OptimizationState, OptimizationStatus, Trial,
    TrialResult, TrialStatus,
};
