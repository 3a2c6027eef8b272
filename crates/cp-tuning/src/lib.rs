//! # cp-tuning
//!
//! Tune-evaluate-persist for Caliper.
//!
//! A [`TuningRunner`] searches a family's hyperparameters under
//! cross-validation, refits the chosen configuration on the whole train
//! split, scores it on the test split, and writes the confusion matrix as
//! `<deployment>_<sensor>_<run>_<tag>.npy` and `.txt`.

pub mod artifact;
pub mod config;
pub mod family;
pub mod loader;
pub mod runner;

pub use artifact::{encode_npy, ArtifactPaths, ArtifactStore};
pub use config::{CvConfig, CvKind, RunManifest, TuningConfig};
pub use family::{Family, FamilyDescriptor, StrategyKind};
pub use loader::load_csv;
pub use runner::{EvaluationResult, TuneState, TuningRunner};
