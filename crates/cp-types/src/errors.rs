use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the Caliper system
#[derive(Error, Debug)]
pub enum CpError {
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("External failure: {0}")]
    External(#[from] ExternalError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Empty or inconsistent datasets handed to a tuning call
#[derive(Error, Debug)]
pub enum InputError {
    #[error("{split} split is empty")]
    EmptyDataset { split: String },

    #[error("Feature dimensionality mismatch: train has {train} features, test has {test}")]
    DimensionMismatch { train: usize, test: usize },

    #[error("Row {row} has {actual} features, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("{features} feature rows but {labels} labels")]
    LengthMismatch { features: usize, labels: usize },

    #[error("Non-finite feature value at row {row}, column {column}")]
    NonFinite { row: usize, column: usize },

    #[error("Invalid input: {message}")]
    Invalid { message: String },
}

/// Search-space or output-location problems
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Parameter {parameter} has an empty domain")]
    EmptyDomain { parameter: String },

    #[error("{strategy} search cannot handle parameter {parameter}: {reason}")]
    IncompatibleSpace {
        strategy: String,
        parameter: String,
        reason: String,
    },

    #[error("Missing hyperparameter: {parameter}")]
    MissingParameter { parameter: String },

    #[error("Invalid value for {parameter}: {message}")]
    InvalidParameter { parameter: String, message: String },

    #[error("Value for {parameter} is outside its declared domain: {value}")]
    OutsideDomain { parameter: String, value: String },

    #[error("Unknown classifier family: {tag}")]
    UnknownFamily { tag: String },

    #[error("Output location {} is not writable: {source}", path.display())]
    UnwritableOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

/// Failures surfaced by the search, fit or predict routines
#[derive(Error, Debug)]
pub enum ExternalError {
    #[error("Fit failed for {model}: {message}")]
    FitFailed { model: String, message: String },

    #[error("Predict called on unfitted {model}")]
    NotFitted { model: String },

    #[error("Cross-validation failed: {message}")]
    CrossValidation { message: String },

    #[error("Search failed: {message}")]
    SearchFailed { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Caliper operations
pub type CpResult<T> = Result<T, CpError>;

/// Macro for creating input errors
#[macro_export]
macro_rules! input_error {
    ($($arg:tt)*) => {
        $crate::CpError::Input($crate::InputError::Invalid { message: format!($($arg)*) })
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::CpError::Config($crate::ConfigError::Other(format!($($arg)*)))
    };
}

/// Macro for creating external failures
#[macro_export]
macro_rules! external_error {
    ($($arg:tt)*) => {
        $crate::CpError::External($crate::ExternalError::Other(format!($($arg)*)))
    };
}

impl CpError {
    /// True for empty or inconsistent datasets.
    pub fn is_input(&self) -> bool {
        matches!(self, CpError::Input(_))
    }

    /// True for search-space shape problems and unwritable outputs.
    pub fn is_config(&self) -> bool {
        matches!(self, CpError::Config(_))
    }

    /// True for failures surfaced by search, fit or predict.
    pub fn is_external(&self) -> bool {
        matches!(self, CpError::External(_))
    }
}
