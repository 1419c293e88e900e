use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::family::Family;

/// Main error type for the antenna parameter engine
#[derive(Error, Debug)]
pub enum AoError {
    #[error("Unknown family: {name}")]
    UnknownFamily { name: String },

    #[error("Model unavailable for {family}: {component} ({reason})")]
    ModelUnavailable {
        family: Family,
        component: ModelComponent,
        reason: String,
    },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Feedback error: {0}")]
    Feedback(#[from] FeedbackError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// The individually optional pieces of a family's surrogate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelComponent {
    ForwardModel,
    ForwardNormalizer,
    InverseModel,
    InverseInputNormalizer,
    InverseOutputNormalizer,
}

impl ModelComponent {
    pub const ALL: [ModelComponent; 5] = [
        ModelComponent::ForwardModel,
        ModelComponent::ForwardNormalizer,
        ModelComponent::InverseModel,
        ModelComponent::InverseInputNormalizer,
        ModelComponent::InverseOutputNormalizer,
    ];

    /// File name of the artifact inside the models directory.
    pub fn file_name(self, family: Family) -> String {
        let family = family.name();
        match self {
            Self::ForwardModel => format!("forward_{family}.json"),
            Self::ForwardNormalizer => format!("forward_{family}_scaler.json"),
            Self::InverseModel => format!("inverse_{family}.json"),
            Self::InverseInputNormalizer => format!("inverse_{family}_scaler_x.json"),
            Self::InverseOutputNormalizer => format!("inverse_{family}_scaler_y.json"),
        }
    }
}

impl fmt::Display for ModelComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ForwardModel => "forward model",
            Self::ForwardNormalizer => "forward normalizer",
            Self::InverseModel => "inverse model",
            Self::InverseInputNormalizer => "inverse input normalizer",
            Self::InverseOutputNormalizer => "inverse output normalizer",
        };
        f.write_str(s)
    }
}

/// Errors raised by model inference, training and artifact decoding
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Shape mismatch for {what}: got {got}, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("Invalid artifact {path}: {reason}")]
    InvalidArtifact { path: PathBuf, reason: String },

    #[error("Empty training set")]
    EmptyDataset,

    #[error("Non-finite value in {what}")]
    NonFinite { what: &'static str },

    #[error("Training failed: {message}")]
    Training { message: String },
}

/// Errors raised by the feedback store and correction artifacts
#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("CSV error: {message}")]
    Csv { message: String },

    #[error("Correction artifact error: {message}")]
    Artifact { message: String },

    #[error("Checkpoint error: {message}")]
    Checkpoint { message: String },
}

/// Result type alias for engine operations
pub type AoResult<T> = Result<T, AoError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::AoError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::AoError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::AoError::Config(format!($($arg)*))
    };
}
