//! Surrogate models for the antenna parameter engine.
//!
//! Dense regressors with their normalizers, the lazily populated per-family
//! registry, and forward/inverse inference on top of it.

pub mod artifact;
pub mod mlp;
pub mod normalizer;
pub mod prediction;
pub mod registry;
pub mod training;

pub use artifact::{write_json_atomic, Artifact, ArtifactState, Validate};
pub use mlp::{Activation, DenseLayer, Mlp};
pub use normalizer::Normalizer;
pub use prediction::PredictionService;
pub use registry::{FamilyModels, ModelRegistry, RegistryStats};
pub use training::{MlpTrainer, TrainingConfig, TrainingReport};
