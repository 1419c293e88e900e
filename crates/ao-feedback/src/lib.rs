//! Trial feedback and online correction.
//!
//! The feedback store is the only training source for the correction model;
//! the retrainer refits it from the full history and the engine reloads it on
//! a fixed interval.

pub mod artifact;
pub mod checkpoint;
pub mod correction;
pub mod retrain;
pub mod store;

pub use artifact::{build_features, feature_columns, CorrectionArtifact};
pub use checkpoint::RetrainCheckpoint;
pub use correction::CorrectionModel;
pub use retrain::{
    build_dataset, correction_target, CorrectionDataset, CorrectionRetrainer, RetrainOutcome,
    RetrainSummary, SkipReason,
};
pub use store::{FeedbackRecord, FeedbackStore, FEEDBACK_HEADER};
