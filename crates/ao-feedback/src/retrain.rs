//! Correction retraining from accumulated feedback.

use chrono::Utc;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use ao_models::{MlpTrainer, Normalizer, PredictionService, TrainingConfig, TrainingReport};
use ao_types::{AoResult, EngineConfig, FeedbackError, ParamVector, RetrainSettings, PARAM_COUNT};

use crate::artifact::{build_features, feature_columns, CorrectionArtifact};
use crate::checkpoint::RetrainCheckpoint;
use crate::store::{FeedbackRecord, FeedbackStore};

/// Added to each standard deviation before dividing.
const STD_EPSILON: f64 = 1e-8;

/// Leading geometry slots a correction may move. Substrate height and
/// permittivity are material choices and are never corrected.
const CORRECTED_SLOTS: usize = 3;

/// Why a retrain was declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    NoFeedback,
    TooFewSamples { have: usize, need: usize },
    TooFewNewSamples { new: usize, need: usize },
    /// No row could be mapped back through an inverse surrogate.
    NoUsableSamples { skipped: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainSummary {
    pub sample_count: usize,
    /// Rows left out because their family has no usable inverse surrogate.
    pub skipped_samples: usize,
    pub feature_columns: Vec<String>,
    pub report: TrainingReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetrainOutcome {
    Skipped(SkipReason),
    Retrained(RetrainSummary),
}

/// Parameter delta that would have cancelled a trial's observed error.
///
/// The inverse surrogate maps both the target and the measured performance
/// back to parameters; their difference is the move that shifts the design
/// from what it achieved to what was asked for, in parameter units.
pub fn correction_target(
    prediction: &PredictionService,
    record: &FeedbackRecord,
) -> AoResult<ParamVector> {
    let wanted = prediction.predict_inverse(record.family, &record.target())?;
    let achieved = prediction.predict_inverse(record.family, &record.observed().performance())?;
    Ok(wanted.map(|slot, value| {
        if slot < CORRECTED_SLOTS {
            value - achieved[slot]
        } else {
            0.0
        }
    }))
}

/// Feature and target matrices, one row per usable record.
#[derive(Debug, Clone)]
pub struct CorrectionDataset {
    pub features: Array2<f64>,
    pub targets: Array2<f64>,
    pub skipped: usize,
}

impl CorrectionDataset {
    pub fn len(&self) -> usize {
        self.features.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Refits the correction model from the whole feedback history once enough
/// new rows have arrived since the last checkpoint.
#[derive(Debug, Clone)]
pub struct CorrectionRetrainer {
    store: FeedbackStore,
    artifact_path: PathBuf,
    checkpoint_path: PathBuf,
    settings: RetrainSettings,
    prediction: PredictionService,
}

impl CorrectionRetrainer {
    pub fn new(
        store: FeedbackStore,
        artifact_path: impl Into<PathBuf>,
        checkpoint_path: impl Into<PathBuf>,
        settings: RetrainSettings,
        prediction: PredictionService,
    ) -> Self {
        Self {
            store,
            artifact_path: artifact_path.into(),
            checkpoint_path: checkpoint_path.into(),
            settings,
            prediction,
        }
    }

    pub fn from_config(config: &EngineConfig, prediction: PredictionService) -> Self {
        Self::new(
            FeedbackStore::new(config.paths.feedback_csv.clone()),
            config.paths.correction_artifact.clone(),
            config.paths.checkpoint.clone(),
            config.retrain.clone(),
            prediction,
        )
    }

    pub fn store(&self) -> &FeedbackStore {
        &self.store
    }

    /// `true` iff a new correction model was written.
    pub fn quick_retrain(&self) -> bool {
        match self.retrain() {
            Ok(RetrainOutcome::Retrained(_)) => true,
            Ok(RetrainOutcome::Skipped(reason)) => {
                debug!(?reason, "Correction retrain skipped");
                false
            }
            Err(e) => {
                warn!(error = %e, "Correction retrain failed");
                false
            }
        }
    }

    pub fn retrain(&self) -> AoResult<RetrainOutcome> {
        let records = self.store.load()?;
        let n = records.len();
        if n == 0 {
            return Ok(RetrainOutcome::Skipped(SkipReason::NoFeedback));
        }
        if n < self.settings.min_samples {
            return Ok(RetrainOutcome::Skipped(SkipReason::TooFewSamples {
                have: n,
                need: self.settings.min_samples,
            }));
        }
        let last = RetrainCheckpoint::last_sample_count(&self.checkpoint_path);
        let new = n.saturating_sub(last);
        if new < self.settings.min_new_samples {
            return Ok(RetrainOutcome::Skipped(SkipReason::TooFewNewSamples {
                new,
                need: self.settings.min_new_samples,
            }));
        }

        let columns = feature_columns(self.settings.use_error_features);
        let dataset = build_dataset(&records, &columns, &self.prediction)?;
        if dataset.is_empty() {
            return Ok(RetrainOutcome::Skipped(SkipReason::NoUsableSamples {
                skipped: dataset.skipped,
            }));
        }

        let input_normalizer = Normalizer::fit(dataset.features.view(), STD_EPSILON)?;
        let output_normalizer = Normalizer::fit(dataset.targets.view(), STD_EPSILON)?;
        let xs = input_normalizer.transform_batch(dataset.features.view())?;
        let ys = output_normalizer.transform_batch(dataset.targets.view())?;

        let trainer = MlpTrainer::new(TrainingConfig::from(&self.settings));
        let (model, report) = trainer.fit(xs.view(), ys.view())?;

        let artifact = CorrectionArtifact {
            model,
            input_normalizer,
            output_normalizer,
            feature_columns: columns.clone(),
            sample_count: n,
            trained_at: Utc::now(),
        };
        artifact.save(&self.artifact_path)?;
        RetrainCheckpoint::new(n).save(&self.checkpoint_path)?;

        info!(
            samples = n,
            new_samples = new,
            skipped = dataset.skipped,
            epochs = report.epochs,
            loss = report.best_loss,
            "Correction model retrained"
        );

        Ok(RetrainOutcome::Retrained(RetrainSummary {
            sample_count: n,
            skipped_samples: dataset.skipped,
            feature_columns: columns,
            report,
        }))
    }
}

/// Rows whose family has no inverse surrogate, or whose delta is not finite,
/// are counted in `skipped` and left out.
pub fn build_dataset(
    records: &[FeedbackRecord],
    columns: &[String],
    prediction: &PredictionService,
) -> AoResult<CorrectionDataset> {
    let mut features = Vec::with_capacity(records.len() * columns.len());
    let mut targets = Vec::with_capacity(records.len() * PARAM_COUNT);
    let mut skipped = 0;

    for record in records {
        let delta = match correction_target(prediction, record) {
            Ok(delta) if delta.is_finite() => delta,
            Ok(_) => {
                debug!(family = %record.family, "Non-finite correction target, skipping row");
                skipped += 1;
                continue;
            }
            Err(e) => {
                debug!(family = %record.family, error = %e, "No inverse for feedback row, skipping");
                skipped += 1;
                continue;
            }
        };

        let error = record.error();
        let row = build_features(
            columns,
            record.family,
            &record.target(),
            &record.params(),
            Some(&error),
        )
        .map_err(|message| FeedbackError::Artifact { message })?;

        features.extend(row);
        targets.extend(delta.iter().copied());
    }

    let rows = records.len() - skipped;
    let shape_error = |e: ndarray::ShapeError| FeedbackError::Artifact {
        message: e.to_string(),
    };
    Ok(CorrectionDataset {
        features: Array2::from_shape_vec((rows, columns.len()), features).map_err(shape_error)?,
        targets: Array2::from_shape_vec((rows, PARAM_COUNT), targets).map_err(shape_error)?,
        skipped,
    })
}
