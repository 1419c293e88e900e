use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ao_models::{write_json_atomic, Mlp, Normalizer};
use ao_types::{AoResult, Family, FeedbackError, ParamVector, Performance, PARAM_COUNT};

pub const FAMILY_ID_COLUMN: &str = "family_id";
pub const TARGET_FR_COLUMN: &str = "target_Fr_GHz";
pub const TARGET_BW_COLUMN: &str = "target_BW_MHz";
pub const PARAM_COLUMNS: [&str; PARAM_COUNT] = ["param_0", "param_1", "param_2", "param_3", "param_4"];
pub const ERR_FR_COLUMN: &str = "err_Fr";
pub const ERR_BW_COLUMN: &str = "err_BW";

/// Feature column order for the correction regressor.
pub fn feature_columns(with_error: bool) -> Vec<String> {
    let mut columns = vec![
        FAMILY_ID_COLUMN.to_string(),
        TARGET_FR_COLUMN.to_string(),
        TARGET_BW_COLUMN.to_string(),
    ];
    columns.extend(PARAM_COLUMNS.iter().map(|c| c.to_string()));
    if with_error {
        columns.push(ERR_FR_COLUMN.to_string());
        columns.push(ERR_BW_COLUMN.to_string());
    }
    columns
}

/// Builds one feature row in `columns` order. Error columns read zero when
/// `error` is unknown. Unrecognised column names are rejected.
pub fn build_features(
    columns: &[String],
    family: Family,
    target: &Performance,
    params: &ParamVector,
    error: Option<&Performance>,
) -> Result<Vec<f64>, String> {
    columns
        .iter()
        .map(|column| match column.as_str() {
            FAMILY_ID_COLUMN => Ok(family.id() as f64),
            TARGET_FR_COLUMN => Ok(target.fr_ghz),
            TARGET_BW_COLUMN => Ok(target.bw_mhz),
            ERR_FR_COLUMN => Ok(error.map(|e| e.fr_ghz).unwrap_or(0.0)),
            ERR_BW_COLUMN => Ok(error.map(|e| e.bw_mhz).unwrap_or(0.0)),
            other => PARAM_COLUMNS
                .iter()
                .position(|c| *c == other)
                .map(|slot| params[slot])
                .ok_or_else(|| format!("unknown feature column '{other}'")),
        })
        .collect()
}

/// Everything a retrain produces, persisted as one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionArtifact {
    pub model: Mlp,
    pub input_normalizer: Normalizer,
    pub output_normalizer: Normalizer,
    pub feature_columns: Vec<String>,
    pub sample_count: usize,
    pub trained_at: DateTime<Utc>,
}

impl CorrectionArtifact {
    pub fn uses_error_features(&self) -> bool {
        self.feature_columns.iter().any(|c| c == ERR_FR_COLUMN || c == ERR_BW_COLUMN)
    }

    pub fn validate(&self) -> Result<(), FeedbackError> {
        let invalid = |message: String| FeedbackError::Artifact { message };

        self.model.validate().map_err(|e| invalid(e.to_string()))?;
        self.input_normalizer
            .validate()
            .map_err(|e| invalid(e.to_string()))?;
        self.output_normalizer
            .validate()
            .map_err(|e| invalid(e.to_string()))?;

        let width = self.feature_columns.len();
        if self.model.input_dim() != width || self.input_normalizer.dim() != width {
            return Err(invalid(format!(
                "feature width {width} does not match model input {} / normalizer {}",
                self.model.input_dim(),
                self.input_normalizer.dim()
            )));
        }
        if self.model.output_dim() != PARAM_COUNT || self.output_normalizer.dim() != PARAM_COUNT {
            return Err(invalid(format!(
                "correction output must have {PARAM_COUNT} slots, model has {}",
                self.model.output_dim()
            )));
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> AoResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let artifact: Self = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            FeedbackError::Artifact {
                message: format!("cannot decode {}: {e}", path.display()),
            }
        })?;
        artifact.validate()?;
        Ok(artifact)
    }

    /// Atomic replace.
    pub fn save(&self, path: impl AsRef<Path>) -> AoResult<()> {
        write_json_atomic(path, self)
    }
}
