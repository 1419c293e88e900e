use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use ao_models::write_json_atomic;
use ao_types::{AoResult, FeedbackError};

/// Feedback row count at the last successful retrain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrainCheckpoint {
    pub sample_count: usize,
    pub trained_at: DateTime<Utc>,
}

impl RetrainCheckpoint {
    pub fn new(sample_count: usize) -> Self {
        Self {
            sample_count,
            trained_at: Utc::now(),
        }
    }

    /// `Ok(None)` when no checkpoint has been written yet.
    pub fn load(path: impl AsRef<Path>) -> AoResult<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        let checkpoint = serde_json::from_str(&raw).map_err(|e| FeedbackError::Checkpoint {
            message: format!("cannot decode {}: {e}", path.display()),
        })?;
        Ok(Some(checkpoint))
    }

    /// Sample count gate. An unreadable checkpoint counts as zero.
    pub fn last_sample_count(path: impl AsRef<Path>) -> usize {
        match Self::load(path) {
            Ok(checkpoint) => checkpoint.map(|c| c.sample_count).unwrap_or(0),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable retrain checkpoint");
                0
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> AoResult<()> {
        write_json_atomic(path, self)
    }
}
