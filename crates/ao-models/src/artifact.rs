use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use ao_types::{AoError, AoResult, Family, ModelComponent, ModelError};

use crate::mlp::Mlp;
use crate::normalizer::Normalizer;

/// Structural check run after an artifact is decoded.
pub trait Validate {
    fn validate(&self) -> Result<(), ModelError>;
}

impl Validate for Mlp {
    fn validate(&self) -> Result<(), ModelError> {
        Mlp::validate(self)
    }
}

impl Validate for Normalizer {
    fn validate(&self) -> Result<(), ModelError> {
        Normalizer::validate(self)
    }
}

/// Outcome of loading one optional artifact from disk.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact<T> {
    Loaded(T),
    Missing(PathBuf),
    Corrupt { path: PathBuf, reason: String },
}

/// [`Artifact`] without the payload, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    Loaded,
    Missing,
    Corrupt,
}

impl<T: DeserializeOwned + Validate> Artifact<T> {
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::Missing(path.to_path_buf());
        }
        match read_json::<T>(path).and_then(|value| {
            value.validate()?;
            Ok(value)
        }) {
            Ok(value) => Self::Loaded(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt artifact");
                Self::Corrupt {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            }
        }
    }
}

impl<T> Artifact<T> {
    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Loaded(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    pub fn state(&self) -> ArtifactState {
        match self {
            Self::Loaded(_) => ArtifactState::Loaded,
            Self::Missing(_) => ArtifactState::Missing,
            Self::Corrupt { .. } => ArtifactState::Corrupt,
        }
    }

    /// The loaded value, or `ModelUnavailable` naming `component`.
    pub fn require(&self, family: Family, component: ModelComponent) -> AoResult<&T> {
        match self {
            Self::Loaded(value) => Ok(value),
            Self::Missing(path) => Err(AoError::ModelUnavailable {
                family,
                component,
                reason: format!("not found at {}", path.display()),
            }),
            Self::Corrupt { path, reason } => Err(AoError::ModelUnavailable {
                family,
                component,
                reason: format!("corrupt artifact {}: {reason}", path.display()),
            }),
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ModelError> {
    let invalid = |reason: String| ModelError::InvalidArtifact {
        path: path.to_path_buf(),
        reason,
    };
    let file = File::open(path).map_err(|e| invalid(e.to_string()))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| invalid(e.to_string()))
}

/// Writes `value` as JSON next to `path` and renames it into place, so readers
/// never observe a partially written file.
pub fn write_json_atomic<T: Serialize>(path: impl AsRef<Path>, value: &T) -> AoResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}
