use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use ao_types::{
    AoResult, Family, FeedbackError, ObservedPerformance, ParamVector, Performance,
    TargetPerformance,
};

/// Column order of the feedback CSV.
pub const FEEDBACK_HEADER: [&str; 14] = [
    "timestamp",
    "family",
    "target_Fr_GHz",
    "target_BW_MHz",
    "param_0",
    "param_1",
    "param_2",
    "param_3",
    "param_4",
    "substrate_h",
    "eps_r",
    "actual_Fr_GHz",
    "actual_BW_MHz",
    "S11_dB",
];

/// One trial: what was asked for, what was proposed, what came back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub timestamp: DateTime<Utc>,
    pub family: Family,
    #[serde(rename = "target_Fr_GHz")]
    pub target_fr_ghz: f64,
    #[serde(rename = "target_BW_MHz")]
    pub target_bw_mhz: f64,
    pub param_0: f64,
    pub param_1: f64,
    pub param_2: f64,
    pub param_3: f64,
    pub param_4: f64,
    pub substrate_h: f64,
    pub eps_r: f64,
    #[serde(rename = "actual_Fr_GHz")]
    pub actual_fr_ghz: f64,
    #[serde(rename = "actual_BW_MHz")]
    pub actual_bw_mhz: f64,
    #[serde(rename = "S11_dB")]
    pub s11_db: f64,
}

impl FeedbackRecord {
    pub fn new(
        family: Family,
        target: &TargetPerformance,
        params: &ParamVector,
        observed: &ObservedPerformance,
    ) -> Self {
        Self::at(Utc::now(), family, target, params, observed)
    }

    pub fn at(
        timestamp: DateTime<Utc>,
        family: Family,
        target: &TargetPerformance,
        params: &ParamVector,
        observed: &ObservedPerformance,
    ) -> Self {
        Self {
            timestamp,
            family,
            target_fr_ghz: target.fr_ghz,
            target_bw_mhz: target.bw_mhz,
            param_0: params[0],
            param_1: params[1],
            param_2: params[2],
            param_3: params[3],
            param_4: params[4],
            substrate_h: params.substrate_height(),
            eps_r: params.permittivity(),
            actual_fr_ghz: observed.fr_ghz,
            actual_bw_mhz: observed.bw_mhz,
            s11_db: observed.s11_db,
        }
    }

    pub fn target(&self) -> TargetPerformance {
        Performance::new(self.target_fr_ghz, self.target_bw_mhz)
    }

    pub fn params(&self) -> ParamVector {
        ParamVector::new([
            self.param_0,
            self.param_1,
            self.param_2,
            self.param_3,
            self.param_4,
        ])
    }

    pub fn observed(&self) -> ObservedPerformance {
        ObservedPerformance::new(self.actual_fr_ghz, self.actual_bw_mhz, self.s11_db)
    }

    /// Signed `actual - target`.
    pub fn error(&self) -> Performance {
        self.observed().performance().error_from(&self.target())
    }

    fn is_finite(&self) -> bool {
        self.params().is_finite() && self.target().is_finite() && self.error().is_finite()
    }
}

/// Append-only CSV log of trials.
#[derive(Debug, Clone)]
pub struct FeedbackStore {
    path: PathBuf,
}

impl FeedbackStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Appends one row, writing the header first if the file is new or empty.
    pub fn append(&self, record: &FeedbackRecord) -> AoResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer.write_record(FEEDBACK_HEADER).map_err(csv_error)?;
        }
        writer.serialize(record).map_err(csv_error)?;
        writer.flush()?;

        debug!(path = %self.path.display(), family = %record.family, "Appended feedback record");
        Ok(())
    }

    /// Every valid row. A missing file reads as empty; malformed rows are skipped.
    pub fn load(&self) -> AoResult<Vec<FeedbackRecord>> {
        if !self.exists() {
            return Ok(Vec::new());
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| FeedbackError::Csv {
                message: format!("Failed to open {}: {e}", self.path.display()),
            })?;
        let headers = reader.headers().map_err(csv_error)?.clone();

        let mut records = Vec::new();
        for (index, row) in reader.records().enumerate() {
            let line = index + 2;
            let parsed = row
                .map_err(|e| e.to_string())
                .and_then(|row| row.deserialize::<FeedbackRecord>(Some(&headers)).map_err(|e| e.to_string()))
                .and_then(|record| {
                    if record.is_finite() {
                        Ok(record)
                    } else {
                        Err("non-finite value".to_string())
                    }
                });

            match parsed {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("Skipping invalid feedback record at line {}: {}", line, e);
                }
            }
        }

        info!(path = %self.path.display(), rows = records.len(), "Loaded feedback");
        Ok(records)
    }

    pub fn count(&self) -> AoResult<usize> {
        Ok(self.load()?.len())
    }
}

fn csv_error(e: csv::Error) -> FeedbackError {
    FeedbackError::Csv {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn record(fr: f64) -> FeedbackRecord {
        FeedbackRecord::new(
            Family::PatchRect,
            &Performance::new(2.4, 100.0),
            &ParamVector::new([0.03, 0.029, 0.002, 0.0016, 4.4]),
            &ObservedPerformance::new(fr, 95.0, -18.5),
        )
    }

    #[test]
    fn header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::new(dir.path().join("logs").join("feedback.csv"));

        store.append(&record(2.5)).unwrap();
        store.append(&record(2.45)).unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], FEEDBACK_HEADER.join(","));
        assert!(lines[1].contains("patch_rect"));
    }

    #[test]
    fn load_round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::new(dir.path().join("feedback.csv"));
        let original = record(2.5);

        store.append(&original).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].family, Family::PatchRect);
        assert_eq!(loaded[0].params(), original.params());
        assert_eq!(loaded[0].timestamp, original.timestamp);
        let err = loaded[0].error();
        assert!((err.fr_ghz - 0.1).abs() < 1e-9);
        assert!((err.bw_mhz + 5.0).abs() < 1e-9);
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::new(dir.path().join("absent.csv"));
        assert!(store.load().unwrap().is_empty());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn invalid_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::new(dir.path().join("feedback.csv"));
        store.append(&record(2.5)).unwrap();

        let mut file = OpenOptions::new().append(true).open(store.path()).unwrap();
        writeln!(
            file,
            "2026-01-01T00:00:00Z,horn,2.4,100,0,0,0,0,0,0,0,2.4,100,-10"
        )
        .unwrap();
        writeln!(
            file,
            "2026-01-01T00:00:00Z,dipole,2.4,not-a-number,0,0,0,0,0,0,0,2.4,100,-10"
        )
        .unwrap();
        drop(file);
        store.append(&record(2.3)).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
    }
}
