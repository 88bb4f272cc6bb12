use crate::core::models::trial::Trial;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LEDGER_FILE_NAME: &str = "trials.csv";
pub const SNAPSHOT_FILE_NAME: &str = "experiment.json";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("JSON serialization error for '{path}': {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}

/// Append-only CSV record of finished trials plus a JSON snapshot of the whole run,
/// both kept in the problem's state directory.
#[derive(Debug, Clone)]
pub struct TrialLedger {
    csv_path: PathBuf,
    snapshot_path: PathBuf,
    parameters: Vec<String>,
    objectives: Vec<String>,
}

impl TrialLedger {
    /// Starts a fresh ledger in `dir`, replacing any ledger of an earlier run.
    pub fn create(
        dir: &Path,
        parameters: Vec<String>,
        objectives: Vec<String>,
    ) -> Result<Self, LedgerError> {
        let ledger = Self {
            csv_path: dir.join(LEDGER_FILE_NAME),
            snapshot_path: dir.join(SNAPSHOT_FILE_NAME),
            parameters,
            objectives,
        };

        let mut writer = csv::Writer::from_path(&ledger.csv_path).map_err(|e| ledger.csv_error(e))?;
        let mut header = vec![
            "trial".to_string(),
            "status".to_string(),
            "created_at".to_string(),
            "finished_at".to_string(),
        ];
        header.extend(ledger.parameters.iter().cloned());
        for objective in &ledger.objectives {
            header.push(objective.clone());
            header.push(format!("{}_sem", objective));
        }
        header.push("failure".to_string());
        writer.write_record(&header).map_err(|e| ledger.csv_error(e))?;
        writer.flush().map_err(|e| ledger.io_error(&ledger.csv_path, e))?;
        Ok(ledger)
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn append(&self, trial: &Trial) -> Result<(), LedgerError> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .map_err(|e| self.io_error(&self.csv_path, e))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        let mut record = vec![
            trial.tag(),
            trial.status().to_string(),
            trial.created_at.to_rfc3339(),
            trial
                .finished_at()
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        ];
        for name in &self.parameters {
            record.push(
                trial
                    .assignment
                    .get(name)
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            );
        }
        for name in &self.objectives {
            let measurement = trial.result().and_then(|r| r.get(name));
            record.push(measurement.map(|m| m.mean.to_string()).unwrap_or_default());
            record.push(
                measurement
                    .and_then(|m| m.sem)
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
            );
        }
        record.push(
            trial
                .failure()
                .map(ToString::to_string)
                .unwrap_or_default(),
        );

        writer.write_record(&record).map_err(|e| self.csv_error(e))?;
        writer.flush().map_err(|e| self.io_error(&self.csv_path, e))
    }

    /// Replaces the snapshot atomically.
    pub fn write_snapshot<T: Serialize>(&self, snapshot: &T) -> Result<(), LedgerError> {
        let tmp = self.snapshot_path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(snapshot).map_err(|e| LedgerError::Json {
            path: self.snapshot_path.to_string_lossy().to_string(),
            source: e,
        })?;
        std::fs::write(&tmp, json).map_err(|e| self.io_error(&tmp, e))?;
        std::fs::rename(&tmp, &self.snapshot_path).map_err(|e| self.io_error(&self.snapshot_path, e))
    }

    fn csv_error(&self, source: csv::Error) -> LedgerError {
        LedgerError::Csv {
            path: self.csv_path.to_string_lossy().to_string(),
            source,
        }
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: path.to_string_lossy().to_string(),
            source,
        }
    }
}
