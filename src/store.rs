//! SQLite persistence for recordings, run parameters and per-recording results.
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::info;

use crate::error::{Error, Result};
use crate::params::{ProcessParameters, RecordingFilter, DURATION_TOLERANCE};

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE recordings (
    id INTEGER PRIMARY KEY,
    xdf_file_path TEXT NOT NULL,
    parameters TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE process_parameters (
    id INTEGER PRIMARY KEY,
    parameters TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);
CREATE TABLE process_results (
    id INTEGER PRIMARY KEY,
    parameters_id INTEGER NOT NULL REFERENCES process_parameters(id) ON DELETE CASCADE,
    recording_id INTEGER NOT NULL REFERENCES recordings(id) ON DELETE CASCADE,
    results TEXT,
    notes TEXT,
    meta TEXT,
    updated_at TEXT NOT NULL,
    UNIQUE (parameters_id, recording_id)
);
CREATE INDEX idx_process_results_parameters ON process_results(parameters_id);
";

/// One raw capture session.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub id: i64,
    pub xdf_file_path: String,
    pub parameters: Value,
}

impl Recording {
    /// Name of the folder holding this recording's segmentation output: the
    /// file path without its extension.
    pub fn folder_name(&self) -> PathBuf {
        Path::new(&self.xdf_file_path).with_extension("")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParametersRow {
    pub id: i64,
    pub parameters: ProcessParameters,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessResult {
    pub id: i64,
    pub parameters_id: i64,
    pub recording_id: i64,
    pub results: Option<Value>,
    pub notes: Option<String>,
    pub meta: Option<Value>,
}

/// A result ready to be written for one recording.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub recording_id: i64,
    pub results: Value,
    pub notes: Option<String>,
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub inserted: usize,
    pub updated: usize,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (or creates) the database at `path`, creating parent folders and
    /// the schema as needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!("Opening SQLite database at {:?}", path);
        Self::init(Connection::open(path)?)
    }

    /// Fresh in-memory database with the current schema.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        match version {
            0 => {
                conn.execute_batch(SCHEMA_V1)?;
                conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
            }
            SCHEMA_VERSION => {}
            other => {
                return Err(Error::Config(format!(
                    "database schema version {other} is not supported (expected {SCHEMA_VERSION})"
                )))
            }
        }
        Ok(Self { conn })
    }

    /// Returns the row whose parameters are structurally equal to
    /// `parameters`, creating it if none exists. The flag is `true` on create.
    pub fn find_or_create_parameters(&self, parameters: &ProcessParameters) -> Result<(ParametersRow, bool)> {
        let canonical = parameters.canonical_json()?;
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM process_parameters WHERE parameters = ?1",
                params![canonical],
                |row| row.get(0),
            )
            .optional()?;

        let row = |id| ParametersRow {
            id,
            parameters: parameters.clone(),
        };
        match existing {
            Some(id) => Ok((row(id), false)),
            None => {
                self.conn.execute(
                    "INSERT INTO process_parameters (parameters, created_at) VALUES (?1, ?2)",
                    params![canonical, Utc::now().to_rfc3339()],
                )?;
                Ok((row(self.conn.last_insert_rowid()), true))
            }
        }
    }

    /// Registers a recording with its metadata (`duration_s`, `frequencies`, ...).
    pub fn insert_recording(&self, xdf_file_path: &str, parameters: &Value) -> Result<Recording> {
        self.conn.execute(
            "INSERT INTO recordings (xdf_file_path, parameters, created_at) VALUES (?1, ?2, ?3)",
            params![xdf_file_path, parameters.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(Recording {
            id: self.conn.last_insert_rowid(),
            xdf_file_path: xdf_file_path.to_string(),
            parameters: parameters.clone(),
        })
    }

    /// Recordings matching `filter`, ordered by id.
    pub fn select_recordings(&self, filter: &RecordingFilter) -> Result<Vec<Recording>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, xdf_file_path, parameters FROM recordings
             WHERE abs(json_extract(parameters, '$.duration_s') - ?1) < ?2
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![filter.duration_s, DURATION_TOLERANCE], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut recordings = Vec::new();
        for row in rows {
            let (id, xdf_file_path, raw) = row?;
            let parameters: Value = serde_json::from_str(&raw)?;
            if filter.matches(&parameters) {
                recordings.push(Recording {
                    id,
                    xdf_file_path,
                    parameters,
                });
            }
        }
        info!("Selected {} recordings to be processed", recordings.len());
        Ok(recordings)
    }

    /// Upserts every record in one transaction.
    pub fn save_results(&mut self, parameters_id: i64, records: &[ResultRecord]) -> Result<PersistOutcome> {
        let tx = self.conn.transaction()?;
        let mut outcome = PersistOutcome::default();
        let now = Utc::now().to_rfc3339();

        for record in records {
            let results = record.results.to_string();
            let meta = record.meta.as_ref().map(Value::to_string);
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM process_results WHERE parameters_id = ?1 AND recording_id = ?2",
                    params![parameters_id, record.recording_id],
                    |row| row.get(0),
                )
                .optional()?;
            match existing {
                Some(id) => {
                    tx.execute(
                        "UPDATE process_results SET results = ?1, notes = ?2, meta = ?3, updated_at = ?4
                         WHERE id = ?5",
                        params![results, record.notes, meta, now, id],
                    )?;
                    outcome.updated += 1;
                }
                None => {
                    tx.execute(
                        "INSERT INTO process_results
                         (parameters_id, recording_id, results, notes, meta, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![parameters_id, record.recording_id, results, record.notes, meta, now],
                    )?;
                    outcome.inserted += 1;
                }
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    /// Stored result for one (parameters, recording) pair, if any.
    pub fn find_result(&self, parameters_id: i64, recording_id: i64) -> Result<Option<ProcessResult>> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, results, notes, meta FROM process_results
                 WHERE parameters_id = ?1 AND recording_id = ?2",
                params![parameters_id, recording_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, results, notes, meta)) = raw else {
            return Ok(None);
        };
        Ok(Some(ProcessResult {
            id,
            parameters_id,
            recording_id,
            results: results.map(|s| serde_json::from_str(&s)).transpose()?,
            notes,
            meta: meta.map(|s| serde_json::from_str(&s)).transpose()?,
        }))
    }

    /// Number of results stored under `parameters_id`.
    pub fn count_results(&self, parameters_id: i64) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM process_results WHERE parameters_id = ?1",
            params![parameters_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Number of distinct process parameter rows.
    pub fn count_parameters(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM process_parameters", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
