//! Result persistence in SQLite, keyed by traveler and trip.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::record::{ProofDocument, SubmissionOutcome, SubmissionPath, SubmissionResult, TripKey};

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("result store: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("result store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored row for {key} is corrupt: {detail}")]
    Corrupt { key: String, detail: String },
}

/// What `store` did with the row for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOutcome {
    /// No earlier result existed.
    Inserted,
    /// A different confirmation replaced the earlier one.
    Superseded,
    /// The same confirmation was already stored.
    Unchanged,
}

/// A stored result plus the fingerprint of the record that produced it.
#[derive(Debug, Clone)]
pub struct StoredSubmission {
    pub result: SubmissionResult,
    pub record_fingerprint: String,
}

/// Listing row; carries no proof bytes.
#[derive(Debug, Clone, Serialize)]
pub struct StoredSummary {
    pub trip_key: String,
    pub confirmation_code: String,
    pub path: SubmissionPath,
    pub completed_at: DateTime<Utc>,
}

/// SQLite-backed result store.
pub struct ResultStore {
    db: Mutex<Connection>,
    path: Option<PathBuf>,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS submission_results (
    trip_key TEXT PRIMARY KEY,
    submit_id TEXT NOT NULL,
    confirmation_code TEXT NOT NULL,
    proof BLOB NOT NULL,
    proof_media_type TEXT NOT NULL,
    elapsed_ms INTEGER NOT NULL,
    path TEXT NOT NULL,
    record_fingerprint TEXT NOT NULL,
    completed_at TEXT NOT NULL
);";

impl ResultStore {
    /// Open or create a store at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Connection::open(path)?;
        db.execute_batch(SCHEMA)?;
        tracing::debug!(path = %path.display(), "result store opened");
        Ok(Self {
            db: Mutex::new(db),
            path: Some(path.to_path_buf()),
        })
    }

    /// Store that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let db = Connection::open_in_memory()?;
        db.execute_batch(SCHEMA)?;
        Ok(Self {
            db: Mutex::new(db),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Persist `result` for `key`, superseding any earlier result.
    pub fn store(
        &self,
        key: &TripKey,
        result: &SubmissionResult,
        record_fingerprint: &str,
    ) -> Result<StoreOutcome, StorageError> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());

        let existing: Option<String> = db
            .query_row(
                "SELECT confirmation_code FROM submission_results WHERE trip_key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match existing {
            Some(code) if code == result.confirmation_code => return Ok(StoreOutcome::Unchanged),
            Some(_) => StoreOutcome::Superseded,
            None => StoreOutcome::Inserted,
        };

        db.execute(
            "INSERT OR REPLACE INTO submission_results
                (trip_key, submit_id, confirmation_code, proof, proof_media_type,
                 elapsed_ms, path, record_fingerprint, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                key.as_str(),
                result.submit_id,
                result.confirmation_code,
                result.proof.bytes,
                result.proof.media_type,
                result.elapsed_ms as i64,
                result.path.as_str(),
                record_fingerprint,
                result.completed_at.to_rfc3339(),
            ],
        )?;

        tracing::info!(trip = %key.digest(), outcome = ?outcome, "result stored");
        Ok(outcome)
    }

    /// The stored result for `key`, if any.
    pub fn load(&self, key: &TripKey) -> Result<Option<SubmissionResult>, StorageError> {
        Ok(self.lookup(key)?.map(|stored| stored.result))
    }

    /// The stored result for `key` together with its record fingerprint.
    pub fn lookup(&self, key: &TripKey) -> Result<Option<StoredSubmission>, StorageError> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let row = db
            .query_row(
                "SELECT submit_id, confirmation_code, proof, proof_media_type, elapsed_ms,
                        path, record_fingerprint, completed_at
                 FROM submission_results WHERE trip_key = ?1",
                params![key.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((submit_id, code, bytes, media_type, elapsed_ms, path, fingerprint, completed)) = row
        else {
            return Ok(None);
        };

        let corrupt = |detail: String| StorageError::Corrupt {
            key: key.digest(),
            detail,
        };
        let path = SubmissionPath::parse(&path).ok_or_else(|| corrupt(format!("unknown path `{path}`")))?;
        let completed_at = DateTime::parse_from_rfc3339(&completed)
            .map_err(|e| corrupt(format!("bad timestamp: {e}")))?
            .with_timezone(&Utc);

        Ok(Some(StoredSubmission {
            result: SubmissionResult {
                submit_id,
                confirmation_code: code,
                proof: ProofDocument {
                    media_type,
                    bytes,
                },
                elapsed_ms: elapsed_ms.max(0) as u64,
                outcome: SubmissionOutcome::Accepted,
                path,
                completed_at,
            },
            record_fingerprint: fingerprint,
        }))
    }

    /// Remove the result for `key`. Returns whether a row existed.
    pub fn clear(&self, key: &TripKey) -> Result<bool, StorageError> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let removed = db.execute(
            "DELETE FROM submission_results WHERE trip_key = ?1",
            params![key.as_str()],
        )?;
        Ok(removed > 0)
    }

    /// All stored keys with their confirmation codes, newest first.
    pub fn list(&self) -> Result<Vec<StoredSummary>, StorageError> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = db.prepare(
            "SELECT trip_key, confirmation_code, path, completed_at
             FROM submission_results ORDER BY completed_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (trip_key, confirmation_code, path, completed_at) = row?;
            let corrupt = |detail: String| StorageError::Corrupt {
                key: TripKey::from_raw(trip_key.clone()).digest(),
                detail,
            };
            summaries.push(StoredSummary {
                path: SubmissionPath::parse(&path)
                    .ok_or_else(|| corrupt(format!("unknown path `{path}`")))?,
                completed_at: DateTime::parse_from_rfc3339(&completed_at)
                    .map_err(|e| corrupt(format!("bad timestamp: {e}")))?
                    .with_timezone(&Utc),
                trip_key,
                confirmation_code,
            });
        }
        Ok(summaries)
    }
}

/// ~/.arrival-card/results.db
pub fn default_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".arrival-card")
        .join("results.db")
}
