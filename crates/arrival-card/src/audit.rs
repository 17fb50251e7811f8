//! Attempt journal: one JSON line per finished attempt.
//!
//! The live file is `attempts.jsonl`. When the next line would push it past
//! the size cap, older generations move up one slot (`attempts.jsonl.1` is
//! the newest), the oldest beyond [`KEPT_GENERATIONS`] is dropped, and the
//! line starts a fresh live file.
//!
//! Entries identify the trip by a short digest only; traveler fields are
//! never written.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::record::SubmissionPath;

/// Live-file size cap (10 MB).
const JOURNAL_CAP: u64 = 10 * 1024 * 1024;

/// Rolled-over generations kept next to the live file.
const KEPT_GENERATIONS: u32 = 5;

/// One finished attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptEntry {
    pub timestamp: String,
    pub submit_id: Option<String>,
    pub trip_digest: String,
    pub path: SubmissionPath,
    /// `accepted`, `previously_accepted`, or the error class.
    pub outcome: String,
    pub elapsed_ms: u64,
}

impl AttemptEntry {
    pub fn new(
        trip_digest: impl Into<String>,
        path: SubmissionPath,
        submit_id: Option<String>,
        outcome: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            submit_id,
            trip_digest: trip_digest.into(),
            path,
            outcome: outcome.into(),
            elapsed_ms,
        }
    }
}

/// Size-capped JSONL journal of attempts.
pub struct AttemptJournal {
    live: File,
    path: PathBuf,
    cap: u64,
    written: u64,
}

impl AttemptJournal {
    /// Open or create the journal at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_cap(path, JOURNAL_CAP)
    }

    fn with_cap(path: &Path, cap: u64) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create journal directory {}", dir.display()))?;
        }
        let live = open_append(path)?;
        let written = live.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            live,
            path: path.to_path_buf(),
            cap,
            written,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, rolling the live file over first when the line would
    /// not fit under the cap. A single oversized line still lands in an empty file.
    pub fn record(&mut self, entry: &AttemptEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let len = line.len() as u64;

        if self.written > 0 && self.written + len > self.cap {
            self.roll_over()?;
        }

        self.live
            .write_all(&line)
            .with_context(|| format!("journal write failed: {}", self.path.display()))?;
        self.written += len;
        Ok(())
    }

    /// The last `limit` entries of the live file, oldest first. Lines that do
    /// not parse are skipped.
    pub fn recent(&self, limit: usize) -> Result<Vec<AttemptEntry>> {
        let file = File::open(&self.path)
            .with_context(|| format!("cannot read journal {}", self.path.display()))?;
        let mut entries: Vec<AttemptEntry> = BufReader::new(file)
            .lines()
            .map_while(|line| line.ok())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.split_off(skip))
    }

    fn roll_over(&mut self) -> Result<()> {
        self.live.flush()?;

        let oldest = generation(&self.path, KEPT_GENERATIONS);
        if oldest.exists() {
            std::fs::remove_file(&oldest)
                .with_context(|| format!("cannot drop {}", oldest.display()))?;
        }
        for n in (1..KEPT_GENERATIONS).rev() {
            let from = generation(&self.path, n);
            if from.exists() {
                std::fs::rename(&from, generation(&self.path, n + 1))?;
            }
        }
        std::fs::rename(&self.path, generation(&self.path, 1))
            .with_context(|| format!("cannot roll over {}", self.path.display()))?;

        self.live = open_append(&self.path)?;
        self.written = 0;
        tracing::debug!(path = %self.path.display(), "attempt journal rolled over");
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open journal {}", path.display()))
}

/// `~/.arrival-card/attempts.jsonl`
pub fn default_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".arrival-card")
        .join("attempts.jsonl")
}

/// `attempts.jsonl` generation `n` is `attempts.jsonl.<n>`.
fn generation(live: &Path, n: u32) -> PathBuf {
    let mut name = live.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{n}"));
    live.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(outcome: &str) -> AttemptEntry {
        let mut entry = AttemptEntry::new(
            "0123456789abcdef",
            SubmissionPath::Hybrid,
            Some("ACS-1".to_string()),
            outcome,
            1_500,
        );
        // Fixed width so line sizes are predictable.
        entry.timestamp = "2026-10-18T09:00:00+00:00".to_string();
        entry
    }

    fn line_len() -> u64 {
        serde_json::to_vec(&entry("accepted")).unwrap().len() as u64 + 1
    }

    #[test]
    fn test_journal_appends_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attempts.jsonl");
        let mut journal = AttemptJournal::open(&path).unwrap();

        journal.record(&entry("accepted")).unwrap();
        journal.record(&entry("acquisition_timeout")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("\"trip_digest\":\"0123456789abcdef\""));

        let recent = journal.recent(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].outcome, "acquisition_timeout");
    }

    #[test]
    fn test_line_that_would_overflow_starts_new_generation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attempts.jsonl");
        // Room for exactly two lines.
        let mut journal = AttemptJournal::with_cap(&path, line_len() * 2).unwrap();

        journal.record(&entry("accepted")).unwrap();
        journal.record(&entry("accepted")).unwrap();
        assert!(!generation(&path, 1).exists());

        journal.record(&entry("accepted")).unwrap();
        assert!(generation(&path, 1).exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
        assert_eq!(
            std::fs::read_to_string(generation(&path, 1)).unwrap().lines().count(),
            2
        );
    }

    #[test]
    fn test_oldest_generation_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attempts.jsonl");
        let mut journal = AttemptJournal::with_cap(&path, 1).unwrap();

        for i in 0..(KEPT_GENERATIONS + 3) {
            journal.record(&entry(&format!("attempt-{i}"))).unwrap();
        }

        assert!(generation(&path, KEPT_GENERATIONS).exists());
        assert!(!generation(&path, KEPT_GENERATIONS + 1).exists());
        let newest_rolled = std::fs::read_to_string(generation(&path, 1)).unwrap();
        assert!(newest_rolled.contains(&format!("attempt-{}", KEPT_GENERATIONS + 1)));
    }

    #[test]
    fn test_reopen_continues_size_accounting() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attempts.jsonl");
        {
            let mut journal = AttemptJournal::with_cap(&path, line_len()).unwrap();
            journal.record(&entry("accepted")).unwrap();
        }
        let mut journal = AttemptJournal::with_cap(&path, line_len()).unwrap();
        journal.record(&entry("accepted")).unwrap();
        assert!(generation(&path, 1).exists());
    }

    #[test]
    fn test_generation_naming() {
        let base = PathBuf::from("/tmp/attempts.jsonl");
        assert_eq!(generation(&base, 2), PathBuf::from("/tmp/attempts.jsonl.2"));
    }
}
