//! # Checkpoint — Resumable Acquisition State
//!
//! Saves and loads the run's progress record as a JSON file so an interrupted
//! or crashed run resumes without re-requesting ranges it already finished.
//!
//! ## Atomic Writes
//!
//! The record is written to a `.tmp` sibling and renamed over the real file,
//! so a crash mid-write leaves the previous record intact.
//!
//! ## Tolerant Loads
//!
//! A missing file is a fresh start. A file that does not parse is logged and
//! also treated as a fresh start. Every field carries `#[serde(default)]`, so
//! records written by older or newer versions load with zeroes for whatever
//! they lack.

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunStats {
    pub successful: u64,
    pub skipped: u64,
    /// Outcomes that left the range unprocessed (eligible for a later run).
    pub failed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressRecord {
    /// Last page whose ranges were all dispatched.
    pub last_batch_number: u64,
    /// Ranges that must never be submitted again.
    pub processed_ranges: BTreeSet<String>,
    pub stats: RunStats,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub last_saved: Option<DateTime<Utc>>,
}

/// RFC 3339, or a naive ISO timestamp taken as UTC. Anything else is `None`.
fn lenient_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let Some(serde_json::Value::String(raw)) = Option::<serde_json::Value>::deserialize(d)? else {
        return Ok(None);
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    Ok(NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc()))
}

impl ProgressRecord {
    pub fn is_processed(&self, range_id: &str) -> bool {
        self.processed_ranges.contains(range_id)
    }

    /// Record a finished range. Returns false if it was already recorded.
    pub fn mark_processed(&mut self, range_id: &str) -> bool {
        self.processed_ranges.insert(range_id.to_string())
    }

    /// Advance the completed-page marker; never moves it backwards.
    pub fn complete_page(&mut self, page: u64) {
        self.last_batch_number = self.last_batch_number.max(page);
    }

    /// Any saved work counts, including ranges finished on a page that was
    /// cut off before it completed.
    pub fn is_resume(&self) -> bool {
        self.last_batch_number > 0
            || !self.processed_ranges.is_empty()
            || self.stats != RunStats::default()
    }
}

/// File-backed home of a `ProgressRecord`.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ProgressStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut p = self.path.as_os_str().to_os_string();
        p.push(".tmp");
        PathBuf::from(p)
    }

    /// Load the saved record, or an empty one if absent or unreadable.
    pub fn load(&self) -> ProgressRecord {
        match self.try_load() {
            Ok(Some(record)) => {
                info!(
                    path = %self.path.display(),
                    last_page = record.last_batch_number,
                    processed = record.processed_ranges.len(),
                    "loaded previous progress"
                );
                record
            }
            Ok(None) => {
                info!(path = %self.path.display(), "no previous progress found, starting fresh");
                ProgressRecord::default()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to load progress, starting fresh");
                ProgressRecord::default()
            }
        }
    }

    /// Strict load: `Ok(None)` when absent, `Err` when unreadable or malformed.
    pub fn try_load(&self) -> Result<Option<ProgressRecord>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Write the record atomically, stamping `last_saved`.
    pub fn save(&self, record: &mut ProgressRecord) -> Result<()> {
        record.last_saved = Some(Utc::now());
        let json = serde_json::to_string_pretty(record)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.tmp_path();
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Remove the record and any leftover temp file.
    pub fn clear(&self) -> Result<()> {
        let _ = fs::remove_file(self.tmp_path());
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
