//! Run results
//!
//! A [`RunReport`] is threaded through one run and accumulates the outcome of
//! every acquisition plus every collected failure. It is printed as a summary
//! at the end of the run.

use crate::error::ImportError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of importing one acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// New catalog file row
    Imported { file_id: i64, path: String },
    /// A catalog file already exists at the canonical path
    Skipped { path: String },
}

/// One collected per-item failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Human-readable failure, nested for grouped failures
    pub message: String,

    /// Number of underlying failures
    pub count: usize,

    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Acquisitions newly catalogued (or chunked, for chunking runs)
    pub imported: usize,

    /// Acquisitions already in the catalog
    pub ignored: usize,

    pub failures: Vec<FailureRecord>,

    /// Channel type names missing from the catalog vocabulary
    pub unknown_channel_types: BTreeSet<String>,

    /// Channel status names missing from the catalog vocabulary
    pub unknown_status_types: BTreeSet<String>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            imported: 0,
            ignored: 0,
            failures: Vec::new(),
            unknown_channel_types: BTreeSet::new(),
            unknown_status_types: BTreeSet::new(),
        }
    }

    pub fn record_outcome(&mut self, outcome: &ImportOutcome) {
        match outcome {
            ImportOutcome::Imported { .. } => self.imported += 1,
            ImportOutcome::Skipped { .. } => self.ignored += 1,
        }
    }

    pub fn record_failure(&mut self, error: &ImportError) {
        warn!(run_id = %self.run_id, "{}", error);
        self.failures.push(FailureRecord {
            message: error.to_string(),
            count: error.leaves().len(),
            occurred_at: Utc::now(),
        });
    }

    pub fn note_unknown_channel_type(&mut self, name: &str) {
        if self.unknown_channel_types.insert(name.to_string()) {
            warn!(channel_type = %name, "Channel type is not in the catalog");
        }
    }

    pub fn note_unknown_status_type(&mut self, name: &str) {
        if self.unknown_status_types.insert(name.to_string()) {
            warn!(status = %name, "Channel status is not in the catalog");
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Total number of underlying failures
    pub fn failure_count(&self) -> usize {
        self.failures.iter().map(|f| f.count).sum()
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
        info!(
            run_id = %self.run_id,
            imported = self.imported,
            ignored = self.ignored,
            failures = self.failure_count(),
            "Run finished"
        );
    }

    /// Plain-text summary for the terminal
    pub fn summary(&self) -> String {
        let mut text = format!(
            "Run {}: {} imported, {} already imported, {} failure(s)",
            self.run_id,
            self.imported,
            self.ignored,
            self.failure_count()
        );

        for failure in &self.failures {
            let _ = write!(text, "\n- {}", failure.message.replace('\n', "\n  "));
        }

        if !self.unknown_channel_types.is_empty() {
            let names: Vec<&str> = self.unknown_channel_types.iter().map(String::as_str).collect();
            let _ = write!(text, "\nUnknown channel types: {}", names.join(", "));
        }
        if !self.unknown_status_types.is_empty() {
            let names: Vec<&str> = self.unknown_status_types.iter().map(String::as_str).collect();
            let _ = write!(text, "\nUnknown channel statuses: {}", names.join(", "));
        }

        text
    }
}
