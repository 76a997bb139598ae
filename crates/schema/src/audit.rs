//! Stage audit log: one entry per stage execution of a job.

use crate::stage::{FailureKind, StageKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageAuditEntry {
    /// Completion order within the job.
    pub seq: u64,
    pub stage: StageKind,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub failure_kind: Option<FailureKind>,
    pub message: Option<String>,
}

impl StageAuditEntry {
    pub fn new(
        stage: StageKind,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        failure: Option<(FailureKind, String)>,
    ) -> Self {
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
        let (failure_kind, message) = match failure {
            Some((kind, message)) => (Some(kind), Some(message)),
            None => (None, None),
        };

        Self {
            seq: 0,
            stage,
            started_at,
            completed_at,
            duration_ms,
            success: failure_kind.is_none(),
            failure_kind,
            message,
        }
    }
}

/// Collection of audit entries (written as JSONL).
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    entries: Vec<StageAuditEntry>,
    next_seq: u64,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, assigning the next sequence number.
    pub fn add(&mut self, mut entry: StageAuditEntry) {
        entry.seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[StageAuditEntry] {
        &self.entries
    }

    pub fn to_jsonl(&self) -> String {
        self.entries
            .iter()
            .filter_map(|e| serde_json::to_string(e).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn from_jsonl(content: &str) -> Result<Self, serde_json::Error> {
        let mut log = Self::new();
        for line in content.lines() {
            if !line.trim().is_empty() {
                let entry: StageAuditEntry = serde_json::from_str(line)?;
                log.entries.push(entry);
            }
        }
        if let Some(last) = log.entries.last() {
            log.next_seq = last.seq + 1;
        }
        Ok(log)
    }
}
