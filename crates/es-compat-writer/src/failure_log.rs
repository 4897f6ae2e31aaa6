//! Bounded log of terminal write failures
//!
//! Writes are fire-and-forget, so this is the only place a caller can see
//! which documents were dropped.

use chrono::{DateTime, Utc};
use es_compat_core::prelude::*;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::operation::BulkOperation;

#[derive(Debug, Clone, Serialize)]
pub struct FailureEntry {
    pub index: String,
    pub id: String,
    pub action: &'static str,
    pub reason: String,
    pub attempts: u32,
    pub execution_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

pub struct FailureLog {
    entries: Mutex<VecDeque<FailureEntry>>,
    max_size: usize,
    total: AtomicU64,
}

impl FailureLog {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_size,
            total: AtomicU64::new(0),
        }
    }

    pub fn record(&self, op: &BulkOperation, error: &EsCompatError, execution_id: Uuid) {
        let reason = match error {
            EsCompatError::TerminalWrite { reason, .. } => reason.clone(),
            other => other.to_string(),
        };
        let entry = FailureEntry {
            index: op.index.clone(),
            id: op.id.clone(),
            action: op.action(),
            reason,
            attempts: op.attempts + 1,
            execution_id,
            timestamp: Utc::now(),
        };
        warn!(
            index = %entry.index,
            id = %entry.id,
            action = entry.action,
            reason = %entry.reason,
            "Dropped write after terminal failure"
        );

        self.total.fetch_add(1, Ordering::Relaxed);
        if self.max_size == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_size {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Failures ever recorded, including ones pushed out of the window
    pub fn total_recorded(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn peek(&self, count: usize) -> Vec<FailureEntry> {
        self.entries.lock().iter().take(count).cloned().collect()
    }

    pub fn drain(&self) -> Vec<FailureEntry> {
        self.entries.lock().drain(..).collect()
    }

    /// Append the retained entries to `path` as NDJSON, oldest first
    pub async fn persist(&self, path: impl AsRef<Path>) -> Result<usize> {
        let entries = self.drain();
        if entries.is_empty() {
            return Ok(0);
        }

        let mut out = String::new();
        for entry in &entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| EsCompatError::Internal(format!("failed to render failure: {e}")))?;
            out.push_str(&line);
            out.push('\n');
        }

        let path = path.as_ref();
        let io_error = |e: std::io::Error| {
            EsCompatError::Internal(format!("failed to write {}: {e}", path.display()))
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(io_error)?;
        file.write_all(out.as_bytes()).await.map_err(io_error)?;
        file.flush().await.map_err(io_error)?;

        info!(path = %path.display(), count = entries.len(), "Persisted write failures");
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bounded_window_keeps_newest() {
        let log = FailureLog::new(2);
        let id = Uuid::now_v7();
        for n in 0..3 {
            let op = BulkOperation::delete("i", n.to_string());
            log.record(&op, &EsCompatError::terminal_write(&op.id, "boom"), id);
        }
        assert_eq!(log.len(), 2);
        assert_eq!(log.total_recorded(), 3);
        let ids: Vec<_> = log.peek(10).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_persist_appends_ndjson() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failures.ndjson");
        let log = FailureLog::new(10);
        log.record(
            &BulkOperation::index("books", "7", json!({})),
            &EsCompatError::terminal_write("7", "mapper_parsing_exception"),
            Uuid::now_v7(),
        );

        assert_eq!(log.persist(&path).await.unwrap(), 1);
        assert_eq!(log.persist(&path).await.unwrap(), 0);

        let written = std::fs::read_to_string(&path).unwrap();
        let entry: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
        assert_eq!(entry["id"], "7");
        assert_eq!(entry["action"], "index");
        assert_eq!(entry["attempts"], 1);
        assert_eq!(entry["reason"], "mapper_parsing_exception");
        assert!(log.is_empty());
    }
}
