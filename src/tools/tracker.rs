//! Short-lived record of direct tool executions, bounded in size and age.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::error::GhostError;
use crate::util::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolExecution {
    pub id: String,
    pub tool: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
}

struct Entry {
    inserted: Instant,
    exec: ToolExecution,
}

/// LRU of executions. Entries older than `ttl` read as missing and are
/// dropped by `sweep`; past capacity the least recently touched goes first.
#[derive(Clone)]
pub struct ExecutionTracker {
    inner: Arc<Mutex<LruCache<String, Entry>>>,
    ttl: Duration,
}

impl ExecutionTracker {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { inner: Arc::new(Mutex::new(LruCache::new(cap))), ttl }
    }

    /// Record a new running execution and return its id.
    pub fn start(&self, tool: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let exec = ToolExecution {
            id: id.clone(),
            tool: tool.to_string(),
            status: ExecutionStatus::Running,
            result: None,
            error: None,
            started_at: now_ms(),
            finished_at: None,
        };
        self.inner.lock().put(id.clone(), Entry { inserted: Instant::now(), exec });
        id
    }

    /// Store the outcome. A no-op if the entry was already evicted.
    pub fn finish(&self, id: &str, outcome: Result<&serde_json::Value, &GhostError>) -> Option<ToolExecution> {
        let mut inner = self.inner.lock();
        let entry = inner.get_mut(id)?;
        let exec = &mut entry.exec;
        match outcome {
            Ok(v) => {
                exec.status = ExecutionStatus::Succeeded;
                exec.result = Some(v.clone());
            }
            Err(e) => {
                exec.status = ExecutionStatus::Failed;
                exec.error = Some(e.to_string());
            }
        }
        exec.finished_at = Some(now_ms());
        Some(exec.clone())
    }

    pub fn get(&self, id: &str) -> Option<ToolExecution> {
        let mut inner = self.inner.lock();
        let expired = inner.peek(id).map(|e| e.inserted.elapsed() >= self.ttl)?;
        if expired {
            inner.pop(id);
            return None;
        }
        inner.get(id).map(|e| e.exec.clone())
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut inner = self.inner.lock();
        let stale: Vec<String> = inner
            .iter()
            .filter(|(_, e)| e.inserted.elapsed() >= self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &stale {
            inner.pop(k);
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_success_and_failure() {
        let t = ExecutionTracker::new(8, Duration::from_secs(60));
        let ok = t.start("zapier_trigger");
        let bad = t.start("telegram_send_message");
        assert_eq!(t.get(&ok).unwrap().status, ExecutionStatus::Running);

        t.finish(&ok, Ok(&serde_json::json!({"status": 200})));
        t.finish(&bad, Err(&GhostError::ToolFailed("boom".into())));

        let ok = t.get(&ok).unwrap();
        assert_eq!(ok.status, ExecutionStatus::Succeeded);
        assert!(ok.finished_at.is_some());
        let bad = t.get(&bad).unwrap();
        assert_eq!(bad.status, ExecutionStatus::Failed);
        assert!(bad.error.unwrap().contains("boom"));
    }

    #[test]
    fn capacity_evicts_least_recent() {
        let t = ExecutionTracker::new(2, Duration::from_secs(60));
        let a = t.start("a");
        let _b = t.start("b");
        let _c = t.start("c");
        assert_eq!(t.len(), 2);
        assert!(t.get(&a).is_none());
    }

    #[test]
    fn expired_entries_vanish() {
        let t = ExecutionTracker::new(8, Duration::ZERO);
        let id = t.start("x");
        t.start("y");
        assert!(t.get(&id).is_none());
        assert_eq!(t.sweep(), 1);
        assert!(t.is_empty());
    }
}
