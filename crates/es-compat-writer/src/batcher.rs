//! Batch accumulation
//!
//! Appending and checking the thresholds happen under one lock, so with
//! concurrent producers a batch never exceeds the action threshold and
//! exactly one producer sees it fill.

use es_compat_core::prelude::*;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

use crate::operation::BulkOperation;

/// Operations in server slot order plus their rendered NDJSON
#[derive(Debug, Default)]
pub struct Batch {
    pub ops: Vec<BulkOperation>,
    pub payload: String,
    opened: Option<Instant>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }

    /// Time since the first operation was added
    pub fn age(&self) -> Duration {
        self.opened.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn to_request(&self, timeout: Duration) -> BulkRequest {
        BulkRequest::new(self.payload.clone(), self.ops.len()).with_timeout(timeout)
    }
}

/// Accumulates operations until the count or byte threshold is reached
pub struct Batcher {
    current: Mutex<Batch>,
    max_actions: usize,
    max_bytes: usize,
}

impl Batcher {
    pub fn new(max_actions: usize, max_bytes: usize) -> Self {
        Self {
            current: Mutex::new(Batch::default()),
            max_actions: max_actions.max(1),
            max_bytes,
        }
    }

    /// Append one operation. Returns the full batch when this append
    /// reached a threshold; the caller owns flushing it.
    pub fn push(&self, op: BulkOperation, rendered: &str) -> Option<Batch> {
        let mut current = self.current.lock();
        if current.ops.is_empty() {
            current.opened = Some(Instant::now());
        }
        current.ops.push(op);
        current.payload.push_str(rendered);

        let full = current.ops.len() >= self.max_actions
            || (self.max_bytes > 0 && current.payload.len() >= self.max_bytes);
        full.then(|| std::mem::take(&mut *current))
    }

    /// Take whatever has accumulated, if anything
    pub fn take(&self) -> Option<Batch> {
        let mut current = self.current.lock();
        (!current.ops.is_empty()).then(|| std::mem::take(&mut *current))
    }

    pub fn len(&self) -> usize {
        self.current.lock().ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    fn op(n: usize) -> (BulkOperation, String) {
        let op = BulkOperation::index("i", n.to_string(), json!({"n": n}));
        let rendered = op.render(ProtocolVersion::V7_9).unwrap();
        (op, rendered)
    }

    #[test]
    fn test_count_threshold() {
        let batcher = Batcher::new(3, 0);
        for n in 0..2 {
            let (o, r) = op(n);
            assert!(batcher.push(o, &r).is_none());
        }
        let (o, r) = op(2);
        let batch = batcher.push(o, &r).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.payload.lines().count(), 6);
        assert!(batcher.is_empty());
        assert!(batcher.take().is_none());
    }

    #[test]
    fn test_byte_threshold() {
        let (o, r) = op(0);
        let batcher = Batcher::new(100, r.len() * 2);
        assert!(batcher.push(o.clone(), &r).is_none());
        assert_eq!(batcher.push(o, &r).unwrap().len(), 2);
    }

    #[test]
    fn test_concurrent_producers_never_overfill() {
        let batcher = Arc::new(Batcher::new(10, 0));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let batcher = batcher.clone();
                thread::spawn(move || {
                    let mut sizes = Vec::new();
                    for n in 0..25 {
                        let (o, r) = op(t * 100 + n);
                        if let Some(batch) = batcher.push(o, &r) {
                            sizes.push(batch.len());
                        }
                    }
                    sizes
                })
            })
            .collect();

        let sizes: Vec<usize> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        assert_eq!(sizes, vec![10; 10]);
        assert!(batcher.take().is_none());
    }
}
