//! Bulk write pipeline
//!
//! ```text
//! add ──► Batcher ──(count | bytes | timer)──► execute ──► classify items
//!            ▲                                                  │
//!            └────────────── retryable items ───────────────────┘
//! ```
//!
//! Each batch is Accumulating in the [`Batcher`], Flushing while its request
//! runs, then Completed once every item is classified. Success and terminal
//! failure are final; terminal failures go to the [`FailureLog`] and are never
//! reported to the producer. Items the node rejected for overload are put
//! back into whichever batch is accumulating at that moment.
//!
//! Overload reported for the whole request is handled by [`RetryPolicy`]
//! backoff before any item is looked at.

use es_compat_client::Dispatcher;
use es_compat_core::config::BulkConfig;
use es_compat_core::metrics::BulkMetrics;
use es_compat_core::prelude::*;
use es_compat_core::response::BulkResponse;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::batcher::{Batch, Batcher};
use crate::classify::{classify_item, ItemOutcome};
use crate::failure_log::FailureLog;
use crate::operation::BulkOperation;
use crate::retry::RetryPolicy;

/// Outcome counts for one executed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub actions: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub failed: usize,
    pub took_ms: u64,
}

/// Hooks around every bulk request
pub trait BulkListener: Send + Sync {
    fn before_bulk(&self, _execution_id: Uuid, _actions: usize) {}

    fn after_bulk(&self, _execution_id: Uuid, _report: &BatchReport) {}

    /// The request itself failed after backoff
    fn on_failure(&self, _execution_id: Uuid, _error: &EsCompatError) {}
}

/// Default listener: reports through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingListener;

impl BulkListener for LoggingListener {
    fn before_bulk(&self, execution_id: Uuid, actions: usize) {
        trace!(%execution_id, actions, "Sending bulk request");
    }

    fn after_bulk(&self, execution_id: Uuid, report: &BatchReport) {
        debug!(
            %execution_id,
            actions = report.actions,
            succeeded = report.succeeded,
            retried = report.retried,
            failed = report.failed,
            took_ms = report.took_ms,
            "Bulk request completed"
        );
    }

    fn on_failure(&self, execution_id: Uuid, error: &EsCompatError) {
        error!(%execution_id, error = %error, "Bulk request failed");
    }
}

#[derive(Debug, Default)]
struct BulkStats {
    flushes: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    request_failures: AtomicU64,
}

/// Point-in-time copy of the pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub flushes: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub failed: u64,
    pub request_failures: u64,
}

impl BulkStats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            flushes: self.flushes.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            request_failures: self.request_failures.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    dispatcher: Dispatcher,
    version: ProtocolVersion,
    batcher: Batcher,
    retry: RetryPolicy,
    /// Resubmissions allowed per operation before it counts as terminal
    max_resubmits: u32,
    permits: Semaphore,
    in_flight: AtomicUsize,
    idle: Notify,
    listener: Arc<dyn BulkListener>,
    stats: BulkStats,
    failures: FailureLog,
    metrics: BulkMetrics,
    timeout: Duration,
}

impl Shared {
    fn enqueue(self: &Arc<Self>, op: BulkOperation, rendered: &str) {
        if let Some(batch) = self.batcher.push(op, rendered) {
            self.launch(batch);
        }
        self.metrics.set_pending(self.batcher.len());
    }

    fn launch(self: &Arc<Self>, batch: Batch) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let shared = self.clone();
        tokio::spawn(async move {
            shared.execute(batch).await;
            if shared.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                shared.idle.notify_waiters();
            }
        });
    }

    async fn execute(self: &Arc<Self>, batch: Batch) {
        let execution_id = Uuid::now_v7();
        let Ok(_permit) = self.permits.acquire().await else {
            for op in &batch.ops {
                self.fail(op, EsCompatError::terminal_write(&op.id, "pipeline shut down"), execution_id);
            }
            return;
        };

        let actions = batch.len();
        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        self.listener.before_bulk(execution_id, actions);
        trace!(%execution_id, actions, bytes = batch.size_bytes(), age_ms = batch.age().as_millis() as u64, "Flushing batch");

        let request = batch.to_request(self.timeout);
        let dispatcher = self.dispatcher.clone();
        let started = Instant::now();
        let result = self
            .retry
            .run("bulk", || {
                let dispatcher = dispatcher.clone();
                let request = request.clone();
                async move { dispatcher.bulk(request).await }
            })
            .await;
        let took = started.elapsed();
        self.metrics.record_bulk_latency(took);

        match result {
            Ok(response) => {
                self.metrics.record_bulk_request("ok");
                let mut report = self.settle(batch.ops, response, execution_id);
                report.took_ms = took.as_millis() as u64;
                self.listener.after_bulk(execution_id, &report);
            }
            Err(err) => {
                self.metrics.record_bulk_request("error");
                self.stats.request_failures.fetch_add(1, Ordering::Relaxed);
                self.listener.on_failure(execution_id, &err);
                let retryable = err.is_retryable();
                for op in batch.ops {
                    if retryable {
                        let cause = EsCompatError::retryable_write(&op.id, err.to_string());
                        self.resubmit(op, &cause, execution_id);
                    } else {
                        let cause = EsCompatError::terminal_write(&op.id, err.to_string());
                        self.fail(&op, cause, execution_id);
                    }
                }
            }
        }
    }

    /// Classify every item; items line up with operations by position
    fn settle(
        self: &Arc<Self>,
        ops: Vec<BulkOperation>,
        response: BulkResponse,
        execution_id: Uuid,
    ) -> BatchReport {
        let mut report = BatchReport {
            actions: ops.len(),
            ..Default::default()
        };
        if response.items.len() != ops.len() {
            warn!(
                %execution_id,
                sent = ops.len(),
                received = response.items.len(),
                "Bulk response item count mismatch"
            );
        }

        let mut items = response.items.iter();
        for op in ops {
            let outcome = match items.next() {
                Some(item) => classify_item(item),
                None => ItemOutcome::Terminal("no result returned for operation".to_string()),
            };
            match outcome.into_error(&op.id) {
                None => report.succeeded += 1,
                Some(cause @ EsCompatError::RetryableWrite { .. }) => {
                    if self.resubmit(op, &cause, execution_id) {
                        report.retried += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                Some(cause) => {
                    self.fail(&op, cause, execution_id);
                    report.failed += 1;
                }
            }
        }

        self.stats
            .succeeded
            .fetch_add(report.succeeded as u64, Ordering::Relaxed);
        self.metrics.record_written(report.succeeded as u64);
        report
    }

    /// Put `op` back into the accumulating batch. False when it has used up
    /// its resubmissions and was logged as failed instead.
    fn resubmit(
        self: &Arc<Self>,
        mut op: BulkOperation,
        cause: &EsCompatError,
        execution_id: Uuid,
    ) -> bool {
        if op.attempts >= self.max_resubmits {
            let reason = format!("gave up after {} attempts, last: {cause}", op.attempts + 1);
            self.fail(&op, EsCompatError::terminal_write(&op.id, reason), execution_id);
            return false;
        }
        op.attempts += 1;
        match op.render(self.version) {
            Ok(rendered) => {
                debug!(id = %op.id, attempt = op.attempts, cause = %cause, "Resubmitting rejected write");
                self.stats.retried.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_retried(1);
                self.enqueue(op, &rendered);
                true
            }
            Err(e) => {
                let cause = EsCompatError::terminal_write(&op.id, e.to_string());
                self.fail(&op, cause, execution_id);
                false
            }
        }
    }

    fn fail(&self, op: &BulkOperation, cause: EsCompatError, execution_id: Uuid) {
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_failed(1);
        self.failures.record(op, &cause, execution_id);
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Flush until nothing is accumulated or in flight, resubmissions included
    async fn drain(self: &Arc<Self>) {
        loop {
            if let Some(batch) = self.batcher.take() {
                self.launch(batch);
            }
            self.wait_idle().await;
            if self.batcher.is_empty() && self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
        }
    }
}

fn spawn_ticker(shared: Weak<Shared>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            if let Some(batch) = shared.batcher.take() {
                trace!(actions = batch.len(), "Interval flush");
                shared.launch(batch);
            }
        }
    })
}

/// Batched, fire-and-forget writes with selective retry
pub struct BulkPipeline {
    shared: Arc<Shared>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    drain_timeout: Duration,
}

impl BulkPipeline {
    /// Must be called inside a Tokio runtime
    pub fn new(dispatcher: Dispatcher, config: &BulkConfig) -> Self {
        Self::with_listener(dispatcher, config, Arc::new(LoggingListener))
    }

    pub fn with_listener(
        dispatcher: Dispatcher,
        config: &BulkConfig,
        listener: Arc<dyn BulkListener>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.backoff);
        let shared = Arc::new(Shared {
            version: dispatcher.version(),
            dispatcher,
            batcher: Batcher::new(config.actions, config.max_bytes),
            max_resubmits: retry.max_attempts,
            retry,
            permits: Semaphore::new(config.concurrency.max(1)),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            listener,
            stats: BulkStats::default(),
            failures: FailureLog::new(config.failure_log_size),
            metrics: BulkMetrics::new("bulk_pipeline"),
            timeout: config.timeout,
        });
        let ticker = config
            .flush_interval
            .filter(|every| !every.is_zero())
            .map(|every| spawn_ticker(Arc::downgrade(&shared), every));

        info!(
            version = %shared.version,
            actions = config.actions,
            max_bytes = config.max_bytes,
            concurrency = config.concurrency,
            flush_interval = ?config.flush_interval,
            "Bulk pipeline started"
        );
        Self {
            shared,
            ticker: Mutex::new(ticker),
            closed: AtomicBool::new(false),
            drain_timeout: config.drain_timeout(),
        }
    }

    /// Queue one operation. Shape errors are returned here; everything after
    /// acceptance is reported only through the failure log.
    pub fn add(&self, op: BulkOperation) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EsCompatError::Shutdown);
        }
        let violations = op.violations(self.shared.version);
        if !violations.is_empty() {
            return Err(EsCompatError::validation(violations));
        }
        let rendered = op.render(self.shared.version)?;
        self.shared.enqueue(op, &rendered);
        Ok(())
    }

    /// Send what has accumulated and wait for every in-flight request.
    /// Operations resubmitted meanwhile stay queued for the next flush.
    pub async fn flush(&self) -> Result<()> {
        if let Some(batch) = self.shared.batcher.take() {
            self.shared.launch(batch);
        }
        self.shared.wait_idle().await;
        self.shared.metrics.set_pending(self.shared.batcher.len());
        Ok(())
    }

    /// Stop accepting writes, drain within the configured bound, then
    /// release the dispatcher
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }

        match tokio::time::timeout(self.drain_timeout, self.shared.drain()).await {
            Ok(()) => info!(stats = ?self.stats(), "Bulk pipeline drained"),
            Err(_) => warn!(
                pending = self.pending(),
                in_flight = self.in_flight(),
                timeout_ms = self.drain_timeout.as_millis() as u64,
                "Bulk pipeline drain timed out"
            ),
        }
        self.shared.dispatcher.close()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn version(&self) -> ProtocolVersion {
        self.shared.version
    }

    /// Operations accumulated but not yet sent
    pub fn pending(&self) -> usize {
        self.shared.batcher.len()
    }

    /// Batches currently executing
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn failures(&self) -> &FailureLog {
        &self.shared.failures
    }
}

impl Drop for BulkPipeline {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use es_compat_client::MockTransport;
    use es_compat_core::config::BackoffConfig;
    use serde_json::{json, Map, Value};
    use std::collections::HashMap;

    /// `(action, id)` of every action line in an NDJSON bulk body
    fn actions_of(req: &WireRequest) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut lines = req.body.as_deref().unwrap_or("").lines();
        while let Some(line) = lines.next() {
            let value: Value = serde_json::from_str(line).unwrap();
            let (action, meta) = value.as_object().unwrap().iter().next().unwrap();
            out.push((action.clone(), meta["_id"].as_str().unwrap().to_string()));
            if action != "delete" {
                lines.next();
            }
        }
        out
    }

    fn bulk_body(items: Vec<(String, String, u16, Option<Value>)>) -> String {
        let items: Vec<Value> = items
            .into_iter()
            .map(|(action, id, status, error)| {
                let mut result = json!({"_index": "i", "_id": id, "status": status});
                if let Some(error) = error {
                    result["error"] = error;
                }
                let mut item = Map::new();
                item.insert(action, result);
                Value::Object(item)
            })
            .collect();
        json!({"took": 1, "errors": false, "items": items}).to_string()
    }

    fn config(actions: usize) -> BulkConfig {
        BulkConfig {
            actions,
            backoff: BackoffConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
            },
            ..Default::default()
        }
    }

    fn dispatcher(mock: Arc<MockTransport>) -> Dispatcher {
        Dispatcher::with_transport(mock, ProtocolVersion::V7_9, FilterPipeline::default())
    }

    fn doc(n: usize) -> BulkOperation {
        BulkOperation::index("i", n.to_string(), json!({"n": n}))
    }

    #[tokio::test]
    async fn test_count_threshold_splits_2500_into_three_flushes() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let seen = sizes.clone();
        let mock = Arc::new(MockTransport::new(move |req| {
            let actions = actions_of(req);
            seen.lock().push(actions.len());
            let items = actions.into_iter().map(|(a, id)| (a, id, 201, None)).collect();
            Ok(RawResponse::json(200, bulk_body(items)))
        }));
        let pipeline = BulkPipeline::new(dispatcher(mock.clone()), &config(1000));

        for n in 0..2500 {
            pipeline.add(doc(n)).unwrap();
        }
        pipeline.close().await.unwrap();

        let mut sizes = sizes.lock().clone();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![500, 1000, 1000]);
        let stats = pipeline.stats();
        assert_eq!(stats.flushes, 3);
        assert_eq!(stats.succeeded, 2500);
        assert_eq!(stats.retried, 0);
        assert_eq!(mock.close_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_item_reappears_and_terminal_item_does_not() {
        let sightings: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
        let seen = sightings.clone();
        let mock = Arc::new(MockTransport::new(move |req| {
            let mut seen = seen.lock();
            let items = actions_of(req)
                .into_iter()
                .map(|(action, id)| {
                    let count = seen.entry(id.clone()).or_insert(0);
                    *count += 1;
                    match (id.as_str(), *count) {
                        ("r", 1) => (action, id, 429, Some(json!({
                            "type": "es_rejected_execution_exception",
                            "reason": "rejected execution of bulk shard request"
                        }))),
                        ("t", _) => (action, id, 400, Some(json!({
                            "type": "mapper_parsing_exception",
                            "reason": "failed to parse field [n]"
                        }))),
                        _ => (action, id, 201, None),
                    }
                })
                .collect();
            Ok(RawResponse::json(200, bulk_body(items)))
        }));
        let pipeline = BulkPipeline::new(dispatcher(mock.clone()), &config(1000));

        for id in ["ok", "r", "t"] {
            pipeline
                .add(BulkOperation::index("i", id, json!({"v": id})))
                .unwrap();
        }
        pipeline.flush().await.unwrap();
        assert_eq!(pipeline.pending(), 1);
        assert_eq!(pipeline.failures().len(), 1);
        assert_eq!(pipeline.failures().peek(1)[0].id, "t");

        pipeline.flush().await.unwrap();
        pipeline.flush().await.unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(actions_of(&requests[1]), vec![("index".to_string(), "r".to_string())]);

        let sightings = sightings.lock();
        assert_eq!(sightings["r"], 2);
        assert_eq!(sightings["t"], 1);

        let stats = pipeline.stats();
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_persistent_rejection_gives_up() {
        let mock = Arc::new(MockTransport::new(|req| {
            let items = actions_of(req)
                .into_iter()
                .map(|(a, id)| (a, id, 429, None))
                .collect();
            Ok(RawResponse::json(200, bulk_body(items)))
        }));
        let pipeline = BulkPipeline::new(dispatcher(mock.clone()), &config(10));
        pipeline.add(doc(1)).unwrap();
        pipeline.close().await.unwrap();

        // One original attempt plus three resubmissions
        assert_eq!(mock.request_count(), 4);
        let failures = pipeline.failures().drain();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].attempts, 4);
        assert!(failures[0].reason.starts_with("gave up after 4 attempts"));
        assert!(failures[0].reason.contains("Retryable write failure for '1'"));
    }

    #[tokio::test]
    async fn test_whole_request_overload_backs_off() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mock = Arc::new(MockTransport::new(move |req| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(RawResponse::json(
                    429,
                    r#"{"error":{"type":"es_rejected_execution_exception","reason":"queue full"},"status":429}"#,
                ));
            }
            let items = actions_of(req)
                .into_iter()
                .map(|(a, id)| (a, id, 201, None))
                .collect();
            Ok(RawResponse::json(200, bulk_body(items)))
        }));
        let pipeline = BulkPipeline::new(dispatcher(mock), &config(2));
        pipeline.add(doc(1)).unwrap();
        pipeline.add(doc(2)).unwrap();
        pipeline.flush().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let stats = pipeline.stats();
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.request_failures, 0);
    }

    #[tokio::test]
    async fn test_request_failure_logs_all_items() {
        let mock = Arc::new(MockTransport::fixed(
            400,
            r#"{"error":{"type":"illegal_argument_exception","reason":"bad"},"status":400}"#,
        ));
        let pipeline = BulkPipeline::new(dispatcher(mock), &config(10));
        pipeline.add(doc(1)).unwrap();
        pipeline.add(doc(2)).unwrap();
        pipeline.flush().await.unwrap();

        assert_eq!(pipeline.failures().len(), 2);
        assert_eq!(pipeline.stats().request_failures, 1);
        assert_eq!(pipeline.pending(), 0);
    }

    #[tokio::test]
    async fn test_interval_flushes_partial_batch() {
        let mock = Arc::new(MockTransport::new(|req| {
            let items = actions_of(req)
                .into_iter()
                .map(|(a, id)| (a, id, 201, None))
                .collect();
            Ok(RawResponse::json(200, bulk_body(items)))
        }));
        let mut cfg = config(1000);
        cfg.flush_interval = Some(Duration::from_millis(20));
        let pipeline = BulkPipeline::new(dispatcher(mock.clone()), &cfg);

        pipeline.add(doc(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        pipeline.flush().await.unwrap();

        assert_eq!(mock.request_count(), 1);
        assert_eq!(pipeline.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn test_add_validates_and_rejects_after_close() {
        let mock = Arc::new(MockTransport::empty());
        let pipeline = BulkPipeline::new(
            Dispatcher::with_transport(mock, ProtocolVersion::V5_6, FilterPipeline::default()),
            &config(10),
        );

        let err = pipeline.add(BulkOperation::index("i", "1", json!({}))).unwrap_err();
        assert!(matches!(err, EsCompatError::Validation { .. }));

        pipeline.close().await.unwrap();
        let err = pipeline
            .add(BulkOperation::index("i", "1", json!({})).with_type("t"))
            .unwrap_err();
        assert!(matches!(err, EsCompatError::Shutdown));
    }

    #[derive(Default)]
    struct Counting {
        before: AtomicUsize,
        after: AtomicUsize,
    }

    impl BulkListener for Counting {
        fn before_bulk(&self, _execution_id: Uuid, _actions: usize) {
            self.before.fetch_add(1, Ordering::SeqCst);
        }

        fn after_bulk(&self, _execution_id: Uuid, report: &BatchReport) {
            assert_eq!(report.actions, report.succeeded);
            self.after.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_listener_sees_every_batch() {
        let mock = Arc::new(MockTransport::new(|req| {
            let items = actions_of(req)
                .into_iter()
                .map(|(a, id)| (a, id, 201, None))
                .collect();
            Ok(RawResponse::json(200, bulk_body(items)))
        }));
        let listener = Arc::new(Counting::default());
        let pipeline = BulkPipeline::with_listener(dispatcher(mock), &config(5), listener.clone());
        for n in 0..12 {
            pipeline.add(doc(n)).unwrap();
        }
        pipeline.close().await.unwrap();

        assert_eq!(listener.before.load(Ordering::SeqCst), 3);
        assert_eq!(listener.after.load(Ordering::SeqCst), 3);
    }
}
