//! Request dispatcher
//!
//! Every call goes through the same stages:
//!
//! ```text
//! validate ──► to_wire ──► translate ──► perform ──► classify ──► decode
//! ```
//!
//! Validation and translation failures return before any I/O. A non-2xx
//! response becomes a [`EsCompatError::Status`] unless the action tolerates
//! that status and its body decodes; a failed secondary decode surfaces the
//! status error, never the decode error.

use async_trait::async_trait;
use es_compat_core::action::ClearScrollResult;
use es_compat_core::decode;
use es_compat_core::metrics::{DispatcherMetrics, LatencyTimer};
use es_compat_core::prelude::*;
use es_compat_core::response::{BulkResponse, DeleteResult, GetResult, PingInfo};
use futures::Stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::cache::{ConnectionKey, SharedCache};
use crate::transport::{Connector, TransportSettings};

/// Where a dispatcher gets its connection from
pub(crate) enum Lease {
    /// Looked up in the shared cache on every call, so an evicted
    /// connection is transparently replaced
    Shared {
        key: ConnectionKey,
        cache: SharedCache,
        settings: TransportSettings,
        connector: Arc<dyn Connector>,
    },
    /// Private connection closed with the dispatcher
    Owned(SharedTransport),
}

impl Lease {
    fn resolve(&self) -> Result<SharedTransport> {
        match self {
            Self::Shared {
                key,
                cache,
                settings,
                connector,
            } => cache.get_or_create(key, &|| connector.connect(settings)),
            Self::Owned(transport) => Ok(transport.clone()),
        }
    }
}

struct Inner {
    version: ProtocolVersion,
    pipeline: FilterPipeline,
    lease: Lease,
    request_timeout: Duration,
    metrics: DispatcherMetrics,
    closed: AtomicBool,
}

/// Version-aware client. Clones share one state.
///
/// Every call runs under a client-side deadline of `request_timeout`. When it
/// expires the in-flight transport future is dropped, which abandons the HTTP
/// exchange, and the call fails with [`EsCompatError::Timeout`]. The cluster
/// may still complete the work; searches also carry the same value as their
/// server-side `timeout` so the node stops on its own.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub(crate) fn new(
        lease: Lease,
        version: ProtocolVersion,
        pipeline: FilterPipeline,
        request_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                version,
                pipeline,
                lease,
                request_timeout,
                metrics: DispatcherMetrics::new(version.as_str()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Dispatcher that owns `transport` outright
    pub fn with_transport(
        transport: SharedTransport,
        version: ProtocolVersion,
        pipeline: FilterPipeline,
    ) -> Self {
        Self::new(
            Lease::Owned(transport),
            version,
            pipeline,
            Duration::from_millis(120_000),
        )
    }

    pub fn version(&self) -> ProtocolVersion {
        self.inner.version
    }

    pub fn pipeline(&self) -> &FilterPipeline {
        &self.inner.pipeline
    }

    /// Client-side deadline applied to every call
    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    /// True when the connection lives in the shared cache
    pub fn is_shared(&self) -> bool {
        matches!(self.inner.lease, Lease::Shared { .. })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Validate and translate without sending
    pub fn prepare<R: ActionRequest>(&self, request: &R) -> Result<WireRequest> {
        let version = self.inner.version;
        let mut violations = request.validate();
        // The type field no longer exists in the newest protocol
        if version.is_newest() {
            violations.retain(|v| *v != Violation::MissingType);
        }
        if !violations.is_empty() {
            return Err(EsCompatError::validation(violations));
        }

        let canonical = request.to_wire(version)?;
        self.inner.pipeline.translate(&canonical, version)
    }

    /// Run `request` through the full pipeline
    pub async fn execute<R: ActionRequest>(&self, request: &R) -> Result<R::Response> {
        let action = request.name();
        if self.is_closed() {
            return Err(EsCompatError::Shutdown);
        }

        let metrics = &self.inner.metrics;
        metrics.record_request(action);
        let timer_metrics = metrics.clone();
        let _timer = LatencyTimer::start(move |d| timer_metrics.record_latency(action, d));

        let result = self.run(request).await;
        if let Err(e) = &result {
            metrics.record_error(action, error_kind(e));
            debug!(action, version = %self.inner.version, error = %e, "Request failed");
        }
        result
    }

    async fn run<R: ActionRequest>(&self, request: &R) -> Result<R::Response> {
        let action = request.name();
        let version = self.inner.version;
        let wire = self.prepare(request)?;
        let transport = self.inner.lease.resolve()?;

        trace!(action, method = %wire.method, endpoint = %wire.endpoint, "Dispatching");
        // Expiry drops the transport future; the exchange is abandoned, not awaited
        let raw = tokio::time::timeout(self.inner.request_timeout, transport.perform(&wire))
            .await
            .map_err(|_| {
                EsCompatError::timeout(
                    format!("{} {}", wire.method, wire.endpoint),
                    self.inner.request_timeout.as_millis() as u64,
                )
            })??;

        if raw.is_success() {
            return request.decode(&raw, version);
        }

        let status_error = EsCompatError::Status {
            status: raw.status,
            detail: decode::server_error(&raw),
            body: raw.body.clone(),
        };
        if !request.tolerated_statuses().contains(&raw.status) {
            return Err(status_error);
        }

        match request.decode(&raw, version) {
            Ok(response) => {
                self.inner.metrics.record_tolerated(action, raw.status);
                Ok(response)
            }
            Err(decode_error) => {
                debug!(action, status = raw.status, error = %decode_error, "Tolerated status did not decode");
                Err(status_error)
            }
        }
    }

    /// Run `request` in the background; `callback` is invoked exactly once
    /// with the outcome, from the runtime's worker pool.
    pub fn submit<R, F>(&self, request: R, callback: F) -> JoinHandle<()>
    where
        R: ActionRequest + 'static,
        F: FnOnce(Result<R::Response>) + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            let result = this.execute(&request).await;
            callback(result);
        })
    }

    // ------------------------------------------------------------------------
    // Convenience operations
    // ------------------------------------------------------------------------

    pub async fn search(&self, mut request: SearchRequest) -> Result<CanonicalResult> {
        if request.timeout.is_none() {
            request.timeout = Some(self.inner.request_timeout);
        }
        self.execute(&request).await
    }

    /// Next page of an open cursor
    pub async fn scroll(
        &self,
        scroll_id: impl Into<String>,
        keep_alive: Duration,
    ) -> Result<CanonicalResult> {
        self.execute(&ScrollRequest::new(scroll_id, keep_alive)).await
    }

    pub async fn clear_scroll(&self, scroll_ids: Vec<String>) -> Result<ClearScrollResult> {
        self.execute(&ClearScrollRequest { scroll_ids }).await
    }

    /// Hit count only
    pub async fn count(&self, request: SearchRequest) -> Result<TotalHits> {
        let result = self.search(request.into_count()).await?;
        Ok(result.total)
    }

    /// Fetch by id; a missing document is `found: false`, not an error
    pub async fn get(&self, request: GetRequest) -> Result<GetResult> {
        self.execute(&request).await
    }

    pub async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult> {
        self.execute(&request).await
    }

    pub async fn bulk(&self, request: BulkRequest) -> Result<BulkResponse> {
        self.execute(&request).await
    }

    pub async fn ping(&self) -> Result<PingInfo> {
        self.execute(&PingRequest).await
    }

    /// Every page of a scrolled search, in order. Ends at the first page with
    /// zero hits; the cursor is then cleared on a best-effort basis.
    pub fn scroll_stream(
        &self,
        request: SearchRequest,
        keep_alive: Duration,
    ) -> impl Stream<Item = Result<CanonicalResult>> + Send + 'static {
        let this = self.clone();
        async_stream::try_stream! {
            let mut page = this.search(request.with_scroll(keep_alive)).await?;
            let mut open_cursor: Option<String> = None;
            loop {
                if let Some(cursor) = &page.cursor {
                    open_cursor = Some(cursor.id.clone());
                }
                if page.hits.is_empty() {
                    break;
                }
                let next = page.cursor.as_ref().map(|c| c.id.clone());
                yield page;
                match next {
                    Some(id) => page = this.scroll(id, keep_alive).await?,
                    None => break,
                }
            }
            if let Some(id) = open_cursor {
                this.release_cursor(id).await;
            }
        }
    }

    async fn release_cursor(&self, id: String) {
        if let Err(e) = self.clear_scroll(vec![id]).await {
            warn!(error = %e, "Failed to clear scroll cursor");
        }
    }

    /// Stop accepting calls. An owned connection is closed; a shared one
    /// stays in the cache for other dispatchers.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match &self.inner.lease {
            Lease::Owned(transport) => {
                debug!(transport = %transport.describe(), "Closing owned connection");
                transport.close()
            }
            Lease::Shared { key, .. } => {
                debug!(key = %key, "Released shared connection");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("version", &self.inner.version)
            .field("rules", &self.inner.pipeline.rule_names())
            .field("shared", &self.is_shared())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl HealthCheck for Dispatcher {
    async fn health_check(&self) -> Result<()> {
        self.ping().await.map(|_| ())
    }

    fn component_name(&self) -> &'static str {
        "dispatcher"
    }
}

fn error_kind(error: &EsCompatError) -> &'static str {
    match error {
        EsCompatError::Validation { .. } => "validation",
        EsCompatError::Translation { .. } => "translation",
        EsCompatError::Transport { .. } => "transport",
        EsCompatError::Status { .. } => "status",
        EsCompatError::Decode { .. } => "decode",
        EsCompatError::Timeout { .. } => "timeout",
        EsCompatError::Shutdown => "shutdown",
        _ => "other",
    }
}
