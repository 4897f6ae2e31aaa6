//! HTTP transport over `reqwest`
//!
//! One [`HttpTransport`] is one pooled connection set to a cluster: a
//! `reqwest::Client` plus the host list it rotates through.

use async_trait::async_trait;
use es_compat_core::config::ElasticsearchConfig;
use es_compat_core::prelude::*;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};
use url::Url;

/// Everything needed to open a connection
#[derive(Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub hosts: Vec<Url>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
}

impl TransportSettings {
    pub fn from_config(config: &ElasticsearchConfig) -> Result<Self> {
        let hosts = config.normalized_hosts()?;
        if hosts.is_empty() {
            return Err(EsCompatError::config("at least one host is required"));
        }
        Ok(Self {
            hosts,
            username: config.username.clone(),
            password: config.password.clone(),
            connect_timeout: config.connect_timeout,
            socket_timeout: config.socket_timeout,
        })
    }
}

impl fmt::Debug for TransportSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSettings")
            .field("hosts", &self.hosts.iter().map(Url::as_str).collect::<Vec<_>>())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout", &self.connect_timeout)
            .field("socket_timeout", &self.socket_timeout)
            .finish()
    }
}

/// Opens transports. Closures of the right shape are connectors too.
pub trait Connector: Send + Sync {
    fn connect(&self, settings: &TransportSettings) -> Result<SharedTransport>;
}

impl<F> Connector for F
where
    F: Fn(&TransportSettings) -> Result<SharedTransport> + Send + Sync,
{
    fn connect(&self, settings: &TransportSettings) -> Result<SharedTransport> {
        self(settings)
    }
}

/// Default connector producing [`HttpTransport`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

impl Connector for HttpConnector {
    fn connect(&self, settings: &TransportSettings) -> Result<SharedTransport> {
        Ok(Arc::new(HttpTransport::new(settings.clone())?))
    }
}

/// Cluster connection with round-robin host selection
pub struct HttpTransport {
    client: Client,
    settings: TransportSettings,
    host_index: AtomicUsize,
    closed: AtomicBool,
}

impl HttpTransport {
    pub fn new(settings: TransportSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.socket_timeout)
            .build()
            .map_err(|e| EsCompatError::transport_with_source("Failed to create client", e))?;

        debug!(hosts = ?settings.hosts.iter().map(Url::as_str).collect::<Vec<_>>(), "Opened transport");
        Ok(Self {
            client,
            settings,
            host_index: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Round-robin start position for this call
    fn next_host(&self) -> usize {
        self.host_index.fetch_add(1, Ordering::Relaxed) % self.settings.hosts.len()
    }

    fn build_request(&self, host: &Url, request: &WireRequest) -> Result<reqwest::RequestBuilder> {
        let url = format!(
            "{}{}",
            host.as_str().trim_end_matches('/'),
            request.path_and_query()
        );
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| EsCompatError::Internal(format!("invalid method: {e}")))?;
        let mut req = self.client.request(method, &url);

        if let (Some(user), Some(pass)) = (&self.settings.username, &self.settings.password) {
            req = req.basic_auth(user, Some(pass));
        }

        if let Some(body) = &request.body {
            req = req
                .header(CONTENT_TYPE, request.body_kind.mime())
                .body(body.clone());
        }
        Ok(req)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn perform(&self, request: &WireRequest) -> Result<RawResponse> {
        if self.is_closed() {
            return Err(EsCompatError::transport("transport is closed"));
        }

        let hosts = &self.settings.hosts;
        let start = self.next_host();
        let mut last_error = None;

        for attempt in 0..hosts.len() {
            let host = &hosts[(start + attempt) % hosts.len()];
            trace!(host = %host, method = %request.method, endpoint = %request.endpoint, "Sending request");

            match self.build_request(host, request)?.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let content_type = resp
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let body = resp.bytes().await.map_err(|e| {
                        EsCompatError::transport_with_source("Failed to read response body", e)
                    })?;
                    return Ok(RawResponse::new(status, content_type, body));
                }
                // Only connection failures move on to the next host
                Err(e) if e.is_connect() => {
                    warn!(host = %host, error = %e, "Host unreachable, trying next");
                    last_error = Some(e);
                }
                Err(e) if e.is_timeout() => {
                    return Err(EsCompatError::timeout(
                        format!("{} {}", request.method, request.endpoint),
                        self.settings.socket_timeout.as_millis() as u64,
                    ));
                }
                Err(e) => {
                    return Err(EsCompatError::transport_with_source("Request failed", e));
                }
            }
        }

        match last_error {
            Some(e) => Err(EsCompatError::transport_with_source("All hosts unreachable", e)),
            None => Err(EsCompatError::transport("no hosts configured")),
        }
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(transport = %self.describe(), "Closed transport");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn describe(&self) -> String {
        self.settings
            .hosts
            .iter()
            .map(|h| h.as_str().trim_end_matches('/'))
            .collect::<Vec<_>>()
            .join(",")
    }
}
