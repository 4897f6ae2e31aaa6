//! Configuration for the ES compat client
//!
//! Uses the `config` crate for layered configuration from files and
//! environment (`ES_COMPAT__SECTION__KEY`). Cache policy and connection reuse
//! live here and are handed to the client factory explicitly.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::error::{EsCompatError, Result};
use crate::version::ProtocolVersion;

const DEFAULT_PORT: u16 = 9200;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub bulk: BulkConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ============================================================================
// Elasticsearch Configuration
// ============================================================================

/// Cluster connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    /// `host`, `host:port` or full URLs
    #[serde(default = "default_es_hosts")]
    pub hosts: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Wire dialect of the target cluster
    #[serde(default)]
    pub protocol_version: ProtocolVersion,

    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Upper bound a single logical request may take
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// Cuts off a stalled socket. Must not be shorter than `request_timeout`.
    #[serde(with = "humantime_serde", default = "default_socket_timeout")]
    pub socket_timeout: Duration,

    /// Share one pooled connection per (hosts, credentials) across clients
    #[serde(default = "default_true")]
    pub reuse_connection: bool,
}

fn default_es_hosts() -> Vec<String> {
    vec![format!("http://localhost:{DEFAULT_PORT}")]
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_request_timeout() -> Duration {
    Duration::from_millis(120_000)
}

fn default_socket_timeout() -> Duration {
    Duration::from_millis(120_000)
}

fn default_true() -> bool {
    true
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            hosts: default_es_hosts(),
            username: None,
            password: None,
            protocol_version: ProtocolVersion::default(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            socket_timeout: default_socket_timeout(),
            reuse_connection: true,
        }
    }
}

impl ElasticsearchConfig {
    /// Hosts as base URLs: scheme defaults to `http`, port to 9200
    pub fn normalized_hosts(&self) -> Result<Vec<Url>> {
        self.hosts.iter().map(|h| normalize_host(h)).collect()
    }
}

/// Parse `host`, `host:port` or a URL into a base URL
pub fn normalize_host(raw: &str) -> Result<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(EsCompatError::config("empty host entry"));
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    let mut url = Url::parse(&with_scheme)
        .map_err(|e| EsCompatError::config(format!("invalid host '{raw}': {e}")))?;
    if url.host_str().is_none() {
        return Err(EsCompatError::config(format!("host '{raw}' has no hostname")));
    }
    if url.port().is_none() && !raw.contains("://") {
        url.set_port(Some(DEFAULT_PORT))
            .map_err(|_| EsCompatError::config(format!("cannot set port on '{raw}'")))?;
    }
    Ok(url)
}

// ============================================================================
// Connection Cache Configuration
// ============================================================================

/// Eviction policy for shared pooled connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Never evict
    #[default]
    Always,
    /// Evict after `idle_window` without access
    Recency,
    /// Frequency-aware admission with the same idle expiry
    FrequencyRecency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub policy: CachePolicy,

    #[serde(with = "humantime_serde", default = "default_idle_window")]
    pub idle_window: Duration,

    /// Only bounds the frequency/recency policy
    #[serde(default = "default_max_connections")]
    pub max_connections: u64,
}

fn default_idle_window() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_max_connections() -> u64 {
    1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: CachePolicy::default(),
            idle_window: default_idle_window(),
            max_connections: default_max_connections(),
        }
    }
}

// ============================================================================
// Bulk Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Flush once this many operations are queued
    #[serde(default = "default_bulk_actions")]
    pub actions: usize,

    /// Flush once the rendered payload reaches this size
    #[serde(default = "default_bulk_max_bytes")]
    pub max_bytes: usize,

    /// Flush on a timer as well, if set
    #[serde(with = "humantime_serde", default)]
    pub flush_interval: Option<Duration>,

    /// Bulk requests allowed in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Server-side timeout attached to each bulk request
    #[serde(with = "humantime_serde", default = "default_bulk_timeout")]
    pub timeout: Duration,

    /// Added to `timeout` when draining on close
    #[serde(with = "humantime_serde", default = "default_close_margin")]
    pub close_margin: Duration,

    /// Document member holding the id
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Keep the id member in the stored document
    #[serde(default = "default_true")]
    pub keep_id: bool,

    /// Index every write goes to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,

    /// Document type, for clusters that still have them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,

    /// Backoff for whole-request overload
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Terminal failures kept for inspection
    #[serde(default = "default_failure_log_size")]
    pub failure_log_size: usize,
}

fn default_bulk_actions() -> usize {
    1000
}

fn default_bulk_max_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_concurrency() -> usize {
    1
}

fn default_bulk_timeout() -> Duration {
    Duration::from_millis(60_000)
}

fn default_close_margin() -> Duration {
    Duration::from_secs(5)
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_failure_log_size() -> usize {
    10_000
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            actions: default_bulk_actions(),
            max_bytes: default_bulk_max_bytes(),
            flush_interval: None,
            concurrency: default_concurrency(),
            timeout: default_bulk_timeout(),
            close_margin: default_close_margin(),
            id_field: default_id_field(),
            keep_id: true,
            index: None,
            doc_type: None,
            backoff: BackoffConfig::default(),
            failure_log_size: default_failure_log_size(),
        }
    }
}

impl BulkConfig {
    /// How long `close` waits for in-flight work
    pub fn drain_timeout(&self) -> Duration {
        self.timeout + self.close_margin
    }
}

/// Exponential backoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,

    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    8
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(50)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

// ============================================================================
// Observability Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl ClientConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(
            config::Config::try_from(&Self::default()).map_err(config_error)?,
        );

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("ES_COMPAT")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("elasticsearch.hosts")
                .try_parsing(true),
        );

        let loaded: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject combinations that would misbehave at runtime
    pub fn validate(&self) -> Result<()> {
        let es = &self.elasticsearch;
        if es.hosts.is_empty() {
            return Err(EsCompatError::config("at least one host is required"));
        }
        es.normalized_hosts()?;
        if es.socket_timeout < es.request_timeout {
            return Err(EsCompatError::config(format!(
                "socket_timeout ({:?}) must not be shorter than request_timeout ({:?})",
                es.socket_timeout, es.request_timeout
            )));
        }
        if es.username.is_some() != es.password.is_some() {
            return Err(EsCompatError::config(
                "username and password must be set together",
            ));
        }
        if self.bulk.actions == 0 {
            return Err(EsCompatError::config("bulk.actions must be positive"));
        }
        if self.bulk.concurrency == 0 {
            return Err(EsCompatError::config("bulk.concurrency must be positive"));
        }
        if self.bulk.close_margin.is_zero() {
            return Err(EsCompatError::config(
                "bulk.close_margin must be positive so close outlasts a bulk request",
            ));
        }
        Ok(())
    }
}

fn config_error(e: config::ConfigError) -> EsCompatError {
    EsCompatError::config(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.elasticsearch.request_timeout, Duration::from_millis(120_000));
        assert_eq!(cfg.elasticsearch.socket_timeout, Duration::from_millis(120_000));
        assert!(cfg.elasticsearch.reuse_connection);
        assert_eq!(cfg.cache.policy, CachePolicy::Always);
        assert_eq!(cfg.cache.idle_window, Duration::from_secs(3600));
        assert_eq!(cfg.bulk.actions, 1000);
        assert_eq!(cfg.bulk.timeout, Duration::from_millis(60_000));
        assert_eq!(cfg.bulk.drain_timeout(), Duration::from_millis(65_000));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("es1").unwrap().as_str(), "http://es1:9200/");
        assert_eq!(normalize_host("es1:9300").unwrap().as_str(), "http://es1:9300/");
        assert_eq!(
            normalize_host("https://es.example.com").unwrap().as_str(),
            "https://es.example.com/"
        );
        assert!(normalize_host("  ").is_err());
    }

    #[test]
    fn test_socket_timeout_must_cover_request_timeout() {
        let mut cfg = ClientConfig::default();
        cfg.elasticsearch.socket_timeout = Duration::from_secs(30);
        assert!(matches!(
            cfg.validate(),
            Err(EsCompatError::Configuration { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[elasticsearch]
hosts = ["es1:9200", "es2"]
protocol_version = "v7.9"
request_timeout = "30s"

[cache]
policy = "recency"
idle_window = "10m"

[bulk]
actions = 500
flush_interval = "5s"
keep_id = false
"#
        )
        .unwrap();

        let cfg = ClientConfig::load(file.path().to_str()).unwrap();
        assert_eq!(cfg.elasticsearch.protocol_version, ProtocolVersion::V7_9);
        assert_eq!(cfg.elasticsearch.hosts.len(), 2);
        assert_eq!(cfg.elasticsearch.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.cache.policy, CachePolicy::Recency);
        assert_eq!(cfg.cache.idle_window, Duration::from_secs(600));
        assert_eq!(cfg.bulk.actions, 500);
        assert_eq!(cfg.bulk.flush_interval, Some(Duration::from_secs(5)));
        assert!(!cfg.bulk.keep_id);
        assert_eq!(cfg.bulk.id_field, "id");
    }
}
