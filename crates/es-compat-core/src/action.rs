//! Typed action requests
//!
//! An [`ActionRequest`] knows how to validate itself, how to render its
//! canonical wire form for a protocol generation, which error statuses it can
//! still read as data, and how to decode its response.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::decode;
use crate::error::{EsCompatError, Result, Violation};
use crate::request::{Method, RawResponse, WireRequest};
use crate::response::{BulkResponse, CanonicalResult, DeleteResult, GetResult, PingInfo};
use crate::version::ProtocolVersion;

const NOT_FOUND: &[u16] = &[404];

/// A request the dispatcher can execute
pub trait ActionRequest: Send + Sync {
    type Response: Send + 'static;

    /// Action name for logs and metrics
    fn name(&self) -> &'static str;

    /// Shape complaints. Any entry aborts the call before I/O.
    fn validate(&self) -> Vec<Violation> {
        Vec::new()
    }

    /// Canonical (untranslated) wire form
    fn to_wire(&self, version: ProtocolVersion) -> Result<WireRequest>;

    /// Non-2xx statuses whose body should still be decoded as data
    fn tolerated_statuses(&self) -> &[u16] {
        &[]
    }

    fn decode(&self, raw: &RawResponse, version: ProtocolVersion) -> Result<Self::Response>;
}

/// Render a duration the way the cluster parses time values
pub fn time_value(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}

fn render(body: &Value) -> Result<String> {
    serde_json::to_string(body)
        .map_err(|e| EsCompatError::Internal(format!("failed to render request body: {e}")))
}

fn doc_path(index: &str, doc_type: Option<&str>, id: &str, version: ProtocolVersion) -> String {
    match (version.has_doc_types(), doc_type) {
        (true, Some(t)) => format!("/{index}/{t}/{id}"),
        _ => format!("/{index}/_doc/{id}"),
    }
}

// ============================================================================
// Search
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub indices: Vec<String>,
    pub doc_type: Option<String>,
    pub body: Value,
    /// Keep-alive that opens a scroll cursor
    #[serde(default, with = "humantime_serde")]
    pub scroll: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl SearchRequest {
    pub fn new<I, S>(indices: I, body: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            indices: indices.into_iter().map(Into::into).collect(),
            doc_type: None,
            body,
            scroll: None,
            timeout: None,
        }
    }

    pub fn with_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    pub fn with_scroll(mut self, keep_alive: Duration) -> Self {
        self.scroll = Some(keep_alive);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Same query, no hits; only the total is wanted
    pub fn into_count(mut self) -> Self {
        if !self.body.is_object() {
            self.body = json!({});
        }
        self.body["size"] = json!(0);
        self.scroll = None;
        self
    }

    fn endpoint(&self, version: ProtocolVersion) -> String {
        let indices = self.indices.join(",");
        match (version.has_doc_types(), self.doc_type.as_deref(), indices.is_empty()) {
            (true, Some(t), true) => format!("/_all/{t}/_search"),
            (true, Some(t), false) => format!("/{indices}/{t}/_search"),
            (_, _, true) => "/_search".to_string(),
            (_, _, false) => format!("/{indices}/_search"),
        }
    }
}

impl ActionRequest for SearchRequest {
    type Response = CanonicalResult;

    fn name(&self) -> &'static str {
        "search"
    }

    fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        if self.doc_type.as_deref().map_or(true, str::is_empty) {
            violations.push(Violation::MissingType);
        }
        if !self.body.is_object() {
            violations.push(Violation::Other("search body must be a JSON object".into()));
        }
        violations
    }

    fn to_wire(&self, version: ProtocolVersion) -> Result<WireRequest> {
        let mut req = WireRequest::new(Method::Post, self.endpoint(version))
            .with_json_body(render(&self.body)?);
        // Tagged aggregation keys arrived in 5.x
        if version >= ProtocolVersion::V5_6 {
            req = req.with_param("typed_keys", "true");
        }
        if let Some(keep_alive) = self.scroll {
            req = req.with_param("scroll", time_value(keep_alive));
        }
        if let Some(timeout) = self.timeout {
            req = req.with_param("timeout", time_value(timeout));
        }
        Ok(req)
    }

    fn decode(&self, raw: &RawResponse, version: ProtocolVersion) -> Result<CanonicalResult> {
        decode::decode_search(raw, version)
    }
}

// ============================================================================
// Scroll
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollRequest {
    pub scroll_id: String,
    pub keep_alive: Duration,
}

impl ScrollRequest {
    pub fn new(scroll_id: impl Into<String>, keep_alive: Duration) -> Self {
        Self {
            scroll_id: scroll_id.into(),
            keep_alive,
        }
    }
}

impl ActionRequest for ScrollRequest {
    type Response = CanonicalResult;

    fn name(&self) -> &'static str {
        "scroll"
    }

    fn validate(&self) -> Vec<Violation> {
        if self.scroll_id.is_empty() {
            vec![Violation::Other("scroll id is missing".into())]
        } else {
            Vec::new()
        }
    }

    fn to_wire(&self, _version: ProtocolVersion) -> Result<WireRequest> {
        let body = json!({
            "scroll_id": self.scroll_id,
            "scroll": time_value(self.keep_alive),
        });
        Ok(WireRequest::new(Method::Post, "/_search/scroll").with_json_body(render(&body)?))
    }

    fn decode(&self, raw: &RawResponse, version: ProtocolVersion) -> Result<CanonicalResult> {
        decode::decode_search(raw, version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearScrollRequest {
    pub scroll_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearScrollResult {
    #[serde(default)]
    pub succeeded: bool,
    #[serde(default)]
    pub num_freed: u64,
}

impl ActionRequest for ClearScrollRequest {
    type Response = ClearScrollResult;

    fn name(&self) -> &'static str {
        "clear_scroll"
    }

    fn validate(&self) -> Vec<Violation> {
        if self.scroll_ids.is_empty() {
            vec![Violation::EmptyRequest]
        } else {
            Vec::new()
        }
    }

    fn to_wire(&self, _version: ProtocolVersion) -> Result<WireRequest> {
        let body = json!({ "scroll_id": self.scroll_ids });
        Ok(WireRequest::new(Method::Delete, "/_search/scroll").with_json_body(render(&body)?))
    }

    /// Already-expired cursors come back as 404
    fn tolerated_statuses(&self) -> &[u16] {
        NOT_FOUND
    }

    fn decode(&self, raw: &RawResponse, _version: ProtocolVersion) -> Result<ClearScrollResult> {
        // 1.x answers with an empty body
        if raw.body.is_empty() {
            return Ok(ClearScrollResult {
                succeeded: raw.is_success(),
                num_freed: 0,
            });
        }
        decode::decode_as(raw)
    }
}

// ============================================================================
// Documents
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRequest {
    pub index: String,
    pub doc_type: Option<String>,
    pub id: String,
}

impl GetRequest {
    pub fn new(index: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            doc_type: None,
            id: id.into(),
        }
    }

    pub fn with_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }
}

fn document_violations(index: &str, doc_type: Option<&str>, id: &str) -> Vec<Violation> {
    let mut violations = Vec::new();
    if index.is_empty() {
        violations.push(Violation::MissingIndex);
    }
    if doc_type.map_or(true, str::is_empty) {
        violations.push(Violation::MissingType);
    }
    if id.is_empty() {
        violations.push(Violation::MissingId);
    }
    violations
}

impl ActionRequest for GetRequest {
    type Response = GetResult;

    fn name(&self) -> &'static str {
        "get"
    }

    fn validate(&self) -> Vec<Violation> {
        document_violations(&self.index, self.doc_type.as_deref(), &self.id)
    }

    fn to_wire(&self, version: ProtocolVersion) -> Result<WireRequest> {
        Ok(WireRequest::new(
            Method::Get,
            doc_path(&self.index, self.doc_type.as_deref(), &self.id, version),
        ))
    }

    fn tolerated_statuses(&self) -> &[u16] {
        NOT_FOUND
    }

    fn decode(&self, raw: &RawResponse, _version: ProtocolVersion) -> Result<GetResult> {
        decode::decode_as(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub index: String,
    pub doc_type: Option<String>,
    pub id: String,
}

impl DeleteRequest {
    pub fn new(index: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            doc_type: None,
            id: id.into(),
        }
    }

    pub fn with_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }
}

impl ActionRequest for DeleteRequest {
    type Response = DeleteResult;

    fn name(&self) -> &'static str {
        "delete"
    }

    fn validate(&self) -> Vec<Violation> {
        document_violations(&self.index, self.doc_type.as_deref(), &self.id)
    }

    fn to_wire(&self, version: ProtocolVersion) -> Result<WireRequest> {
        Ok(WireRequest::new(
            Method::Delete,
            doc_path(&self.index, self.doc_type.as_deref(), &self.id, version),
        ))
    }

    fn tolerated_statuses(&self) -> &[u16] {
        NOT_FOUND
    }

    fn decode(&self, raw: &RawResponse, _version: ProtocolVersion) -> Result<DeleteResult> {
        decode::decode_as(raw)
    }
}

// ============================================================================
// Bulk
// ============================================================================

/// Pre-rendered NDJSON bulk body plus the complaints found while rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkRequest {
    pub payload: String,
    pub actions: usize,
    pub violations: Vec<Violation>,
    pub timeout: Option<Duration>,
}

impl BulkRequest {
    pub fn new(payload: String, actions: usize) -> Self {
        Self {
            payload,
            actions,
            violations: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_violations(mut self, violations: Vec<Violation>) -> Self {
        self.violations = violations;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl ActionRequest for BulkRequest {
    type Response = BulkResponse;

    fn name(&self) -> &'static str {
        "bulk"
    }

    fn validate(&self) -> Vec<Violation> {
        if self.actions == 0 {
            return vec![Violation::EmptyRequest];
        }
        self.violations.clone()
    }

    fn to_wire(&self, _version: ProtocolVersion) -> Result<WireRequest> {
        let mut req = WireRequest::new(Method::Post, "/_bulk").with_ndjson_body(self.payload.clone());
        if let Some(timeout) = self.timeout {
            req = req.with_param("timeout", time_value(timeout));
        }
        Ok(req)
    }

    fn decode(&self, raw: &RawResponse, _version: ProtocolVersion) -> Result<BulkResponse> {
        decode::decode_as(raw)
    }
}

// ============================================================================
// Ping
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingRequest;

impl ActionRequest for PingRequest {
    type Response = PingInfo;

    fn name(&self) -> &'static str {
        "ping"
    }

    fn to_wire(&self, _version: ProtocolVersion) -> Result<WireRequest> {
        Ok(WireRequest::new(Method::Get, "/"))
    }

    fn decode(&self, raw: &RawResponse, _version: ProtocolVersion) -> Result<PingInfo> {
        decode::decode_as(raw)
    }
}
