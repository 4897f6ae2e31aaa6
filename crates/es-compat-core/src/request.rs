//! Wire-level request and response values
//!
//! These are what actually crosses the transport: a method, an endpoint, a
//! parameter map and an optional UTF-8 body.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media type of an outbound body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyKind {
    #[default]
    Json,
    /// Newline-delimited JSON, used by `_bulk`; never rewritten by rules
    NdJson,
}

impl BodyKind {
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::NdJson => "application/x-ndjson",
        }
    }
}

/// A request as it will be sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    pub method: Method,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub body_kind: BodyKind,
}

impl WireRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
            body: None,
            body_kind: BodyKind::Json,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_json_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self.body_kind = BodyKind::Json;
        self
    }

    pub fn with_ndjson_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self.body_kind = BodyKind::NdJson;
        self
    }

    /// Body present and not blank
    pub fn has_body(&self) -> bool {
        self.body.as_deref().is_some_and(|b| !b.trim().is_empty())
    }

    /// Endpoint plus encoded query string
    pub fn path_and_query(&self) -> String {
        if self.params.is_empty() {
            return self.endpoint.clone();
        }
        let query = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.endpoint, query)
    }
}

fn encode_component(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

/// A response as read off the transport, before decoding
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: u16, content_type: Option<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }

    /// JSON response with the given status
    pub fn json(status: u16, body: impl Into<Bytes>) -> Self {
        Self::new(status, Some("application/json; charset=UTF-8".to_string()), body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
