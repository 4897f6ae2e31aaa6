//! Canonical result model
//!
//! Every protocol generation decodes into these types, so callers never see
//! wire-level differences such as the shape of `hits.total`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ============================================================================
// Search results
// ============================================================================

/// Whether a reported hit count is exact or only a floor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    #[default]
    Exact,
    LowerBound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TotalHits {
    pub value: u64,
    pub relation: Relation,
}

impl TotalHits {
    pub fn exact(value: u64) -> Self {
        Self {
            value,
            relation: Relation::Exact,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardSummary {
    pub total: u32,
    pub successful: u32,
    #[serde(default)]
    pub skipped: u32,
    pub failed: u32,
}

/// A single search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_type", default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_score", default)]
    pub score: Option<f64>,
    #[serde(rename = "_routing", default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,
    #[serde(rename = "_source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<Value>,
}

/// Server-issued scroll cursor. Consumed strictly in sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCursor {
    pub id: String,
    /// The page carrying this cursor had zero hits
    pub exhausted: bool,
}

/// One named suggester's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub name: String,
    pub entries: Vec<SuggestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestEntry {
    pub text: String,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub length: u32,
    #[serde(default)]
    pub options: Vec<Value>,
}

/// Decoded search, scroll or count response
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CanonicalResult {
    pub took: u64,
    pub timed_out: bool,
    pub shards: ShardSummary,
    pub hits: Vec<Hit>,
    pub total: TotalHits,
    pub max_score: Option<f64>,
    pub aggregations: Aggregations,
    pub suggestions: Vec<Suggestion>,
    pub cursor: Option<SearchCursor>,
}

impl CanonicalResult {
    pub fn total_hits(&self) -> u64 {
        self.total.value
    }

    pub fn relation(&self) -> Relation {
        self.total.relation
    }

    /// `_source` of every hit, in order
    pub fn sources(&self) -> impl Iterator<Item = &Value> {
        self.hits.iter().filter_map(|h| h.source.as_ref())
    }
}

// ============================================================================
// Aggregations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub key: Value,
    pub key_as_string: Option<String>,
    pub doc_count: u64,
    pub aggregations: Aggregations,
}

impl Bucket {
    /// Key rendered for display, preferring the server's formatted form
    pub fn key_string(&self) -> String {
        match (&self.key_as_string, &self.key) {
            (Some(s), _) => s.clone(),
            (None, Value::String(s)) => s.clone(),
            (None, other) => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub sum: f64,
}

/// Closed set of aggregation shapes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Aggregation {
    BucketMulti {
        buckets: Vec<Bucket>,
    },
    BucketSingle {
        doc_count: u64,
        aggregations: Aggregations,
    },
    NumericSingle {
        value: Option<f64>,
        value_as_string: Option<String>,
    },
    NumericStats(Stats),
    TopHits {
        total: TotalHits,
        hits: Vec<Hit>,
    },
    /// Kinds with no dedicated decoder, kept verbatim
    Raw(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedAggregation {
    pub name: String,
    /// `typed_keys` tag, e.g. `sterms`, when the server sent one
    pub tag: Option<String>,
    pub aggregation: Aggregation,
}

/// Ordered aggregation tree level
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Aggregations(pub Vec<NamedAggregation>);

impl Aggregations {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, name: &str) -> Option<&Aggregation> {
        self.0
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.aggregation)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedAggregation> {
        self.0.iter()
    }

    /// Flat `key -> value` view of the tree.
    ///
    /// A single top-level aggregation is unwrapped in place; several are
    /// nested under their names. Bucket levels become maps keyed by bucket
    /// key, leaf buckets map to their doc count. With `with_doc_count`
    /// intermediate keys carry `"\t<doc_count>"`.
    pub fn flatten(&self, with_doc_count: bool) -> Map<String, Value> {
        let mut out = Map::new();
        match self.0.as_slice() {
            [] => {}
            [only] => flatten_into(only, &mut out, with_doc_count),
            many => {
                for agg in many {
                    let mut level = Map::new();
                    flatten_into(agg, &mut level, with_doc_count);
                    out.insert(agg.name.clone(), Value::Object(level));
                }
            }
        }
        out
    }
}

fn number(v: Option<f64>) -> Value {
    v.and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn flatten_into(agg: &NamedAggregation, out: &mut Map<String, Value>, with_doc_count: bool) {
    match &agg.aggregation {
        Aggregation::BucketSingle { aggregations, .. } => {
            for sub in aggregations.iter() {
                flatten_into(sub, out, with_doc_count);
            }
        }
        Aggregation::BucketMulti { buckets } => {
            for bucket in buckets {
                let mut key = bucket.key_string();
                if bucket.aggregations.is_empty() {
                    out.insert(key, Value::from(bucket.doc_count));
                    continue;
                }
                if with_doc_count {
                    key = format!("{key}\t{}", bucket.doc_count);
                }
                let mut level = Map::new();
                for sub in bucket.aggregations.iter() {
                    flatten_into(sub, &mut level, with_doc_count);
                }
                out.insert(key, Value::Object(level));
            }
        }
        Aggregation::NumericSingle { value, .. } => {
            out.insert(agg.name.clone(), number(*value));
        }
        Aggregation::NumericStats(stats) => {
            out.insert("max".into(), number(stats.max));
            out.insert("min".into(), number(stats.min));
            out.insert("sum".into(), number(Some(stats.sum)));
            out.insert("avg".into(), number(stats.avg));
            out.insert("count".into(), Value::from(stats.count));
        }
        Aggregation::TopHits { hits, .. } => {
            let sources = hits
                .iter()
                .map(|h| h.source.clone().unwrap_or(Value::Null))
                .collect();
            out.insert(agg.name.clone(), Value::Array(sources));
        }
        Aggregation::Raw(raw) => {
            out.insert(agg.name.clone(), raw.clone());
        }
    }
}

// ============================================================================
// Document, bulk and cluster responses
// ============================================================================

/// Get-by-id result; `found == false` for a tolerated 404
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetResult {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_type", default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_version", default)]
    pub version: Option<i64>,
    #[serde(default)]
    pub found: bool,
    #[serde(rename = "_source", default)]
    pub source: Option<Value>,
}

/// Delete-by-id outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResult {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub result: Option<String>,
    /// Pre-5.x clusters report this instead of `result`
    #[serde(default)]
    pub found: Option<bool>,
}

impl DeleteResult {
    pub fn deleted(&self) -> bool {
        match (&self.result, self.found) {
            (Some(r), _) => r == "deleted",
            (None, Some(found)) => found,
            (None, None) => false,
        }
    }
}

/// Bulk API response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkResponse {
    pub took: u64,
    pub errors: bool,
    pub items: Vec<BulkItem>,
}

/// One slot of a bulk response; the key is the action name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkItem {
    Index(BulkItemResult),
    Create(BulkItemResult),
    Update(BulkItemResult),
    Delete(BulkItemResult),
}

impl BulkItem {
    pub fn result(&self) -> &BulkItemResult {
        match self {
            Self::Index(r) | Self::Create(r) | Self::Update(r) | Self::Delete(r) => r,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemResult {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_id", default)]
    pub id: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ServerError>,
}

/// Cluster banner returned by `GET /`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingInfo {
    #[serde(default)]
    pub name: String,
    pub cluster_name: String,
    pub version: PingVersion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingVersion {
    pub number: String,
}

// ============================================================================
// Server errors
// ============================================================================

/// Structured error detail reported by the cluster.
///
/// Generations before 2.x send `error` as a plain string; later ones send an
/// object with `type`, `reason` and an optional `caused_by` chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerError {
    pub kind: String,
    pub reason: String,
    pub caused_by: Option<Box<ServerError>>,
}

impl ServerError {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(Self {
                kind: legacy_kind(text),
                reason: text.clone(),
                caused_by: None,
            }),
            Value::Object(map) => Some(Self {
                kind: map
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                reason: map
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                caused_by: map
                    .get("caused_by")
                    .and_then(Self::from_value)
                    .map(Box::new),
            }),
            _ => None,
        }
    }

    /// Node signalled resource exhaustion, anywhere in the cause chain
    pub fn is_rejection(&self) -> bool {
        self.kind == "es_rejected_execution_exception"
            || crate::error::is_rejection_message(&self.reason)
            || self.caused_by.as_deref().is_some_and(Self::is_rejection)
    }
}

/// `"EsRejectedExecutionException[rejected execution ...]"` -> class name
fn legacy_kind(text: &str) -> String {
    text.split(['[', ':'])
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason, self.kind)?;
        if let Some(cause) = &self.caused_by {
            write!(f, "; caused by: {cause}")?;
        }
        Ok(())
    }
}

impl<'de> Deserialize<'de> for ServerError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom("error must be a string or an object"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bucket(key: &str, doc_count: u64, aggregations: Aggregations) -> Bucket {
        Bucket {
            key: json!(key),
            key_as_string: None,
            doc_count,
            aggregations,
        }
    }

    #[test]
    fn test_flatten_single_terms_with_metric() {
        let avg = NamedAggregation {
            name: "avg_price".into(),
            tag: Some("avg".into()),
            aggregation: Aggregation::NumericSingle {
                value: Some(12.5),
                value_as_string: None,
            },
        };
        let aggs = Aggregations(vec![NamedAggregation {
            name: "by_brand".into(),
            tag: Some("sterms".into()),
            aggregation: Aggregation::BucketMulti {
                buckets: vec![
                    bucket("acme", 3, Aggregations(vec![avg])),
                    bucket("globex", 1, Aggregations::default()),
                ],
            },
        }]);

        let flat = aggs.flatten(false);
        assert_eq!(flat["acme"], json!({"avg_price": 12.5}));
        assert_eq!(flat["globex"], json!(1));

        let flat = aggs.flatten(true);
        assert!(flat.contains_key("acme\t3"));
    }

    #[test]
    fn test_server_error_forms() {
        let modern = ServerError::from_value(&json!({
            "type": "remote_transport_exception",
            "reason": "[node][bulk]",
            "caused_by": {"type": "es_rejected_execution_exception", "reason": "queue full"}
        }))
        .unwrap();
        assert!(modern.is_rejection());

        let legacy = ServerError::from_value(&json!(
            "EsRejectedExecutionException[rejected execution (queue capacity 50)]"
        ))
        .unwrap();
        assert_eq!(legacy.kind, "EsRejectedExecutionException");
        assert!(legacy.is_rejection());

        let missing = ServerError::from_value(&json!({"type": "mapper_parsing_exception", "reason": "bad"}))
            .unwrap();
        assert!(!missing.is_rejection());
    }

    #[test]
    fn test_bulk_item_deserialize() {
        let item: BulkItem = serde_json::from_value(json!({
            "delete": {"_index": "a", "_id": "1", "status": 404}
        }))
        .unwrap();
        assert!(item.is_delete());
        assert_eq!(item.result().status, 404);
        assert!(item.result().error.is_none());
    }
}
