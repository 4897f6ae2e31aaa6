//! Response decoding
//!
//! Turns a [`RawResponse`] into the canonical model. Media checks come first
//! so a non-JSON payload never reaches the parser; every failure carries the
//! raw bytes.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::trace;

use crate::error::{EsCompatError, Result};
use crate::request::RawResponse;
use crate::response::{
    Aggregation, Aggregations, Bucket, CanonicalResult, Hit, NamedAggregation, Relation,
    SearchCursor, ServerError, ShardSummary, Stats, SuggestEntry, Suggestion, TotalHits,
};
use crate::version::ProtocolVersion;

/// Ensure the payload declares a JSON media type
pub fn check_media(raw: &RawResponse) -> Result<()> {
    let Some(content_type) = raw.content_type.as_deref() else {
        return Err(EsCompatError::decode(
            "response has no content type",
            raw.body.clone(),
        ));
    };

    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if mime == "application/json" || mime.ends_with("+json") {
        Ok(())
    } else {
        Err(EsCompatError::decode(
            format!("unsupported content type '{content_type}'"),
            raw.body.clone(),
        ))
    }
}

/// Media check plus JSON parse
pub fn parse_json(raw: &RawResponse) -> Result<Value> {
    check_media(raw)?;
    serde_json::from_slice(&raw.body).map_err(|e| {
        EsCompatError::decode(format!("malformed JSON payload: {e}"), raw.body.clone())
    })
}

/// Decode into any serde type
pub fn decode_as<T: DeserializeOwned>(raw: &RawResponse) -> Result<T> {
    let value = parse_json(raw)?;
    serde_json::from_value(value).map_err(|e| {
        EsCompatError::decode(format!("unexpected response shape: {e}"), raw.body.clone())
    })
}

/// Best-effort extraction of the server's `error` member
pub fn server_error(raw: &RawResponse) -> Option<ServerError> {
    let value: Value = serde_json::from_slice(&raw.body).ok()?;
    value.get("error").and_then(ServerError::from_value)
}

/// Decode a search, scroll or count-by-search response
pub fn decode_search(raw: &RawResponse, version: ProtocolVersion) -> Result<CanonicalResult> {
    let doc = parse_json(raw)?;
    let shape = |msg: String| EsCompatError::decode(msg, raw.body.clone());

    let hits_obj = doc
        .get("hits")
        .and_then(Value::as_object)
        .ok_or_else(|| shape("missing 'hits' object".to_string()))?;

    let total = match hits_obj.get("total") {
        Some(total) => decode_total(total, version).map_err(shape)?,
        None => TotalHits::default(),
    };

    let hits: Vec<Hit> = match hits_obj.get("hits") {
        Some(list) => serde_json::from_value(list.clone())
            .map_err(|e| shape(format!("invalid hit: {e}")))?,
        None => Vec::new(),
    };

    let shards = match doc.get("_shards") {
        Some(s) => serde_json::from_value(s.clone())
            .map_err(|e| shape(format!("invalid _shards: {e}")))?,
        None => ShardSummary::default(),
    };

    let aggregations = match doc.get("aggregations").and_then(Value::as_object) {
        Some(aggs) => decode_aggregations(aggs, version).map_err(shape)?,
        None => Aggregations::default(),
    };

    let suggestions = match doc.get("suggest").and_then(Value::as_object) {
        Some(s) => decode_suggestions(s).map_err(shape)?,
        None => Vec::new(),
    };

    let cursor = doc
        .get("_scroll_id")
        .and_then(Value::as_str)
        .map(|id| SearchCursor {
            id: id.to_string(),
            exhausted: hits.is_empty(),
        });

    trace!(
        version = %version,
        hits = hits.len(),
        total = total.value,
        relation = ?total.relation,
        "Decoded search response"
    );

    Ok(CanonicalResult {
        took: doc.get("took").and_then(Value::as_u64).unwrap_or(0),
        timed_out: doc.get("timed_out").and_then(Value::as_bool).unwrap_or(false),
        shards,
        hits,
        total,
        max_score: hits_obj.get("max_score").and_then(Value::as_f64),
        aggregations,
        suggestions,
        cursor,
    })
}

/// Decode `hits.total` for the given generation.
///
/// Only the newest generation may report a lower bound. Older generations
/// always count exactly, whatever shape the number arrives in.
pub fn decode_total(total: &Value, version: ProtocolVersion) -> std::result::Result<TotalHits, String> {
    match total {
        Value::Number(n) => n
            .as_u64()
            .map(TotalHits::exact)
            .ok_or_else(|| format!("hits.total is not a non-negative integer: {n}")),
        Value::Object(obj) => {
            let value = obj
                .get("value")
                .and_then(Value::as_u64)
                .ok_or_else(|| "hits.total.value missing".to_string())?;
            let relation = if version.is_newest() {
                match obj.get("relation").and_then(Value::as_str) {
                    Some(rel) => parse_relation(rel)?,
                    None => Relation::Exact,
                }
            } else {
                Relation::Exact
            };
            Ok(TotalHits { value, relation })
        }
        Value::Null => Ok(TotalHits::default()),
        other => Err(format!("hits.total has unexpected shape: {other}")),
    }
}

pub fn parse_relation(raw: &str) -> std::result::Result<Relation, String> {
    match raw {
        "eq" => Ok(Relation::Exact),
        "gte" => Ok(Relation::LowerBound),
        other => Err(format!("unknown total hits relation '{other}'")),
    }
}

// ============================================================================
// Aggregations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggKind {
    BucketMulti,
    BucketSingle,
    NumericSingle,
    NumericStats,
    TopHits,
    Other,
}

fn kind_of_tag(tag: &str) -> Option<AggKind> {
    let kind = match tag {
        "sterms" | "lterms" | "dterms" | "umterms" | "histogram" | "date_histogram"
        | "auto_date_histogram" | "range" | "date_range" | "geo_distance" | "ip_range"
        | "filters" | "geohash_grid" | "geotile_grid" | "sigsterms" | "siglterms"
        | "umsigterms" | "adjacency_matrix" | "composite" | "srareterms" | "lrareterms" => {
            AggKind::BucketMulti
        }
        "filter" | "global" | "missing" | "nested" | "reverse_nested" | "children"
        | "parent" | "sampler" => AggKind::BucketSingle,
        "min" | "max" | "avg" | "sum" | "value_count" | "cardinality" | "weighted_avg"
        | "median_absolute_deviation" | "simple_value" | "derivative" => AggKind::NumericSingle,
        "stats" | "extended_stats" => AggKind::NumericStats,
        "top_hits" => AggKind::TopHits,
        "percentiles" | "tdigest_percentiles" | "hdr_percentiles" | "percentile_ranks"
        | "tdigest_percentile_ranks" | "hdr_percentile_ranks" | "geo_bounds"
        | "geo_centroid" | "scripted_metric" | "matrix_stats" => AggKind::Other,
        _ => return None,
    };
    Some(kind)
}

/// Split `sterms#by_brand` into tag and name. Unknown prefixes stay in the name.
fn split_typed_key(key: &str) -> (Option<&str>, &str) {
    match key.split_once('#') {
        Some((tag, name)) if kind_of_tag(tag).is_some() => (Some(tag), name),
        _ => (None, key),
    }
}

/// Shape fallback for payloads without a `typed_keys` tag
fn kind_of_shape(body: &Map<String, Value>) -> AggKind {
    if body.contains_key("buckets") {
        AggKind::BucketMulti
    } else if body.contains_key("hits") {
        AggKind::TopHits
    } else if ["count", "min", "max", "avg", "sum"]
        .iter()
        .all(|k| body.contains_key(*k))
    {
        AggKind::NumericStats
    } else if body.contains_key("value") {
        AggKind::NumericSingle
    } else if body.contains_key("doc_count") {
        AggKind::BucketSingle
    } else {
        AggKind::Other
    }
}

pub fn decode_aggregations(
    aggs: &Map<String, Value>,
    version: ProtocolVersion,
) -> std::result::Result<Aggregations, String> {
    let mut out = Vec::with_capacity(aggs.len());
    for (key, body) in aggs {
        let (tag, name) = split_typed_key(key);
        let Some(obj) = body.as_object() else {
            return Err(format!("aggregation '{name}' is not an object"));
        };
        let kind = tag
            .and_then(kind_of_tag)
            .unwrap_or_else(|| kind_of_shape(obj));
        let aggregation = decode_aggregation(kind, obj, version)
            .map_err(|e| format!("aggregation '{name}': {e}"))?;
        out.push(NamedAggregation {
            name: name.to_string(),
            tag: tag.map(str::to_string),
            aggregation,
        });
    }
    Ok(Aggregations(out))
}

fn decode_aggregation(
    kind: AggKind,
    body: &Map<String, Value>,
    version: ProtocolVersion,
) -> std::result::Result<Aggregation, String> {
    Ok(match kind {
        AggKind::BucketMulti => {
            let buckets = match body.get("buckets") {
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|b| decode_bucket(None, b, version))
                    .collect::<std::result::Result<Vec<_>, _>>()?,
                Some(Value::Object(keyed)) => keyed
                    .iter()
                    .map(|(k, b)| decode_bucket(Some(k), b, version))
                    .collect::<std::result::Result<Vec<_>, _>>()?,
                _ => return Err("missing buckets".to_string()),
            };
            Aggregation::BucketMulti { buckets }
        }
        AggKind::BucketSingle => Aggregation::BucketSingle {
            doc_count: body.get("doc_count").and_then(Value::as_u64).unwrap_or(0),
            aggregations: decode_aggregations(&sub_aggregations(body), version)?,
        },
        AggKind::NumericSingle => Aggregation::NumericSingle {
            value: body.get("value").and_then(Value::as_f64),
            value_as_string: body
                .get("value_as_string")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        AggKind::NumericStats => Aggregation::NumericStats(Stats {
            count: body.get("count").and_then(Value::as_u64).unwrap_or(0),
            min: body.get("min").and_then(Value::as_f64),
            max: body.get("max").and_then(Value::as_f64),
            avg: body.get("avg").and_then(Value::as_f64),
            sum: body.get("sum").and_then(Value::as_f64).unwrap_or(0.0),
        }),
        AggKind::TopHits => {
            let hits = body
                .get("hits")
                .and_then(Value::as_object)
                .ok_or("missing hits")?;
            let total = match hits.get("total") {
                Some(t) => decode_total(t, version)?,
                None => TotalHits::default(),
            };
            let list = match hits.get("hits") {
                Some(list) => serde_json::from_value(list.clone()).map_err(|e| e.to_string())?,
                None => Vec::new(),
            };
            Aggregation::TopHits { total, hits: list }
        }
        AggKind::Other => Aggregation::Raw(Value::Object(body.clone())),
    })
}

fn decode_bucket(
    keyed: Option<&str>,
    body: &Value,
    version: ProtocolVersion,
) -> std::result::Result<Bucket, String> {
    let obj = body.as_object().ok_or("bucket is not an object")?;
    let key = match (obj.get("key"), keyed) {
        (Some(k), _) => k.clone(),
        (None, Some(k)) => Value::String(k.to_string()),
        (None, None) => Value::Null,
    };
    Ok(Bucket {
        key,
        key_as_string: obj
            .get("key_as_string")
            .and_then(Value::as_str)
            .map(str::to_string),
        doc_count: obj.get("doc_count").and_then(Value::as_u64).unwrap_or(0),
        aggregations: decode_aggregations(&sub_aggregations(obj), version)?,
    })
}

/// Object-valued members of a bucket that are nested aggregations
fn sub_aggregations(body: &Map<String, Value>) -> Map<String, Value> {
    body.iter()
        .filter(|(k, v)| v.is_object() && k.as_str() != "key" && k.as_str() != "meta")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn decode_suggestions(suggest: &Map<String, Value>) -> std::result::Result<Vec<Suggestion>, String> {
    suggest
        .iter()
        .map(|(key, entries)| {
            let name = key.split_once('#').map_or(key.as_str(), |(_, n)| n);
            let entries: Vec<SuggestEntry> = serde_json::from_value(entries.clone())
                .map_err(|e| format!("suggestion '{name}': {e}"))?;
            Ok(Suggestion {
                name: name.to_string(),
                entries,
            })
        })
        .collect()
}
