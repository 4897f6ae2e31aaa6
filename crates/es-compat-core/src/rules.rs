//! Built-in translation rules
//!
//! Each rule is stateless and maps `(body, version)` to a new body. Versions
//! a rule has nothing to say about pass through unchanged.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{EsCompatError, Result};
use crate::jsonpath;
use crate::translate::TranslationRule;
use crate::version::ProtocolVersion;

const SCROLL_ENDPOINT: &str = "/_search/scroll";

/// Fields the 2.x query DSL rejects
const UNSUPPORTED_V2_3: &[&str] = &[
    "$.aggregations..date_histogram.offset",
    "$.query..ignore_unmapped",
    "$..exists.boost",
];

/// Fields the 1.x query DSL rejects
const UNSUPPORTED_V1_7: &[&str] = &[
    "$.aggregations..date_histogram.offset",
    "$..bool..boost",
    "$..bool..disable_coord",
    "$..bool..adjust_pure_negative",
    "$..ignore_unmapped",
    "$..has_parent.score",
];

const DEPRECATED_V7_9: &[&str] = &["$..bool.disable_coord"];

fn delete_all(doc: &mut Value, paths: &[&str]) -> Result<()> {
    for path in paths {
        jsonpath::delete(doc, path)?;
    }
    Ok(())
}

/// Whether any object in the tree has a member named `key`
fn has_key(doc: &Value, key: &str) -> bool {
    match doc {
        Value::Object(map) => map.contains_key(key) || map.values().any(|v| has_key(v, key)),
        Value::Array(items) => items.iter().any(|v| has_key(v, key)),
        _ => false,
    }
}

/// Keep the root `query` member and rename every nested one to `filter`.
/// 1.x `function_score` only accepts nested filters. Without a root query
/// the first one in document order is kept.
fn demote_nested_queries(doc: Value) -> Value {
    match doc {
        Value::Object(map) if map.contains_key("query") => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, rename_queries(value, &mut true)))
                .collect(),
        ),
        other => rename_queries(other, &mut false),
    }
}

/// Rename `query` members to `filter`, sparing the first one while
/// `seen_first` is false
fn rename_queries(doc: Value, seen_first: &mut bool) -> Value {
    match doc {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                let key = if key == "query" {
                    if *seen_first {
                        "filter".to_string()
                    } else {
                        *seen_first = true;
                        key
                    }
                } else {
                    key
                };
                out.insert(key, rename_queries(value, seen_first));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| rename_queries(v, seen_first))
                .collect(),
        ),
        other => other,
    }
}

/// `_uid` no longer exists on 7.x; sorting by `_id` is the replacement
fn rename_uid_sort(doc: &mut Value) {
    match doc {
        Value::Object(map) => {
            for (key, value) in map.iter_mut() {
                if key == "sort" {
                    rename_uid_in_sort_clause(value);
                }
                rename_uid_sort(value);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(rename_uid_sort),
        _ => {}
    }
}

fn rename_uid_in_sort_clause(clause: &mut Value) {
    match clause {
        Value::String(field) if field == "_uid" => *field = "_id".to_string(),
        Value::Object(map) if map.contains_key("_uid") => {
            let renamed = std::mem::take(map)
                .into_iter()
                .map(|(k, v)| if k == "_uid" { ("_id".to_string(), v) } else { (k, v) })
                .collect();
            *map = renamed;
        }
        Value::Array(items) => items.iter_mut().for_each(rename_uid_in_sort_clause),
        _ => {}
    }
}

fn newest_cleanup(mut doc: Value) -> Result<Value> {
    delete_all(&mut doc, DEPRECATED_V7_9)?;
    rename_uid_sort(&mut doc);
    Ok(doc)
}

// ============================================================================
// Query DSL
// ============================================================================

/// Strips query and aggregation fields older DSLs reject. Applies everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryDslRule;

impl TranslationRule for QueryDslRule {
    fn name(&self) -> &'static str {
        "query_dsl"
    }

    fn rewrite(&self, mut body: Value, version: ProtocolVersion) -> Result<Value> {
        match version {
            ProtocolVersion::V1_7 => {
                delete_all(&mut body, UNSUPPORTED_V1_7)?;
                if has_key(&body, "function_score") {
                    body = demote_nested_queries(body);
                }
                Ok(body)
            }
            ProtocolVersion::V2_3 => {
                delete_all(&mut body, UNSUPPORTED_V2_3)?;
                Ok(body)
            }
            ProtocolVersion::V7_9 => newest_cleanup(body),
            ProtocolVersion::V5_6 | ProtocolVersion::V6_8 => Ok(body),
        }
    }
}

// ============================================================================
// Scroll continuation
// ============================================================================

/// Scroll endpoints only. 1.x wants the bare cursor id as the body and the
/// keep-alive as a query parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrollRule;

impl ScrollRule {
    fn bare_cursor(body: &Value) -> Result<String> {
        match body.get("scroll_id") {
            Some(Value::String(id)) if !id.is_empty() => Ok(id.trim_matches('"').to_string()),
            // clear-scroll carries a list
            Some(Value::Array(ids)) if !ids.is_empty() => Ok(ids
                .iter()
                .filter_map(Value::as_str)
                .map(|id| id.trim_matches('"'))
                .collect::<Vec<_>>()
                .join(",")),
            _ => Err(EsCompatError::translation(
                "scroll",
                "scroll_id is missing from scroll body",
            )),
        }
    }

    fn is_continuation(body: &Value) -> bool {
        !matches!(body.get("scroll_id"), Some(Value::Array(_)))
    }
}

impl TranslationRule for ScrollRule {
    fn name(&self) -> &'static str {
        "scroll"
    }

    fn applies_to(&self, endpoint: &str) -> bool {
        endpoint.starts_with(SCROLL_ENDPOINT)
    }

    fn rewrite(&self, body: Value, version: ProtocolVersion) -> Result<Value> {
        match version {
            ProtocolVersion::V1_7 => Ok(Value::String(Self::bare_cursor(&body)?)),
            ProtocolVersion::V7_9 => newest_cleanup(body),
            _ => Ok(body),
        }
    }

    fn rewrite_params(
        &self,
        params: &mut BTreeMap<String, String>,
        body: &Value,
        version: ProtocolVersion,
    ) -> Result<()> {
        if !version.is_oldest() || !Self::is_continuation(body) {
            return Ok(());
        }
        match body.get("scroll").and_then(Value::as_str) {
            Some(keep_alive) if !keep_alive.is_empty() => {
                params.insert("scroll".to_string(), keep_alive.to_string());
                Ok(())
            }
            _ => Err(EsCompatError::translation(
                "scroll",
                "scroll keep-alive is missing from scroll body",
            )),
        }
    }
}

// ============================================================================
// Script fields
// ============================================================================

/// Collapses `script_fields.X.script.{source|inline}` objects into the flat
/// `{"script": "..."}` form pre-5.x clusters expect. Skips scroll endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptFieldRule;

impl ScriptFieldRule {
    fn flatten(mut body: Value) -> Value {
        let Some(fields) = body.get_mut("script_fields").and_then(Value::as_object_mut) else {
            return body;
        };
        for spec in fields.values_mut() {
            let Some(script) = spec.get("script").and_then(Value::as_object) else {
                continue;
            };
            let Some(source) = script
                .get("source")
                .or_else(|| script.get("inline"))
                .and_then(Value::as_str)
            else {
                continue;
            };

            let mut flat = Map::new();
            flat.insert("script".to_string(), Value::String(source.to_string()));
            for carried in ["params", "lang"] {
                if let Some(v) = script.get(carried) {
                    flat.insert(carried.to_string(), v.clone());
                }
            }
            *spec = Value::Object(flat);
        }
        body
    }
}

impl TranslationRule for ScriptFieldRule {
    fn name(&self) -> &'static str {
        "script_fields"
    }

    fn applies_to(&self, endpoint: &str) -> bool {
        !endpoint.starts_with(SCROLL_ENDPOINT)
    }

    fn rewrite(&self, mut body: Value, version: ProtocolVersion) -> Result<Value> {
        match version {
            ProtocolVersion::V1_7 | ProtocolVersion::V2_3 => Ok(Self::flatten(body)),
            ProtocolVersion::V7_9 => {
                delete_all(&mut body, DEPRECATED_V7_9)?;
                Ok(body)
            }
            ProtocolVersion::V5_6 | ProtocolVersion::V6_8 => Ok(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Method, WireRequest};
    use crate::translate::FilterPipeline;
    use serde_json::json;

    fn translate(endpoint: &str, body: Value, version: ProtocolVersion) -> WireRequest {
        let req = WireRequest::new(Method::Post, endpoint).with_json_body(body.to_string());
        FilterPipeline::default().translate(&req, version).unwrap()
    }

    fn body_of(req: &WireRequest) -> Value {
        serde_json::from_str(req.body.as_deref().unwrap()).unwrap()
    }

    #[test]
    fn test_v2_strips_offset_and_ignore_unmapped() {
        let out = translate(
            "/idx/_search",
            json!({
                "query": {"nested": {"path": "a", "ignore_unmapped": true, "query": {"exists": {"field": "a.b", "boost": 1.0}}}},
                "aggregations": {"days": {"date_histogram": {"field": "ts", "interval": "1d", "offset": "+1h"}}}
            }),
            ProtocolVersion::V2_3,
        );
        assert_eq!(
            body_of(&out),
            json!({
                "query": {"nested": {"path": "a", "query": {"exists": {"field": "a.b"}}}},
                "aggregations": {"days": {"date_histogram": {"field": "ts", "interval": "1d"}}}
            })
        );
    }

    #[test]
    fn test_v1_function_score_demotes_nested_query() {
        let out = translate(
            "/idx/_search",
            json!({
                "query": {"function_score": {
                    "query": {"term": {"tag": "x"}},
                    "functions": [{"weight": 2}]
                }}
            }),
            ProtocolVersion::V1_7,
        );
        assert_eq!(
            body_of(&out),
            json!({
                "query": {"function_score": {
                    "filter": {"term": {"tag": "x"}},
                    "functions": [{"weight": 2}]
                }}
            })
        );
    }

    #[test]
    fn test_v1_keeps_root_query_even_when_not_first() {
        let out = translate(
            "/idx/_search",
            json!({
                "aggregations": {"hot": {"filter": {"query": {"match": {"tag": "hot"}}}}},
                "query": {"function_score": {
                    "query": {"term": {"tag": "x"}},
                    "functions": [{"weight": 2}]
                }}
            }),
            ProtocolVersion::V1_7,
        );
        assert_eq!(
            body_of(&out),
            json!({
                "aggregations": {"hot": {"filter": {"filter": {"match": {"tag": "hot"}}}}},
                "query": {"function_score": {
                    "filter": {"term": {"tag": "x"}},
                    "functions": [{"weight": 2}]
                }}
            })
        );
    }

    #[test]
    fn test_v1_strips_bool_flags() {
        let out = translate(
            "/idx/_search",
            json!({"query": {"bool": {
                "must": [{"term": {"a": {"value": 1, "boost": 2.0}}}],
                "disable_coord": false,
                "adjust_pure_negative": true,
                "boost": 1.0
            }}}),
            ProtocolVersion::V1_7,
        );
        assert_eq!(
            body_of(&out),
            json!({"query": {"bool": {"must": [{"term": {"a": {"value": 1}}}]}}})
        );
    }

    #[test]
    fn test_v7_renames_uid_sort() {
        let out = translate(
            "/idx/_search",
            json!({"sort": [{"_uid": {"order": "desc"}}, "_uid", {"ts": "asc"}]}),
            ProtocolVersion::V7_9,
        );
        assert_eq!(
            body_of(&out),
            json!({"sort": [{"_id": {"order": "desc"}}, "_id", {"ts": "asc"}]})
        );
    }

    #[test]
    fn test_script_fields_flattened_for_old_versions() {
        let body = json!({
            "script_fields": {
                "double": {"script": {"source": "doc['n'].value * 2", "lang": "painless"}},
                "legacy": {"script": {"inline": "doc['n'].value"}}
            }
        });
        for version in [ProtocolVersion::V1_7, ProtocolVersion::V2_3] {
            let out = translate("/idx/_search", body.clone(), version);
            assert_eq!(
                body_of(&out),
                json!({
                    "script_fields": {
                        "double": {"script": "doc['n'].value * 2", "lang": "painless"},
                        "legacy": {"script": "doc['n'].value"}
                    }
                })
            );
        }
        let out = translate("/idx/_search", body.clone(), ProtocolVersion::V6_8);
        assert_eq!(body_of(&out), body);
    }

    #[test]
    fn test_v1_scroll_body_becomes_bare_cursor() {
        let out = translate(
            "/_search/scroll",
            json!({"scroll_id": "DXF1ZXJ5QW5kRmV0Y2g=", "scroll": "60000ms"}),
            ProtocolVersion::V1_7,
        );
        assert_eq!(out.body.as_deref(), Some("DXF1ZXJ5QW5kRmV0Y2g="));
        assert_eq!(out.params.get("scroll").map(String::as_str), Some("60000ms"));
    }

    #[test]
    fn test_v1_scroll_without_keep_alive_fails() {
        let req = WireRequest::new(Method::Post, "/_search/scroll")
            .with_json_body(json!({"scroll_id": "abc"}).to_string());
        let err = FilterPipeline::default()
            .translate(&req, ProtocolVersion::V1_7)
            .unwrap_err();
        assert!(matches!(err, EsCompatError::Translation { .. }));
    }

    #[test]
    fn test_v1_clear_scroll_joins_ids() {
        let req = WireRequest::new(Method::Delete, "/_search/scroll")
            .with_json_body(json!({"scroll_id": ["a", "b"]}).to_string());
        let out = FilterPipeline::default()
            .translate(&req, ProtocolVersion::V1_7)
            .unwrap();
        assert_eq!(out.body.as_deref(), Some("a,b"));
        assert!(out.params.is_empty());
    }

    #[test]
    fn test_scroll_untouched_for_mid_versions() {
        let body = json!({"scroll_id": "abc", "scroll": "1m"});
        for version in [ProtocolVersion::V2_3, ProtocolVersion::V5_6, ProtocolVersion::V6_8] {
            let out = translate("/_search/scroll", body.clone(), version);
            assert_eq!(body_of(&out), body);
            assert!(out.params.is_empty());
        }
    }
}
