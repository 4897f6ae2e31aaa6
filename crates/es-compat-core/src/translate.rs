//! Outbound request translation
//!
//! A [`FilterPipeline`] runs an ordered list of [`TranslationRule`]s over a
//! request body. The body is parsed once, handed from rule to rule as a
//! [`Value`] and rendered once at the end. The caller's request is never
//! touched; a new [`WireRequest`] comes back.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{EsCompatError, Result, Violation};
use crate::request::{BodyKind, WireRequest};
use crate::rules::{QueryDslRule, ScriptFieldRule, ScrollRule};
use crate::version::ProtocolVersion;

/// A pure rewrite of one request body for one protocol generation
pub trait TranslationRule: Send + Sync {
    /// Short identifier used in logs and errors
    fn name(&self) -> &'static str;

    /// Endpoint gate; rules that return false are skipped entirely
    fn applies_to(&self, _endpoint: &str) -> bool {
        true
    }

    /// Rewrite the body
    fn rewrite(&self, body: Value, version: ProtocolVersion) -> Result<Value>;

    /// Adjust query parameters. Sees the body as it was before this rule's
    /// own rewrite.
    fn rewrite_params(
        &self,
        _params: &mut BTreeMap<String, String>,
        _body: &Value,
        _version: ProtocolVersion,
    ) -> Result<()> {
        Ok(())
    }
}

/// Ordered, immutable rule list
#[derive(Clone)]
pub struct FilterPipeline {
    rules: Arc<[Box<dyn TranslationRule>]>,
}

impl FilterPipeline {
    pub fn new(rules: Vec<Box<dyn TranslationRule>>) -> Self {
        Self {
            rules: rules.into(),
        }
    }

    /// The built-in rules in their required order
    pub fn default_rules() -> Vec<Box<dyn TranslationRule>> {
        vec![
            Box::new(QueryDslRule),
            Box::new(ScrollRule),
            Box::new(ScriptFieldRule),
        ]
    }

    /// Built-in rules followed by `custom`
    pub fn with_custom(custom: Vec<Box<dyn TranslationRule>>) -> Self {
        let mut rules = Self::default_rules();
        rules.extend(custom);
        Self::new(rules)
    }

    /// Pipeline that passes everything through unchanged
    pub fn passthrough() -> Self {
        Self::new(Vec::new())
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Produce the wire form of `request` for `version`
    pub fn translate(&self, request: &WireRequest, version: ProtocolVersion) -> Result<WireRequest> {
        let mut out = request.clone();
        if out.body_kind == BodyKind::NdJson || !request.has_body() {
            return Ok(out);
        }
        let Some(original) = request.body.as_deref() else {
            return Ok(out);
        };

        let active: Vec<&dyn TranslationRule> = self
            .rules
            .iter()
            .map(|r| &**r)
            .filter(|r| r.applies_to(&request.endpoint))
            .collect();
        if active.is_empty() {
            return Ok(out);
        }

        let mut doc: Value = serde_json::from_str(original).map_err(|e| {
            EsCompatError::validation(vec![Violation::Other(format!(
                "request body is not valid JSON: {e}"
            ))])
        })?;

        for rule in active {
            rule.rewrite_params(&mut out.params, &doc, version)?;
            doc = rule.rewrite(doc, version)?;
            if is_empty_body(&doc) {
                return Err(EsCompatError::translation(
                    rule.name(),
                    format!("non-empty body for {} became empty", request.endpoint),
                ));
            }
            trace!(rule = rule.name(), version = %version, "Applied translation rule");
        }

        let rendered = match doc {
            Value::String(bare) => bare,
            other => other.to_string(),
        };
        if rendered != original {
            debug!(endpoint = %request.endpoint, version = %version, "Translated request body");
        }
        out.body = Some(rendered);
        Ok(out)
    }
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self::new(Self::default_rules())
    }
}

impl fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("rules", &self.rule_names())
            .finish()
    }
}

fn is_empty_body(doc: &Value) -> bool {
    match doc {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;
    use serde_json::json;

    struct Blank;

    impl TranslationRule for Blank {
        fn name(&self) -> &'static str {
            "blank"
        }

        fn rewrite(&self, _body: Value, _version: ProtocolVersion) -> Result<Value> {
            Ok(Value::String(String::new()))
        }
    }

    struct TagParams;

    impl TranslationRule for TagParams {
        fn name(&self) -> &'static str {
            "tag"
        }

        fn applies_to(&self, endpoint: &str) -> bool {
            endpoint.ends_with("_search")
        }

        fn rewrite(&self, mut body: Value, _version: ProtocolVersion) -> Result<Value> {
            body["tagged"] = json!(true);
            Ok(body)
        }

        fn rewrite_params(
            &self,
            params: &mut BTreeMap<String, String>,
            body: &Value,
            _version: ProtocolVersion,
        ) -> Result<()> {
            // Sees the pre-rewrite body
            assert!(body.get("tagged").is_none());
            params.insert("tagged".into(), "1".into());
            Ok(())
        }
    }

    fn search(body: Value) -> WireRequest {
        WireRequest::new(Method::Post, "/idx/_search").with_json_body(body.to_string())
    }

    #[test]
    fn test_default_order() {
        assert_eq!(
            FilterPipeline::default().rule_names(),
            vec!["query_dsl", "scroll", "script_fields"]
        );
    }

    #[test]
    fn test_input_is_not_mutated() {
        let body = json!({"query": {"bool": {"disable_coord": true}}});
        let req = search(body.clone());
        let out = FilterPipeline::default()
            .translate(&req, ProtocolVersion::V7_9)
            .unwrap();
        assert_eq!(req.body.as_deref(), Some(body.to_string().as_str()));
        assert_eq!(out.body.as_deref(), Some(r#"{"query":{"bool":{}}}"#));
    }

    #[test]
    fn test_emptied_body_fails_loudly() {
        let pipeline = FilterPipeline::new(vec![Box::new(Blank)]);
        let err = pipeline
            .translate(&search(json!({"size": 1})), ProtocolVersion::V5_6)
            .unwrap_err();
        assert!(matches!(err, EsCompatError::Translation { ref rule, .. } if rule == "blank"));
    }

    #[test]
    fn test_custom_rules_follow_defaults_and_respect_gate() {
        let pipeline = FilterPipeline::with_custom(vec![Box::new(TagParams)]);
        assert_eq!(pipeline.len(), 4);

        let out = pipeline
            .translate(&search(json!({"size": 1})), ProtocolVersion::V5_6)
            .unwrap();
        assert_eq!(out.params.get("tagged").map(String::as_str), Some("1"));

        let count = WireRequest::new(Method::Post, "/idx/_count").with_json_body("{}");
        let out = pipeline.translate(&count, ProtocolVersion::V5_6).unwrap();
        assert!(out.params.is_empty());
    }

    #[test]
    fn test_ndjson_and_bodyless_pass_through() {
        let pipeline = FilterPipeline::new(vec![Box::new(Blank)]);
        let bulk = WireRequest::new(Method::Post, "/_bulk").with_ndjson_body("{\"index\":{}}\n{}\n");
        assert_eq!(pipeline.translate(&bulk, ProtocolVersion::V1_7).unwrap(), bulk);

        let get = WireRequest::new(Method::Get, "/idx/doc/1");
        assert_eq!(pipeline.translate(&get, ProtocolVersion::V1_7).unwrap(), get);
    }

    #[test]
    fn test_invalid_json_is_validation_error() {
        let req = WireRequest::new(Method::Post, "/_search").with_json_body("{oops");
        let err = FilterPipeline::default()
            .translate(&req, ProtocolVersion::V2_3)
            .unwrap_err();
        assert!(matches!(err, EsCompatError::Validation { .. }));
    }
}
