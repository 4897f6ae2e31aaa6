//! Minimal JSON path support for field removal
//!
//! Supports the subset the rewrite rules need: `$` root, `.name` child and
//! `..name` recursive descent. Descent walks through arrays.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{EsCompatError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Child(String),
    Descendant(String),
}

/// A compiled path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |why: &str| EsCompatError::config(format!("invalid json path '{raw}': {why}"));

        let mut rest = raw
            .strip_prefix('$')
            .ok_or_else(|| invalid("must start with '$'"))?;
        let mut segments = Vec::new();

        while !rest.is_empty() {
            let (descend, tail) = if let Some(tail) = rest.strip_prefix("..") {
                (true, tail)
            } else if let Some(tail) = rest.strip_prefix('.') {
                (false, tail)
            } else {
                return Err(invalid("expected '.' or '..'"));
            };

            let end = tail.find('.').unwrap_or(tail.len());
            let name = &tail[..end];
            if name.is_empty() {
                return Err(invalid("empty segment"));
            }
            segments.push(if descend {
                Segment::Descendant(name.to_string())
            } else {
                Segment::Child(name.to_string())
            });
            rest = &tail[end..];
        }

        if segments.is_empty() {
            return Err(invalid("root cannot be deleted"));
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Remove every member the path selects. Returns how many were removed.
    pub fn delete(&self, doc: &mut Value) -> usize {
        delete_at(doc, &self.segments)
    }
}

impl FromStr for JsonPath {
    type Err = EsCompatError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parse and delete in one step. An absent path removes nothing.
pub fn delete(doc: &mut Value, path: &str) -> Result<usize> {
    Ok(JsonPath::parse(path)?.delete(doc))
}

fn delete_at(node: &mut Value, segments: &[Segment]) -> usize {
    let Some((head, rest)) = segments.split_first() else {
        return 0;
    };

    match head {
        Segment::Child(name) if rest.is_empty() => match node {
            Value::Object(map) => usize::from(map.shift_remove(name).is_some()),
            _ => 0,
        },
        Segment::Child(name) => node
            .get_mut(name.as_str())
            .map(|child| delete_at(child, rest))
            .unwrap_or(0),
        Segment::Descendant(name) if rest.is_empty() => remove_everywhere(node, name),
        Segment::Descendant(name) => descend(node, name, rest),
    }
}

fn remove_everywhere(node: &mut Value, name: &str) -> usize {
    match node {
        Value::Object(map) => {
            let mut removed = usize::from(map.shift_remove(name).is_some());
            for child in map.values_mut() {
                removed += remove_everywhere(child, name);
            }
            removed
        }
        Value::Array(items) => items.iter_mut().map(|v| remove_everywhere(v, name)).sum(),
        _ => 0,
    }
}

fn descend(node: &mut Value, name: &str, rest: &[Segment]) -> usize {
    match node {
        Value::Object(map) => {
            let mut removed = 0;
            for (key, child) in map.iter_mut() {
                if key == name {
                    removed += delete_at(child, rest);
                }
                removed += descend(child, name, rest);
            }
            removed
        }
        Value::Array(items) => items.iter_mut().map(|v| descend(v, name, rest)).sum(),
        _ => 0,
    }
}
