//! Bulk write operations and their NDJSON form
//!
//! Each operation renders as an action line, plus a source line for
//! everything but deletes. The action line's metadata depends on the
//! protocol generation:
//!
//! | Generation   | `_type` | parent link |
//! |--------------|---------|-------------|
//! | 1.7 ... 5.6  | yes     | `_parent`   |
//! | 6.8          | yes     | `parent`    |
//! | 7.9          | no      | `routing`   |

use es_compat_core::prelude::*;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexMode {
    /// Create or replace
    #[default]
    Index,
    /// Fail if the id exists
    Create,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    Index { mode: IndexMode, source: Value },
    Update { doc: Value, upsert: Option<Value> },
    Delete,
}

/// One queued write
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOperation {
    pub index: String,
    pub doc_type: Option<String>,
    pub id: String,
    pub parent: Option<String>,
    pub kind: OpKind,
    /// Times this operation was resubmitted after a retryable failure
    pub attempts: u32,
}

impl BulkOperation {
    fn with_kind(index: impl Into<String>, id: impl Into<String>, kind: OpKind) -> Self {
        Self {
            index: index.into(),
            doc_type: None,
            id: id.into(),
            parent: None,
            kind,
            attempts: 0,
        }
    }

    pub fn index(index: impl Into<String>, id: impl Into<String>, source: Value) -> Self {
        Self::with_kind(
            index,
            id,
            OpKind::Index {
                mode: IndexMode::Index,
                source,
            },
        )
    }

    pub fn create(index: impl Into<String>, id: impl Into<String>, source: Value) -> Self {
        Self::with_kind(
            index,
            id,
            OpKind::Index {
                mode: IndexMode::Create,
                source,
            },
        )
    }

    /// Partial update of an existing document
    pub fn update(index: impl Into<String>, id: impl Into<String>, doc: Value) -> Self {
        Self::with_kind(index, id, OpKind::Update { doc, upsert: None })
    }

    /// Partial update, inserting `upsert` when the document is absent
    pub fn upsert(
        index: impl Into<String>,
        id: impl Into<String>,
        doc: Value,
        upsert: Value,
    ) -> Self {
        Self::with_kind(
            index,
            id,
            OpKind::Update {
                doc,
                upsert: Some(upsert),
            },
        )
    }

    pub fn delete(index: impl Into<String>, id: impl Into<String>) -> Self {
        Self::with_kind(index, id, OpKind::Delete)
    }

    pub fn with_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Action key in the bulk body and response
    pub fn action(&self) -> &'static str {
        match &self.kind {
            OpKind::Index {
                mode: IndexMode::Index,
                ..
            } => "index",
            OpKind::Index {
                mode: IndexMode::Create,
                ..
            } => "create",
            OpKind::Update { .. } => "update",
            OpKind::Delete => "delete",
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.kind, OpKind::Delete)
    }

    /// Shape complaints for `version`
    pub fn violations(&self, version: ProtocolVersion) -> Vec<Violation> {
        let mut violations = Vec::new();
        if self.index.is_empty() {
            violations.push(Violation::MissingIndex);
        }
        if version.has_doc_types() && self.doc_type.as_deref().map_or(true, str::is_empty) {
            violations.push(Violation::MissingType);
        }
        if self.id.is_empty() {
            violations.push(Violation::MissingId);
        }
        violations
    }

    /// Append this operation's NDJSON lines to `out`
    pub fn render_into(&self, version: ProtocolVersion, out: &mut String) -> Result<()> {
        let mut meta = Map::new();
        meta.insert("_index".into(), json!(self.index));
        if version.has_doc_types() {
            if let Some(t) = &self.doc_type {
                meta.insert("_type".into(), json!(t));
            }
        }
        meta.insert("_id".into(), json!(self.id));
        if let Some(parent) = &self.parent {
            meta.insert(parent_key(version).into(), json!(parent));
        }

        let mut action = Map::new();
        action.insert(self.action().into(), Value::Object(meta));
        push_line(out, &Value::Object(action))?;

        match &self.kind {
            OpKind::Index { source, .. } => push_line(out, source),
            OpKind::Update { doc, upsert } => {
                let mut body = json!({ "doc": doc });
                if let Some(upsert) = upsert {
                    body["upsert"] = upsert.clone();
                }
                push_line(out, &body)
            }
            OpKind::Delete => Ok(()),
        }
    }

    pub fn render(&self, version: ProtocolVersion) -> Result<String> {
        let mut out = String::new();
        self.render_into(version, &mut out)?;
        Ok(out)
    }
}

fn parent_key(version: ProtocolVersion) -> &'static str {
    match version {
        ProtocolVersion::V1_7 | ProtocolVersion::V2_3 | ProtocolVersion::V5_6 => "_parent",
        ProtocolVersion::V6_8 => "parent",
        ProtocolVersion::V7_9 => "routing",
    }
}

fn push_line(out: &mut String, value: &Value) -> Result<()> {
    let line = serde_json::to_string(value)
        .map_err(|e| EsCompatError::Internal(format!("failed to render bulk line: {e}")))?;
    out.push_str(&line);
    out.push('\n');
    Ok(())
}
