//! # ES Compat Writer
//!
//! Fire-and-forget document writes against any supported Elasticsearch
//! generation, batched through the bulk endpoint.
//!
//! ## Layers
//!
//! - [`DocumentWriter`]: document-level API (id extraction, index and type
//!   defaults)
//! - [`BulkPipeline`]: batching, flush triggers, selective resubmission
//!   and draining on close
//!
//! Terminal failures never reach the producer. They are logged and kept in
//! the pipeline's [`FailureLog`].

pub mod batcher;
pub mod classify;
pub mod failure_log;
pub mod operation;
pub mod pipeline;
pub mod retry;

pub use batcher::*;
pub use classify::*;
pub use failure_log::*;
pub use operation::*;
pub use pipeline::*;
pub use retry::*;

use es_compat_client::Dispatcher;
use es_compat_core::config::BulkConfig;
use es_compat_core::prelude::*;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Writes whole documents into one index
pub struct DocumentWriter {
    pipeline: BulkPipeline,
    index: String,
    doc_type: Option<String>,
    id_field: String,
    keep_id: bool,
}

impl DocumentWriter {
    /// Writer for `bulk.index` / `bulk.doc_type` from configuration
    pub fn new(dispatcher: Dispatcher, config: &BulkConfig) -> Result<Self> {
        let index = config
            .index
            .clone()
            .filter(|i| !i.is_empty())
            .ok_or_else(|| EsCompatError::config("bulk.index is required for the document writer"))?;
        let doc_type = config.doc_type.clone();
        Ok(Self::for_index(dispatcher, index, doc_type, config))
    }

    pub fn for_index(
        dispatcher: Dispatcher,
        index: impl Into<String>,
        doc_type: Option<String>,
        config: &BulkConfig,
    ) -> Self {
        Self::with_pipeline(BulkPipeline::new(dispatcher, config), index, doc_type, config)
    }

    pub fn with_listener(
        dispatcher: Dispatcher,
        index: impl Into<String>,
        doc_type: Option<String>,
        config: &BulkConfig,
        listener: Arc<dyn BulkListener>,
    ) -> Self {
        Self::with_pipeline(
            BulkPipeline::with_listener(dispatcher, config, listener),
            index,
            doc_type,
            config,
        )
    }

    fn with_pipeline(
        pipeline: BulkPipeline,
        index: impl Into<String>,
        doc_type: Option<String>,
        config: &BulkConfig,
    ) -> Self {
        Self {
            pipeline,
            index: index.into(),
            doc_type,
            id_field: config.id_field.clone(),
            keep_id: config.keep_id,
        }
    }

    /// Index or create `doc`, optionally under a parent document
    pub fn add_doc(&self, mut doc: Value, mode: IndexMode, parent: Option<&str>) -> Result<()> {
        let id = self.take_id(&mut doc)?;
        let op = match mode {
            IndexMode::Index => BulkOperation::index(&self.index, id, doc),
            IndexMode::Create => BulkOperation::create(&self.index, id, doc),
        };
        self.submit(op, parent)
    }

    /// Partial update of an existing document
    pub fn update_doc(&self, mut doc: Value, parent: Option<&str>) -> Result<()> {
        let id = self.take_id(&mut doc)?;
        self.submit(BulkOperation::update(&self.index, id, doc), parent)
    }

    /// Apply `update` when the document exists, otherwise insert `insert`.
    /// Both bodies must carry the id; the update body's id is used.
    pub fn upsert_doc(&self, mut insert: Value, mut update: Value, parent: Option<&str>) -> Result<()> {
        self.take_id(&mut insert)?;
        let id = self.take_id(&mut update)?;
        self.submit(BulkOperation::upsert(&self.index, id, update, insert), parent)
    }

    /// Upsert with the same body for both halves
    pub fn upsert_one(&self, doc: Value, parent: Option<&str>) -> Result<()> {
        self.upsert_doc(doc.clone(), doc, parent)
    }

    pub fn delete_doc(&self, id: impl Into<String>, parent: Option<&str>) -> Result<()> {
        self.submit(BulkOperation::delete(&self.index, id), parent)
    }

    pub async fn flush(&self) -> Result<()> {
        self.pipeline.flush().await
    }

    pub async fn close(&self) -> Result<()> {
        self.pipeline.close().await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.pipeline.stats()
    }

    pub fn failures(&self) -> &FailureLog {
        self.pipeline.failures()
    }

    pub fn pipeline(&self) -> &BulkPipeline {
        &self.pipeline
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    fn submit(&self, mut op: BulkOperation, parent: Option<&str>) -> Result<()> {
        if let Some(t) = &self.doc_type {
            op = op.with_type(t.clone());
        }
        if let Some(parent) = parent {
            op = op.with_parent(parent);
        }
        self.pipeline.add(op)
    }

    /// Read the id from the configured field, stripping it when `keep_id`
    /// is off
    fn take_id(&self, doc: &mut Value) -> Result<String> {
        let Some(body) = doc.as_object_mut() else {
            return Err(EsCompatError::validation(vec![Violation::MissingId]));
        };
        let id = match body.get(&self.id_field) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(EsCompatError::validation(vec![Violation::MissingId])),
        };
        if !self.keep_id {
            body.remove(&self.id_field);
            body.remove("_id");
        }
        debug!(index = %self.index, id = %id, "Queued document");
        Ok(id)
    }
}
