//! Strategy traits for the ES compat client
//!
//! The transport is the seam between version handling and socket I/O: the
//! dispatcher only ever sees [`Transport`], and the connection cache only
//! ever closes one.
//!
//! ```text
//! Dispatcher ──► FilterPipeline ──► Transport ──► decode
//!                                      ▲
//!                               ConnectionCache
//! ```

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::request::{RawResponse, WireRequest};

/// Pooled connection to a cluster
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and read the full response.
    ///
    /// Non-2xx statuses are returned as data; only failures to get a
    /// response at all are errors.
    async fn perform(&self, request: &WireRequest) -> Result<RawResponse>;

    /// Release the pool. Idempotent; later `perform` calls fail.
    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Label for logs
    fn describe(&self) -> String;
}

pub type SharedTransport = Arc<dyn Transport>;

/// Health check capability
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Returns Ok(()) if healthy, Err with details if not.
    async fn health_check(&self) -> Result<()>;

    fn component_name(&self) -> &'static str;
}
