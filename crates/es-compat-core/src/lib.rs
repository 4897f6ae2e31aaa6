//! # ES Compat Core
//!
//! Version-aware building blocks for talking to search clusters whose wire
//! protocol changed across generations.
//!
//! - [`version`]: the supported protocol generations
//! - [`action`]: typed requests and their canonical wire form
//! - [`translate`] and [`rules`]: outbound rewrite pipeline
//! - [`decode`] and [`response`]: inbound decoding into one result model
//! - [`strategy`]: the transport seam
//!
//! ## Architecture
//!
//! ```text
//! ActionRequest ──► to_wire ──► FilterPipeline ──► Transport
//!                                                     │
//! CanonicalResult ◄────────── decode ◄──── RawResponse┘
//! ```

pub mod action;
pub mod config;
pub mod decode;
pub mod error;
pub mod jsonpath;
pub mod metrics;
pub mod request;
pub mod response;
pub mod rules;
pub mod strategy;
pub mod translate;
pub mod version;

pub use action::*;
pub use config::*;
pub use error::*;
pub use metrics::*;
pub use request::*;
pub use response::*;
pub use strategy::*;
pub use translate::*;
pub use version::*;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::action::{
        ActionRequest, BulkRequest, ClearScrollRequest, DeleteRequest, GetRequest, PingRequest,
        ScrollRequest, SearchRequest,
    };
    pub use crate::config::ClientConfig;
    pub use crate::error::{EsCompatError, Result, Violation};
    pub use crate::request::{Method, RawResponse, WireRequest};
    pub use crate::response::{CanonicalResult, Relation, SearchCursor, TotalHits};
    pub use crate::strategy::{HealthCheck, SharedTransport, Transport};
    pub use crate::translate::{FilterPipeline, TranslationRule};
    pub use crate::version::ProtocolVersion;
}
