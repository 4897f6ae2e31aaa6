//! # ES Compat Client
//!
//! One client API over clusters speaking any of the supported protocol
//! generations.
//!
//! - [`Dispatcher`]: validate, translate, send, classify, decode
//! - [`ConnectionCache`]: pooled connections shared by (hosts, credentials)
//! - [`HttpTransport`]: `reqwest`-backed [`Transport`](es_compat_core::Transport)
//! - [`ClientFactory`]: wires the three together from configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! let config = ClientConfig::load(Some("es-compat.toml"))?;
//! let (factory, client) = ClientFactory::connect(&config)?;
//!
//! let result = client
//!     .search(SearchRequest::new(["logs"], json!({"query": {"match_all": {}}})))
//!     .await?;
//! println!("{} hits ({:?})", result.total_hits(), result.relation());
//!
//! client.close()?;
//! factory.shutdown();
//! ```

pub mod cache;
pub mod dispatcher;
pub mod factory;
pub mod logging;
pub mod mock;
pub mod transport;

pub use cache::*;
pub use dispatcher::*;
pub use factory::*;
pub use mock::MockTransport;
pub use transport::*;
