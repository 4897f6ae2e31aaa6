//! Dispatcher assembly
//!
//! The eviction policy is chosen once, when the factory is built, and every
//! dispatcher it produces shares that cache.

use es_compat_core::config::{CacheConfig, ClientConfig, ElasticsearchConfig};
use es_compat_core::prelude::*;
use std::sync::Arc;
use tracing::info;

use crate::cache::{build_cache, ConnectionKey, SharedCache};
use crate::dispatcher::{Dispatcher, Lease};
use crate::transport::{Connector, HttpConnector, TransportSettings};

/// Builds dispatchers over one shared connection cache
#[derive(Clone)]
pub struct ClientFactory {
    cache: SharedCache,
    connector: Arc<dyn Connector>,
}

impl ClientFactory {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_cache(build_cache(config))
    }

    pub fn with_cache(cache: SharedCache) -> Self {
        Self {
            cache,
            connector: Arc::new(HttpConnector),
        }
    }

    /// Replace how connections are opened
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn dispatcher(&self, config: &ElasticsearchConfig) -> DispatcherBuilder<'_> {
        DispatcherBuilder {
            factory: self,
            config: config.clone(),
            custom_rules: Vec::new(),
            pipeline: None,
        }
    }

    /// Factory and dispatcher straight from loaded configuration
    pub fn connect(config: &ClientConfig) -> Result<(Self, Dispatcher)> {
        let factory = Self::new(&config.cache);
        let dispatcher = factory.dispatcher(&config.elasticsearch).build()?;
        Ok((factory, dispatcher))
    }

    /// Close every cached connection
    pub fn shutdown(&self) {
        self.cache.close_all();
    }
}

pub struct DispatcherBuilder<'a> {
    factory: &'a ClientFactory,
    config: ElasticsearchConfig,
    custom_rules: Vec<Box<dyn TranslationRule>>,
    pipeline: Option<FilterPipeline>,
}

impl DispatcherBuilder<'_> {
    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.config.protocol_version = version;
        self
    }

    pub fn reuse_connection(mut self, reuse: bool) -> Self {
        self.config.reuse_connection = reuse;
        self
    }

    /// Append a rule after the built-in ones
    pub fn rule(mut self, rule: impl TranslationRule + 'static) -> Self {
        self.custom_rules.push(Box::new(rule));
        self
    }

    /// Use exactly this pipeline; custom rules are ignored
    pub fn pipeline(mut self, pipeline: FilterPipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn build(self) -> Result<Dispatcher> {
        let settings = TransportSettings::from_config(&self.config)?;
        let version = self.config.protocol_version;
        let pipeline = self
            .pipeline
            .unwrap_or_else(|| FilterPipeline::with_custom(self.custom_rules));
        let connector = self.factory.connector.clone();

        let lease = if self.config.reuse_connection {
            let key = ConnectionKey::from_settings(&settings);
            // Open eagerly so bad settings fail here rather than on first call
            self.factory
                .cache
                .get_or_create(&key, &|| connector.connect(&settings))?;
            Lease::Shared {
                key,
                cache: self.factory.cache.clone(),
                settings,
                connector,
            }
        } else {
            Lease::Owned(connector.connect(&settings)?)
        };

        info!(
            version = %version,
            rules = ?pipeline.rule_names(),
            shared = self.config.reuse_connection,
            policy = ?self.factory.cache.policy(),
            "Built dispatcher"
        );
        Ok(Dispatcher::new(
            lease,
            version,
            pipeline,
            self.config.request_timeout,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use es_compat_core::config::CachePolicy;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_factory(policy: CachePolicy) -> (ClientFactory, Arc<AtomicUsize>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = opened.clone();
        let factory = ClientFactory::new(&CacheConfig {
            policy,
            idle_window: Duration::from_secs(60),
            max_connections: 8,
        })
        .with_connector(move |_: &TransportSettings| -> Result<SharedTransport> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockTransport::fixed(
                200,
                r#"{"name":"n","cluster_name":"c","version":{"number":"6.8.0"}}"#,
            )))
        });
        (factory, opened)
    }

    #[tokio::test]
    async fn test_shared_dispatchers_reuse_one_connection() {
        let (factory, opened) = counting_factory(CachePolicy::Always);
        let config = ElasticsearchConfig::default();

        let a = factory.dispatcher(&config).build().unwrap();
        let b = factory
            .dispatcher(&config)
            .version(ProtocolVersion::V7_9)
            .build()
            .unwrap();
        a.ping().await.unwrap();
        b.ping().await.unwrap();

        assert!(a.is_shared());
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(factory.cache().len(), 1);

        a.close().unwrap();
        b.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_reuse_disabled_opens_private_connection() {
        let (factory, opened) = counting_factory(CachePolicy::Recency);
        let config = ElasticsearchConfig::default();

        let a = factory
            .dispatcher(&config)
            .reuse_connection(false)
            .build()
            .unwrap();
        let _b = factory
            .dispatcher(&config)
            .reuse_connection(false)
            .build()
            .unwrap();

        assert!(!a.is_shared());
        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert!(factory.cache().is_empty());
    }

    #[tokio::test]
    async fn test_shared_lease_reopens_after_eviction() {
        let (factory, opened) = counting_factory(CachePolicy::FrequencyRecency);
        let d = factory
            .dispatcher(&ElasticsearchConfig::default())
            .build()
            .unwrap();
        factory.shutdown();
        d.ping().await.unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 2);
    }

    struct Tag;

    impl TranslationRule for Tag {
        fn name(&self) -> &'static str {
            "tag"
        }

        fn rewrite(&self, mut body: Value, _version: ProtocolVersion) -> Result<Value> {
            body["tagged"] = Value::Bool(true);
            Ok(body)
        }
    }

    #[test]
    fn test_custom_rules_follow_builtins() {
        let (factory, _) = counting_factory(CachePolicy::Always);
        let d = factory
            .dispatcher(&ElasticsearchConfig::default())
            .rule(Tag)
            .build()
            .unwrap();
        assert_eq!(
            d.pipeline().rule_names(),
            vec!["query_dsl", "scroll", "script_fields", "tag"]
        );
    }
}
