//! Shared connection cache
//!
//! Clients pointed at the same hosts with the same credentials share one
//! pooled transport. Three interchangeable policies decide when an idle
//! connection is dropped; dropping always closes it.
//!
//! - [`AlwaysCache`]: never evicts
//! - [`RecencyCache`]: evicts after an idle window since last access
//! - [`FrequencyRecencyCache`]: window TinyLFU admission (via `moka`) with the
//!   same idle expiry

use es_compat_core::config::{CacheConfig, CachePolicy};
use es_compat_core::metrics::CacheMetrics;
use es_compat_core::prelude::*;
use moka::notification::RemovalCause;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::transport::TransportSettings;

/// Cache identity: host set plus credentials
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    hosts: Vec<String>,
    username: Option<String>,
    secret_digest: u64,
}

impl ConnectionKey {
    pub fn from_settings(settings: &TransportSettings) -> Self {
        let mut hosts: Vec<String> = settings.hosts.iter().map(|h| h.to_string()).collect();
        hosts.sort();
        hosts.dedup();

        let mut hasher = DefaultHasher::new();
        settings.password.hash(&mut hasher);

        Self {
            hosts,
            username: settings.username.clone(),
            secret_digest: hasher.finish(),
        }
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }
}

impl fmt::Debug for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionKey")
            .field("hosts", &self.hosts)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.username {
            Some(user) => write!(f, "{}@{}", user, self.hosts.join(",")),
            None => f.write_str(&self.hosts.join(",")),
        }
    }
}

/// Creates a transport on a cache miss
pub type CreateFn<'a> = &'a (dyn Fn() -> Result<SharedTransport> + Send + Sync);

/// Keyed store of pooled connections
pub trait ConnectionCache: Send + Sync {
    fn policy(&self) -> CachePolicy;

    /// Lookup; counts as an access
    fn get(&self, key: &ConnectionKey) -> Option<SharedTransport>;

    /// Insert, closing any different connection previously under `key`
    fn put(&self, key: ConnectionKey, conn: SharedTransport);

    /// Record an access without reading
    fn touch(&self, key: &ConnectionKey);

    /// Presence check; not an access
    fn contains(&self, key: &ConnectionKey) -> bool;

    /// Lookup, creating on a miss. At most one creation runs per key at a
    /// time, so concurrent first use yields a single connection.
    fn get_or_create(&self, key: &ConnectionKey, create: CreateFn<'_>) -> Result<SharedTransport>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict and close everything
    fn close_all(&self);
}

pub type SharedCache = Arc<dyn ConnectionCache>;

/// Build the cache selected by configuration
pub fn build_cache(config: &CacheConfig) -> SharedCache {
    match config.policy {
        CachePolicy::Always => Arc::new(AlwaysCache::new()),
        CachePolicy::Recency => Arc::new(RecencyCache::new(config.idle_window)),
        CachePolicy::FrequencyRecency => Arc::new(FrequencyRecencyCache::new(
            config.idle_window,
            config.max_connections,
        )),
    }
}

/// Close an evicted connection; failures are logged, never raised
fn close_evicted(key: &ConnectionKey, conn: &SharedTransport, reason: &str) {
    match conn.close() {
        Ok(()) => debug!(key = %key, reason, "Closed evicted connection"),
        Err(e) => warn!(key = %key, reason, error = %e, "Failed to close evicted connection"),
    }
}

/// Per-key creation locks. The entry map lock is never held across a
/// create call, only the lock for the key being created.
#[derive(Default)]
struct CreationLocks {
    slots: Mutex<HashMap<ConnectionKey, Arc<Mutex<()>>>>,
}

impl CreationLocks {
    fn with_lock<T>(&self, key: &ConnectionKey, f: impl FnOnce() -> T) -> T {
        let slot = self.slots.lock().entry(key.clone()).or_default().clone();
        let out = {
            let _guard = slot.lock();
            f()
        };
        // Clones are only taken under `slots`, so a count of two means no waiter
        let mut slots = self.slots.lock();
        if Arc::strong_count(&slot) == 2 {
            slots.remove(key);
        }
        out
    }
}

// ============================================================================
// Always
// ============================================================================

/// Never evicts
pub struct AlwaysCache {
    entries: Mutex<HashMap<ConnectionKey, SharedTransport>>,
    creating: CreationLocks,
    metrics: CacheMetrics,
}

impl AlwaysCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            creating: CreationLocks::default(),
            metrics: CacheMetrics::new("always"),
        }
    }
}

impl Default for AlwaysCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionCache for AlwaysCache {
    fn policy(&self) -> CachePolicy {
        CachePolicy::Always
    }

    fn get(&self, key: &ConnectionKey) -> Option<SharedTransport> {
        self.entries.lock().get(key).cloned()
    }

    fn put(&self, key: ConnectionKey, conn: SharedTransport) {
        let replaced = self.entries.lock().insert(key.clone(), conn.clone());
        if let Some(old) = replaced.filter(|old| !Arc::ptr_eq(old, &conn)) {
            close_evicted(&key, &old, "replaced");
        }
    }

    fn touch(&self, _key: &ConnectionKey) {}

    fn contains(&self, key: &ConnectionKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn get_or_create(&self, key: &ConnectionKey, create: CreateFn<'_>) -> Result<SharedTransport> {
        if let Some(conn) = self.get(key) {
            self.metrics.record_hit();
            return Ok(conn);
        }
        self.creating.with_lock(key, || {
            // Another caller may have finished while we waited
            if let Some(conn) = self.get(key) {
                self.metrics.record_hit();
                return Ok(conn);
            }
            self.metrics.record_miss();
            let conn = create()?;
            let size = {
                let mut entries = self.entries.lock();
                entries.insert(key.clone(), conn.clone());
                entries.len()
            };
            self.metrics.set_size(size as u64);
            debug!(key = %key, "Cached new connection");
            Ok(conn)
        })
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn close_all(&self) {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        for (key, conn) in &drained {
            close_evicted(key, conn, "shutdown");
        }
        self.metrics.set_size(0);
    }
}

// ============================================================================
// Recency-bounded
// ============================================================================

struct RecencyEntry {
    conn: SharedTransport,
    last_access: Instant,
}

/// Evicts entries idle longer than the window. Expiry is checked on every
/// operation; [`RecencyCache::sweep`] forces a pass.
pub struct RecencyCache {
    entries: Mutex<HashMap<ConnectionKey, RecencyEntry>>,
    creating: CreationLocks,
    idle_window: Duration,
    metrics: CacheMetrics,
}

impl RecencyCache {
    pub fn new(idle_window: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            creating: CreationLocks::default(),
            idle_window,
            metrics: CacheMetrics::new("recency"),
        }
    }

    pub fn idle_window(&self) -> Duration {
        self.idle_window
    }

    /// Remove expired entries from the locked map. Caller closes them after
    /// releasing the lock.
    fn take_expired(
        &self,
        entries: &mut HashMap<ConnectionKey, RecencyEntry>,
    ) -> Vec<(ConnectionKey, SharedTransport)> {
        let now = Instant::now();
        let expired: Vec<ConnectionKey> = entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_access) > self.idle_window)
            .map(|(k, _)| k.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|k| entries.remove(&k).map(|e| (k, e.conn)))
            .collect()
    }

    fn close_all_of(&self, evicted: Vec<(ConnectionKey, SharedTransport)>) {
        for (key, conn) in &evicted {
            self.metrics.record_eviction();
            close_evicted(key, conn, "idle");
        }
    }

    /// Evict everything idle past the window
    pub fn sweep(&self) {
        let evicted = {
            let mut entries = self.entries.lock();
            let evicted = self.take_expired(&mut entries);
            self.metrics.set_size(entries.len() as u64);
            evicted
        };
        self.close_all_of(evicted);
    }
}

impl ConnectionCache for RecencyCache {
    fn policy(&self) -> CachePolicy {
        CachePolicy::Recency
    }

    fn get(&self, key: &ConnectionKey) -> Option<SharedTransport> {
        let (found, evicted) = {
            let mut entries = self.entries.lock();
            let evicted = self.take_expired(&mut entries);
            let found = entries.get_mut(key).map(|e| {
                e.last_access = Instant::now();
                e.conn.clone()
            });
            (found, evicted)
        };
        self.close_all_of(evicted);
        found
    }

    fn put(&self, key: ConnectionKey, conn: SharedTransport) {
        let (replaced, evicted) = {
            let mut entries = self.entries.lock();
            let evicted = self.take_expired(&mut entries);
            let replaced = entries.insert(
                key.clone(),
                RecencyEntry {
                    conn: conn.clone(),
                    last_access: Instant::now(),
                },
            );
            (replaced, evicted)
        };
        self.close_all_of(evicted);
        if let Some(old) = replaced.filter(|old| !Arc::ptr_eq(&old.conn, &conn)) {
            close_evicted(&key, &old.conn, "replaced");
        }
    }

    fn touch(&self, key: &ConnectionKey) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.last_access = Instant::now();
        }
    }

    fn contains(&self, key: &ConnectionKey) -> bool {
        self.sweep();
        self.entries.lock().contains_key(key)
    }

    fn get_or_create(&self, key: &ConnectionKey, create: CreateFn<'_>) -> Result<SharedTransport> {
        if let Some(conn) = self.get(key) {
            self.metrics.record_hit();
            return Ok(conn);
        }
        self.creating.with_lock(key, || {
            if let Some(conn) = self.get(key) {
                self.metrics.record_hit();
                return Ok(conn);
            }
            self.metrics.record_miss();
            let conn = create()?;
            let (size, evicted) = {
                let mut entries = self.entries.lock();
                let evicted = self.take_expired(&mut entries);
                entries.insert(
                    key.clone(),
                    RecencyEntry {
                        conn: conn.clone(),
                        last_access: Instant::now(),
                    },
                );
                (entries.len(), evicted)
            };
            self.metrics.set_size(size as u64);
            self.close_all_of(evicted);
            debug!(key = %key, "Cached new connection");
            Ok(conn)
        })
    }

    fn len(&self) -> usize {
        self.sweep();
        self.entries.lock().len()
    }

    fn close_all(&self) {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        for (key, entry) in &drained {
            close_evicted(key, &entry.conn, "shutdown");
        }
        self.metrics.set_size(0);
    }
}

// ============================================================================
// Frequency + recency
// ============================================================================

/// Window TinyLFU cache with time-to-idle expiry
pub struct FrequencyRecencyCache {
    inner: moka::sync::Cache<ConnectionKey, SharedTransport>,
    metrics: CacheMetrics,
}

impl FrequencyRecencyCache {
    pub fn new(idle_window: Duration, max_connections: u64) -> Self {
        let metrics = CacheMetrics::new("frequency_recency");
        let listener_metrics = metrics.clone();
        let inner = moka::sync::Cache::builder()
            .max_capacity(max_connections)
            .time_to_idle(idle_window)
            .eviction_listener(move |key: Arc<ConnectionKey>, conn: SharedTransport, cause| {
                let reason = match cause {
                    RemovalCause::Expired => "idle",
                    RemovalCause::Size => "capacity",
                    RemovalCause::Replaced => "replaced",
                    RemovalCause::Explicit => "explicit",
                };
                if cause.was_evicted() {
                    listener_metrics.record_eviction();
                }
                close_evicted(&key, &conn, reason);
            })
            .build();
        Self { inner, metrics }
    }

    /// Run moka's pending maintenance, delivering due evictions
    pub fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks();
    }
}

impl ConnectionCache for FrequencyRecencyCache {
    fn policy(&self) -> CachePolicy {
        CachePolicy::FrequencyRecency
    }

    fn get(&self, key: &ConnectionKey) -> Option<SharedTransport> {
        self.inner.get(key)
    }

    fn put(&self, key: ConnectionKey, conn: SharedTransport) {
        // Re-inserting the same connection must not close it via the listener
        match self.inner.get(&key) {
            Some(existing) if Arc::ptr_eq(&existing, &conn) => {}
            _ => self.inner.insert(key, conn),
        }
    }

    fn touch(&self, key: &ConnectionKey) {
        let _ = self.inner.get(key);
    }

    fn contains(&self, key: &ConnectionKey) -> bool {
        self.inner.contains_key(key)
    }

    fn get_or_create(&self, key: &ConnectionKey, create: CreateFn<'_>) -> Result<SharedTransport> {
        let mut created = false;
        let result = self.inner.try_get_with(key.clone(), || {
            created = true;
            create()
        });
        if created {
            self.metrics.record_miss();
            debug!(key = %key, "Cached new connection");
        } else {
            self.metrics.record_hit();
        }
        result.map_err(|shared| {
            Arc::try_unwrap(shared).unwrap_or_else(|e| EsCompatError::transport(e.to_string()))
        })
    }

    fn len(&self) -> usize {
        self.inner.run_pending_tasks();
        self.inner.entry_count() as usize
    }

    fn close_all(&self) {
        let keys: Vec<Arc<ConnectionKey>> = self.inner.iter().map(|(k, _)| k).collect();
        for key in keys {
            self.inner.invalidate(&*key);
        }
        self.inner.run_pending_tasks();
        self.metrics.set_size(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use url::Url;

    fn key(host: &str, user: Option<&str>, password: Option<&str>) -> ConnectionKey {
        ConnectionKey::from_settings(&TransportSettings {
            hosts: vec![Url::parse(host).unwrap()],
            username: user.map(str::to_string),
            password: password.map(str::to_string),
            connect_timeout: Duration::from_secs(1),
            socket_timeout: Duration::from_secs(1),
        })
    }

    fn caches(idle: Duration) -> Vec<SharedCache> {
        vec![
            Arc::new(AlwaysCache::new()),
            Arc::new(RecencyCache::new(idle)),
            Arc::new(FrequencyRecencyCache::new(idle, 16)),
        ]
    }

    #[test]
    fn test_key_identity() {
        let a = key("http://es1:9200", Some("u"), Some("p"));
        assert_eq!(a, key("http://es1:9200", Some("u"), Some("p")));
        assert_ne!(a, key("http://es1:9200", Some("u"), Some("other")));
        assert_ne!(a, key("http://es2:9200", Some("u"), Some("p")));
        let rendered = format!("{a:?}");
        assert!(!rendered.contains("\"p\""));
    }

    #[test]
    fn test_concurrent_first_use_creates_one_connection() {
        for cache in caches(Duration::from_secs(60)) {
            let k = key("http://es1:9200", None, None);
            let created = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let cache = cache.clone();
                    let k = k.clone();
                    let created = created.clone();
                    thread::spawn(move || {
                        let create = move || -> Result<SharedTransport> {
                            created.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            Ok(Arc::new(MockTransport::empty()))
                        };
                        cache.get_or_create(&k, &create).unwrap()
                    })
                })
                .collect();

            let conns: Vec<SharedTransport> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(created.load(Ordering::SeqCst), 1, "policy {:?}", cache.policy());
            assert!(conns.iter().all(|c| Arc::ptr_eq(c, &conns[0])));
            assert_eq!(cache.len(), 1);
        }
    }

    #[test]
    fn test_slow_creation_does_not_block_other_keys() {
        for cache in caches(Duration::from_secs(60)) {
            let slow = key("http://slow:9200", None, None);
            let fast = key("http://fast:9200", None, None);
            let (started_tx, started_rx) = mpsc::channel();
            let (release_tx, release_rx) = mpsc::channel::<()>();

            let handle = {
                let cache = cache.clone();
                let slow = slow.clone();
                let started_tx = Mutex::new(started_tx);
                let release_rx = Mutex::new(release_rx);
                thread::spawn(move || {
                    let create = move || -> Result<SharedTransport> {
                        started_tx.lock().send(()).unwrap();
                        release_rx.lock().recv_timeout(Duration::from_secs(5)).unwrap();
                        Ok(Arc::new(MockTransport::empty()))
                    };
                    cache.get_or_create(&slow, &create).unwrap()
                })
            };
            started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

            // The slow key is mid-creation; other keys must go through untouched
            let create = || -> Result<SharedTransport> { Ok(Arc::new(MockTransport::empty())) };
            let fast_conn = cache.get_or_create(&fast, &create).unwrap();
            assert!(cache.get(&fast).is_some(), "policy {:?}", cache.policy());
            assert!(!cache.contains(&slow));

            release_tx.send(()).unwrap();
            let slow_conn = handle.join().unwrap();
            assert!(!Arc::ptr_eq(&slow_conn, &fast_conn));
            assert!(Arc::ptr_eq(&cache.get(&slow).unwrap(), &slow_conn));
            assert_eq!(cache.len(), 2);
        }
    }

    #[test]
    fn test_always_cache_get_put_contains() {
        let cache = AlwaysCache::new();
        let k = key("http://es1:9200", None, None);
        assert!(!cache.contains(&k));
        assert!(cache.get(&k).is_none());

        let conn: SharedTransport = Arc::new(MockTransport::empty());
        cache.put(k.clone(), conn.clone());
        assert!(cache.contains(&k));
        assert!(Arc::ptr_eq(&cache.get(&k).unwrap(), &conn));
    }

    #[test]
    fn test_put_replacing_closes_old_connection() {
        for cache in caches(Duration::from_secs(60)) {
            let k = key("http://es1:9200", None, None);
            let first = Arc::new(MockTransport::empty());
            cache.put(k.clone(), first.clone());
            cache.put(k.clone(), first.clone());
            assert_eq!(first.close_count(), 0);

            cache.put(k.clone(), Arc::new(MockTransport::empty()));
            let _ = cache.len();
            assert_eq!(first.close_count(), 1, "policy {:?}", cache.policy());
        }
    }

    #[test]
    fn test_recency_evicts_idle_and_closes_once() {
        let cache = RecencyCache::new(Duration::from_millis(50));
        let idle = key("http://idle:9200", None, None);
        let busy = key("http://busy:9200", None, None);
        let idle_conn = Arc::new(MockTransport::empty());
        let busy_conn = Arc::new(MockTransport::empty());
        cache.put(idle.clone(), idle_conn.clone());
        cache.put(busy.clone(), busy_conn.clone());

        for _ in 0..4 {
            thread::sleep(Duration::from_millis(20));
            cache.touch(&busy);
        }

        assert!(!cache.contains(&idle));
        assert!(cache.contains(&busy));
        assert_eq!(idle_conn.close_count(), 1);
        assert_eq!(busy_conn.close_count(), 0);

        cache.sweep();
        let _ = cache.get(&idle);
        assert_eq!(idle_conn.close_count(), 1);
    }

    #[test]
    fn test_recency_recreates_after_eviction() {
        let cache = RecencyCache::new(Duration::from_millis(20));
        let k = key("http://es1:9200", None, None);
        let create = || -> Result<SharedTransport> { Ok(Arc::new(MockTransport::empty())) };
        let first = cache.get_or_create(&k, &create).unwrap();
        thread::sleep(Duration::from_millis(50));
        let second = cache.get_or_create(&k, &create).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(first.is_closed());
        assert!(!second.is_closed());
    }

    #[test]
    fn test_frequency_recency_expires_idle() {
        let cache = FrequencyRecencyCache::new(Duration::from_millis(50), 16);
        let k = key("http://es1:9200", None, None);
        let conn = Arc::new(MockTransport::empty());
        cache.put(k.clone(), conn.clone());
        assert!(cache.contains(&k));

        thread::sleep(Duration::from_millis(120));
        cache.run_pending_tasks();
        assert!(!cache.contains(&k));
        assert_eq!(conn.close_count(), 1);
    }

    #[test]
    fn test_close_failures_are_absorbed() {
        for cache in caches(Duration::from_secs(60)) {
            let k = key("http://es1:9200", None, None);
            let conn = Arc::new(MockTransport::empty().failing_close());
            cache.put(k.clone(), conn.clone());
            cache.close_all();
            assert_eq!(conn.close_count(), 1);
            assert!(cache.is_empty());
        }
    }

    #[test]
    fn test_failed_creation_is_not_cached() {
        for cache in caches(Duration::from_secs(60)) {
            let k = key("http://es1:9200", None, None);
            let fail = || -> Result<SharedTransport> { Err(EsCompatError::transport("refused")) };
            assert!(cache.get_or_create(&k, &fail).is_err());
            assert!(!cache.contains(&k));
        }
    }

    #[test]
    fn test_build_cache_selects_policy() {
        let mut cfg = CacheConfig::default();
        assert_eq!(build_cache(&cfg).policy(), CachePolicy::Always);
        cfg.policy = CachePolicy::Recency;
        assert_eq!(build_cache(&cfg).policy(), CachePolicy::Recency);
        cfg.policy = CachePolicy::FrequencyRecency;
        assert_eq!(build_cache(&cfg).policy(), CachePolicy::FrequencyRecency);
    }
}
