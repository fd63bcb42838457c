//! Storage backends.
//!
//! A backend stores opaque byte payloads under identifiers that the owning
//! frontend has already validated. Each backend is scoped twice: by the
//! installation's storage namespace (application identifier plus context)
//! and by the identifier of the cache it was assigned to via
//! [`Backend::set_cache`].
//!
//! # Lifetimes
//!
//! Every `set` takes an `Option<u64>` lifetime in seconds. `None` means the
//! backend's `defaultLifetime` option, `Some(0)` means the entry never
//! expires. Expired entries read as absent; only
//! [`Backend::collect_garbage`] is guaranteed to delete them.

use std::sync::{Arc, RwLock, Weak};

use chrono::Utc;
use strata_core::{CacheError, CacheResult, EnvironmentConfiguration};

pub mod file;
pub mod lmdb;
pub mod namespace_key;
pub mod null;
pub mod options;
pub mod pdo;
pub mod redis;
pub mod simple_file;
pub mod transient_memory;

pub use file::FileBackend;
pub use lmdb::{LmdbBackend, LmdbBackendError};
pub use namespace_key::{KeyKind, KeyNamespace, NamespacedKey};
pub use null::NullBackend;
pub use options::BackendOptions;
pub use pdo::PdoBackend;
pub use redis::RedisBackend;
pub use simple_file::SimpleFileBackend;
pub use transient_memory::TransientMemoryBackend;

/// Lifetime used when neither the caller nor the options specify one.
pub const DEFAULT_LIFETIME: u64 = 3600;

/// What a backend may ask of the cache that owns it.
///
/// Backends hold this as a [`Weak`] reference: the frontend owns the backend,
/// never the other way around.
pub trait CacheHandle: Send + Sync {
    /// Identifier of the owning cache, e.g. `Flow_Object_Classes`.
    fn identifier(&self) -> &str;

    fn is_valid_entry_identifier(&self, identifier: &str) -> bool {
        strata_core::is_valid_entry_identifier(identifier)
    }

    fn is_valid_tag(&self, tag: &str) -> bool {
        strata_core::is_valid_tag(tag)
    }
}

/// Physical cache storage.
///
/// Implementations must be usable from several threads; cross-process
/// consistency is left to the storage technology (atomic renames, SQL
/// transactions, Redis MULTI/EXEC, LMDB write transactions).
pub trait Backend: Send + Sync {
    /// Short kind name used in logs and errors, e.g. `FileBackend`.
    fn name(&self) -> &'static str;

    /// Assign the owning cache. Called by the factory once the frontend
    /// exists; operations before that fail with `CacheNotAssigned`.
    fn set_cache(&self, cache: Weak<dyn CacheHandle>) -> CacheResult<()>;

    /// Store `data`, replacing any entry with the same identifier.
    fn set(
        &self,
        identifier: &str,
        data: &[u8],
        tags: &[&str],
        lifetime: Option<u64>,
    ) -> CacheResult<()>;

    /// Payload of a live entry, `None` when absent or expired.
    fn get(&self, identifier: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Agrees with [`Backend::get`]: expired entries report `false`.
    fn has(&self, identifier: &str) -> CacheResult<bool>;

    /// Remove one entry. Returns whether anything was removed.
    fn remove(&self, identifier: &str) -> CacheResult<bool>;

    /// Remove everything this cache stored.
    fn flush(&self) -> CacheResult<()>;

    /// Remove every entry tagged with `tag`, returning how many were removed.
    fn flush_by_tag(&self, tag: &str) -> CacheResult<u64>;

    /// Union of [`Backend::flush_by_tag`] over `tags`. An entry carrying
    /// several of the tags is removed and counted once.
    fn flush_by_tags(&self, tags: &[&str]) -> CacheResult<u64> {
        let mut flushed = 0;
        for tag in tags {
            flushed += self.flush_by_tag(tag)?;
        }
        Ok(flushed)
    }

    /// Identifiers of the live entries tagged with `tag`.
    fn find_identifiers_by_tag(&self, tag: &str) -> CacheResult<Vec<String>>;

    /// Delete entries that are provably expired.
    fn collect_garbage(&self) -> CacheResult<()>;
}

// ============================================================================
// SHARED BACKEND STATE
// ============================================================================

/// State every backend carries: environment, default lifetime and the
/// back-reference to its cache.
pub(crate) struct BackendCore {
    name: &'static str,
    environment: Arc<EnvironmentConfiguration>,
    default_lifetime: u64,
    cache: RwLock<Option<Weak<dyn CacheHandle>>>,
}

impl BackendCore {
    pub(crate) fn new(
        name: &'static str,
        environment: Arc<EnvironmentConfiguration>,
        options: &BackendOptions,
    ) -> CacheResult<Self> {
        let default_lifetime = options
            .u64(name, "defaultLifetime")?
            .unwrap_or(DEFAULT_LIFETIME);
        Ok(Self {
            name,
            environment,
            default_lifetime,
            cache: RwLock::new(None),
        })
    }

    pub(crate) fn environment(&self) -> &EnvironmentConfiguration {
        &self.environment
    }

    pub(crate) fn default_lifetime(&self) -> u64 {
        self.default_lifetime
    }

    /// Resolve a caller lifetime into seconds, `0` meaning unlimited.
    pub(crate) fn resolve_lifetime(&self, lifetime: Option<u64>) -> u64 {
        lifetime.unwrap_or(self.default_lifetime)
    }

    /// Unix expiry timestamp for a lifetime, `0` meaning unlimited.
    pub(crate) fn expiry_time(&self, lifetime: Option<u64>) -> i64 {
        match self.resolve_lifetime(lifetime) {
            0 => 0,
            seconds => now().saturating_add(i64::try_from(seconds).unwrap_or(i64::MAX)),
        }
    }

    pub(crate) fn assign(&self, cache: Weak<dyn CacheHandle>) -> CacheResult<Arc<dyn CacheHandle>> {
        let handle = cache.upgrade().ok_or_else(|| self.not_assigned())?;
        if let Ok(mut slot) = self.cache.write() {
            *slot = Some(cache);
        }
        Ok(handle)
    }

    /// The owning cache, if assigned and still alive.
    pub(crate) fn cache(&self) -> CacheResult<Arc<dyn CacheHandle>> {
        self.cache
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().and_then(Weak::upgrade))
            .ok_or_else(|| self.not_assigned())
    }

    pub(crate) fn cache_identifier(&self) -> CacheResult<String> {
        Ok(self.cache()?.identifier().to_string())
    }

    fn not_assigned(&self) -> CacheError {
        CacheError::CacheNotAssigned {
            backend: self.name.to_string(),
        }
    }
}

/// Current Unix time in seconds.
pub(crate) fn now() -> i64 {
    Utc::now().timestamp()
}

/// `expiry == 0` never expires; otherwise the entry is dead once the expiry
/// second has passed.
pub(crate) fn is_expired(expiry: i64, now: i64) -> bool {
    expiry != 0 && expiry < now
}

#[cfg(test)]
pub(crate) mod test_support {
    //! A bare cache handle for exercising backends without a frontend.

    use super::*;

    pub struct StubCache(pub String);

    impl CacheHandle for StubCache {
        fn identifier(&self) -> &str {
            &self.0
        }
    }

    /// Assign a stub cache and hand back the strong reference that keeps it
    /// alive for the duration of the test.
    pub fn attach(backend: &dyn Backend, identifier: &str) -> Arc<dyn CacheHandle> {
        let cache: Arc<dyn CacheHandle> = Arc::new(StubCache(identifier.to_string()));
        backend
            .set_cache(Arc::downgrade(&cache))
            .expect("set_cache should succeed");
        cache
    }

    pub fn environment(base: &std::path::Path) -> Arc<EnvironmentConfiguration> {
        Arc::new(EnvironmentConfiguration::default().with_file_cache_base_path(base))
    }
}
