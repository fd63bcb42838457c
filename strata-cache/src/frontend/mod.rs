//! Cache frontends.
//!
//! A frontend owns exactly one [`Backend`], validates every identifier and
//! tag before the backend sees it, and converts between caller values and
//! the opaque payload bytes the backend stores.
//!
//! Reads are forgiving: an unavailable backend or a corrupt entry turns a
//! `get`/`has` into a miss with a logged warning. Writes and removals have
//! no safe fallback and propagate every error.

use std::sync::Arc;

use strata_core::{validate_identifier, validate_tags, CacheError, CacheResult};

use crate::backend::{Backend, CacheHandle};

pub mod string;
pub mod variable;

pub use string::StringFrontend;
pub use variable::VariableFrontend;

/// Operations shared by every frontend, independent of the value type.
pub trait CacheFrontend: CacheHandle {
    fn backend(&self) -> &dyn Backend;

    fn has(&self, identifier: &str) -> CacheResult<bool> {
        validate_identifier(identifier)?;
        let result = self.backend().has(identifier);
        downgrade_to_miss(self, identifier, result, false)
    }

    /// Returns whether an entry was removed.
    fn remove(&self, identifier: &str) -> CacheResult<bool> {
        validate_identifier(identifier)?;
        self.backend().remove(identifier)
    }

    fn flush(&self) -> CacheResult<()> {
        self.backend().flush()
    }

    fn flush_by_tag(&self, tag: &str) -> CacheResult<u64> {
        validate_tags(&[tag])?;
        self.backend().flush_by_tag(tag)
    }

    fn flush_by_tags(&self, tags: &[&str]) -> CacheResult<u64> {
        validate_tags(tags)?;
        self.backend().flush_by_tags(tags)
    }

    fn collect_garbage(&self) -> CacheResult<()> {
        self.backend().collect_garbage()
    }
}

/// Turn recoverable read failures into `miss`.
///
/// Corrupt entries are removed on the way so the next `set` starts clean.
pub(crate) fn downgrade_to_miss<F, T>(
    frontend: &F,
    identifier: &str,
    result: CacheResult<T>,
    miss: T,
) -> CacheResult<T>
where
    F: CacheFrontend + ?Sized,
{
    match result {
        Ok(value) => Ok(value),
        Err(e @ CacheError::CorruptEntry { .. }) => {
            tracing::warn!(
                cache = frontend.identifier(),
                identifier,
                error = %e,
                "Corrupt cache entry treated as miss"
            );
            if let Err(remove_error) = frontend.backend().remove(identifier) {
                tracing::warn!(
                    cache = frontend.identifier(),
                    identifier,
                    error = %remove_error,
                    "Failed to remove corrupt cache entry"
                );
            }
            Ok(miss)
        }
        Err(e) if e.is_recoverable() => {
            tracing::warn!(
                cache = frontend.identifier(),
                identifier,
                error = %e,
                "Cache backend unavailable, treating read as miss"
            );
            Ok(miss)
        }
        Err(e) => Err(e),
    }
}

/// Validate an entry identifier and its tags in one go.
pub(crate) fn validate_entry(identifier: &str, tags: &[&str]) -> CacheResult<()> {
    validate_identifier(identifier)?;
    validate_tags(tags)
}

/// A constructed cache of either frontend kind.
#[derive(Clone)]
pub enum Cache {
    String(Arc<StringFrontend>),
    Variable(Arc<VariableFrontend>),
}

impl Cache {
    pub fn identifier(&self) -> &str {
        self.frontend().identifier()
    }

    pub fn frontend(&self) -> &dyn CacheFrontend {
        match self {
            Cache::String(frontend) => &**frontend,
            Cache::Variable(frontend) => &**frontend,
        }
    }

    /// Frontend kind name as used in configuration.
    pub fn kind(&self) -> &'static str {
        match self {
            Cache::String(_) => string::KIND,
            Cache::Variable(_) => variable::KIND,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.frontend().backend().name()
    }

    pub fn as_string(&self) -> Option<&Arc<StringFrontend>> {
        match self {
            Cache::String(frontend) => Some(frontend),
            Cache::Variable(_) => None,
        }
    }

    pub fn as_variable(&self) -> Option<&Arc<VariableFrontend>> {
        match self {
            Cache::Variable(frontend) => Some(frontend),
            Cache::String(_) => None,
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("identifier", &self.identifier())
            .field("frontend", &self.kind())
            .field("backend", &self.backend_name())
            .finish()
    }
}

impl From<Arc<StringFrontend>> for Cache {
    fn from(frontend: Arc<StringFrontend>) -> Self {
        Cache::String(frontend)
    }
}

impl From<Arc<VariableFrontend>> for Cache {
    fn from(frontend: Arc<VariableFrontend>) -> Self {
        Cache::Variable(frontend)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! A backend whose reads can be made to fail on demand.

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Weak;

    use super::*;
    use crate::backend::{BackendOptions, TransientMemoryBackend};
    use strata_core::EnvironmentConfiguration;

    pub struct FlakyBackend {
        inner: TransientMemoryBackend,
        pub unavailable: AtomicBool,
        pub removals: AtomicUsize,
    }

    impl FlakyBackend {
        pub fn new() -> Self {
            Self {
                inner: TransientMemoryBackend::new(
                    Arc::new(EnvironmentConfiguration::default()),
                    &BackendOptions::default(),
                )
                .expect("memory backend should build"),
                unavailable: AtomicBool::new(false),
                removals: AtomicUsize::new(0),
            }
        }

        fn check(&self) -> CacheResult<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                Err(CacheError::unavailable("FlakyBackend", "connection refused"))
            } else {
                Ok(())
            }
        }
    }

    impl Backend for FlakyBackend {
        fn name(&self) -> &'static str {
            "FlakyBackend"
        }
        fn set_cache(&self, cache: Weak<dyn CacheHandle>) -> CacheResult<()> {
            self.inner.set_cache(cache)
        }
        fn set(&self, id: &str, data: &[u8], tags: &[&str], lifetime: Option<u64>) -> CacheResult<()> {
            self.check()?;
            self.inner.set(id, data, tags, lifetime)
        }
        fn get(&self, id: &str) -> CacheResult<Option<Vec<u8>>> {
            self.check()?;
            self.inner.get(id)
        }
        fn has(&self, id: &str) -> CacheResult<bool> {
            self.check()?;
            self.inner.has(id)
        }
        fn remove(&self, id: &str) -> CacheResult<bool> {
            self.check()?;
            self.removals.fetch_add(1, Ordering::SeqCst);
            self.inner.remove(id)
        }
        fn flush(&self) -> CacheResult<()> {
            self.check()?;
            self.inner.flush()
        }
        fn flush_by_tag(&self, tag: &str) -> CacheResult<u64> {
            self.check()?;
            self.inner.flush_by_tag(tag)
        }
        fn find_identifiers_by_tag(&self, tag: &str) -> CacheResult<Vec<String>> {
            self.check()?;
            self.inner.find_identifiers_by_tag(tag)
        }
        fn collect_garbage(&self) -> CacheResult<()> {
            self.inner.collect_garbage()
        }
    }
}
