//! Frontend for plain string values.

use std::sync::Arc;

use strata_core::{validate_cache_identifier, validate_tags, CacheError, CacheResult};

use super::{downgrade_to_miss, validate_entry, CacheFrontend};
use crate::backend::{Backend, CacheHandle};

pub const KIND: &str = "StringFrontend";

/// Stores UTF-8 strings as-is; no serialization step.
pub struct StringFrontend {
    identifier: String,
    backend: Box<dyn Backend>,
}

impl StringFrontend {
    pub fn new(identifier: &str, backend: Box<dyn Backend>) -> CacheResult<Self> {
        validate_cache_identifier(identifier)?;
        Ok(Self {
            identifier: identifier.to_string(),
            backend,
        })
    }

    /// Move into an `Arc` and hand the backend its back-reference.
    pub fn into_shared(self) -> CacheResult<Arc<Self>> {
        let shared = Arc::new(self);
        let handle: Arc<dyn CacheHandle> = shared.clone();
        shared.backend.set_cache(Arc::downgrade(&handle))?;
        Ok(shared)
    }

    pub fn set(
        &self,
        identifier: &str,
        value: &str,
        tags: &[&str],
        lifetime: Option<u64>,
    ) -> CacheResult<()> {
        validate_entry(identifier, tags)?;
        self.backend.set(identifier, value.as_bytes(), tags, lifetime)
    }

    pub fn get(&self, identifier: &str) -> CacheResult<Option<String>> {
        strata_core::validate_identifier(identifier)?;
        let result = self.backend.get(identifier).and_then(|payload| {
            payload.map(|bytes| decode(identifier, bytes)).transpose()
        });
        downgrade_to_miss(self, identifier, result, None)
    }

    /// Values of every live entry tagged with `tag`.
    pub fn get_by_tag(&self, tag: &str) -> CacheResult<Vec<String>> {
        validate_tags(&[tag])?;
        let mut values = Vec::new();
        for identifier in self.backend.find_identifiers_by_tag(tag)? {
            if let Some(value) = self.get(&identifier)? {
                values.push(value);
            }
        }
        Ok(values)
    }
}

fn decode(identifier: &str, bytes: Vec<u8>) -> CacheResult<String> {
    String::from_utf8(bytes).map_err(|e| CacheError::CorruptEntry {
        identifier: identifier.to_string(),
        reason: e.to_string(),
    })
}

impl CacheHandle for StringFrontend {
    fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl CacheFrontend for StringFrontend {
    fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOptions, TransientMemoryBackend};
    use crate::frontend::test_support::FlakyBackend;
    use std::sync::atomic::Ordering;
    use strata_core::EnvironmentConfiguration;

    fn create_frontend() -> Arc<StringFrontend> {
        let backend = TransientMemoryBackend::new(
            Arc::new(EnvironmentConfiguration::default()),
            &BackendOptions::default(),
        )
        .expect("backend should build");
        StringFrontend::new("String_Cache", Box::new(backend))
            .expect("frontend should build")
            .into_shared()
            .expect("assignment should succeed")
    }

    #[test]
    fn test_set_and_get() {
        let cache = create_frontend();
        cache.set("greeting", "hello", &["t"], None).expect("set");
        assert_eq!(cache.get("greeting").expect("get"), Some("hello".to_string()));
        assert!(cache.has("greeting").expect("has"));
        assert_eq!(cache.get_by_tag("t").expect("get_by_tag"), vec!["hello"]);
    }

    #[test]
    fn test_invalid_identifier_rejected_before_backend() {
        let flaky = FlakyBackend::new();
        flaky.unavailable.store(true, Ordering::SeqCst);
        let cache = StringFrontend::new("String_Cache", Box::new(flaky))
            .expect("frontend should build")
            .into_shared()
            .expect("assignment should succeed");

        assert!(matches!(
            cache.set("bad id", "x", &[], None),
            Err(CacheError::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            cache.get("bad/id"),
            Err(CacheError::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            cache.set("ok", "x", &["bad tag"], None),
            Err(CacheError::InvalidTag { .. })
        ));
        assert!(matches!(cache.remove(""), Err(CacheError::InvalidIdentifier { .. })));
    }

    #[test]
    fn test_unavailable_backend_reads_as_miss() {
        let flaky = FlakyBackend::new();
        flaky.unavailable.store(true, Ordering::SeqCst);
        let cache = StringFrontend::new("String_Cache", Box::new(flaky))
            .expect("frontend should build")
            .into_shared()
            .expect("assignment should succeed");

        assert_eq!(cache.get("a").expect("get should downgrade"), None);
        assert!(!cache.has("a").expect("has should downgrade"));
        assert!(cache.set("a", "1", &[], None).is_err());
        assert!(cache.flush().is_err());
    }

    #[test]
    fn test_non_utf8_payload_is_corrupt_and_removed() {
        let cache = create_frontend();
        cache
            .backend()
            .set("raw", &[0xff, 0xfe], &[], None)
            .expect("raw set");
        assert_eq!(cache.get("raw").expect("get"), None);
        assert!(!cache.backend().has("raw").expect("has"));
    }

    #[test]
    fn test_invalid_cache_identifier() {
        let backend = TransientMemoryBackend::new(
            Arc::new(EnvironmentConfiguration::default()),
            &BackendOptions::default(),
        )
        .expect("backend should build");
        assert!(StringFrontend::new("no.dots", Box::new(backend)).is_err());
    }
}
