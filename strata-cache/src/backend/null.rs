//! A backend that stores nothing.

use std::sync::{Arc, Weak};

use strata_core::{CacheResult, EnvironmentConfiguration};

use super::{Backend, BackendCore, BackendOptions, CacheHandle};

const NAME: &str = "NullBackend";

/// Accepts every write and forgets it. Useful for disabling a cache through
/// configuration alone.
pub struct NullBackend {
    core: BackendCore,
}

impl NullBackend {
    pub fn new(
        environment: Arc<EnvironmentConfiguration>,
        options: &BackendOptions,
    ) -> CacheResult<Self> {
        options.ensure_known(NAME, &["defaultLifetime"])?;
        Ok(Self {
            core: BackendCore::new(NAME, environment, options)?,
        })
    }
}

impl Backend for NullBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn set_cache(&self, cache: Weak<dyn CacheHandle>) -> CacheResult<()> {
        self.core.assign(cache).map(|_| ())
    }

    fn set(&self, _: &str, _: &[u8], _: &[&str], _: Option<u64>) -> CacheResult<()> {
        Ok(())
    }

    fn get(&self, _: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(None)
    }

    fn has(&self, _: &str) -> CacheResult<bool> {
        Ok(false)
    }

    fn remove(&self, _: &str) -> CacheResult<bool> {
        Ok(false)
    }

    fn flush(&self) -> CacheResult<()> {
        Ok(())
    }

    fn flush_by_tag(&self, _: &str) -> CacheResult<u64> {
        Ok(0)
    }

    fn find_identifiers_by_tag(&self, _: &str) -> CacheResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn collect_garbage(&self) -> CacheResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_is_ever_stored() {
        let backend = NullBackend::new(
            Arc::new(EnvironmentConfiguration::default()),
            &BackendOptions::default(),
        )
        .expect("backend creation should succeed");

        backend.set("a", b"1", &["t"], Some(0)).expect("set");
        assert_eq!(backend.get("a").expect("get"), None);
        assert!(!backend.has("a").expect("has"));
        assert!(!backend.remove("a").expect("remove"));
        assert_eq!(backend.flush_by_tag("t").expect("flush"), 0);
    }
}
