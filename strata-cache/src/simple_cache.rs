//! Key-value cache in the style of PSR-16.
//!
//! No tags, just `get`/`set`/`delete`/`has` and their batch variants. The
//! batch variants validate every key first, then loop the single-item
//! operation; a backend failure halfway leaves earlier items committed.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use strata_core::{validate_cache_identifier, validate_identifier, CacheError, CacheResult};

use crate::backend::{Backend, CacheHandle};
use crate::frontend::{downgrade_to_miss, CacheFrontend};

pub struct SimpleCache {
    identifier: String,
    backend: Box<dyn Backend>,
}

impl SimpleCache {
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

    /// Value stored under `key`, or `default` on a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> CacheResult<T> {
        validate_identifier(key)?;
        let result = self.backend.get(key).and_then(|payload| {
            payload
                .map(|bytes| {
                    serde_json::from_slice::<serde_json::Value>(&bytes).map_err(|e| {
                        CacheError::CorruptEntry {
                            identifier: key.to_string(),
                            reason: e.to_string(),
                        }
                    })
                })
                .transpose()
        });
        let Some(value) = downgrade_to_miss(self, key, result, None)? else {
            return Ok(default);
        };
        match serde_json::from_value(value) {
            Ok(typed) => Ok(typed),
            Err(e) => {
                tracing::debug!(
                    cache = %self.identifier,
                    key,
                    error = %e,
                    "Cache entry does not match requested type"
                );
                Ok(default)
            }
        }
    }

    /// `ttl` of `None` uses the backend default, `Some(0)` never expires.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<u64>) -> CacheResult<()> {
        validate_identifier(key)?;
        let payload = serde_json::to_vec(value).map_err(|e| CacheError::Serialization {
            identifier: key.to_string(),
            reason: e.to_string(),
        })?;
        self.backend.set(key, &payload, &[], ttl)
    }

    pub fn delete(&self, key: &str) -> CacheResult<bool> {
        self.remove(key)
    }

    pub fn clear(&self) -> CacheResult<()> {
        self.flush()
    }

    /// `(key, value)` pairs in request order, `default` filling the misses.
    pub fn get_multiple<T>(&self, keys: &[&str], default: T) -> CacheResult<Vec<(String, T)>>
    where
        T: DeserializeOwned + Clone,
    {
        validate_keys(keys)?;
        keys.iter()
            .map(|key| Ok((key.to_string(), self.get(key, default.clone())?)))
            .collect()
    }

    pub fn set_multiple<T: Serialize>(&self, values: &[(&str, T)], ttl: Option<u64>) -> CacheResult<()> {
        validate_keys(&values.iter().map(|(key, _)| *key).collect::<Vec<_>>())?;
        for (key, value) in values {
            self.set(key, value, ttl)?;
        }
        Ok(())
    }

    pub fn delete_multiple(&self, keys: &[&str]) -> CacheResult<()> {
        validate_keys(keys)?;
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }
}

fn validate_keys(keys: &[&str]) -> CacheResult<()> {
    keys.iter().try_for_each(|key| validate_identifier(key))
}

impl CacheHandle for SimpleCache {
    fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl CacheFrontend for SimpleCache {
    fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }
}
