//! Frontend for arbitrary serializable values.
//!
//! Values are stored as JSON. Anything implementing `Serialize` can be
//! written; reads deserialize into the caller's type. A payload that is not
//! JSON at all is a corrupt entry and gets removed. A well-formed payload
//! that does not fit the requested type is a miss and stays in the cache.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use strata_core::{validate_cache_identifier, validate_identifier, validate_tags, CacheError, CacheResult};

use super::{downgrade_to_miss, validate_entry, CacheFrontend};
use crate::backend::{Backend, CacheHandle};

pub const KIND: &str = "VariableFrontend";

pub struct VariableFrontend {
    identifier: String,
    backend: Box<dyn Backend>,
}

impl VariableFrontend {
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

    pub fn set<T>(
        &self,
        identifier: &str,
        value: &T,
        tags: &[&str],
        lifetime: Option<u64>,
    ) -> CacheResult<()>
    where
        T: Serialize + ?Sized,
    {
        validate_entry(identifier, tags)?;
        let payload = serde_json::to_vec(value).map_err(|e| CacheError::Serialization {
            identifier: identifier.to_string(),
            reason: e.to_string(),
        })?;
        self.backend.set(identifier, &payload, tags, lifetime)
    }

    pub fn get<T: DeserializeOwned>(&self, identifier: &str) -> CacheResult<Option<T>> {
        validate_identifier(identifier)?;
        let result = self.backend.get(identifier).and_then(|payload| {
            payload.map(|bytes| decode(identifier, &bytes)).transpose()
        });
        let Some(value) = downgrade_to_miss(self, identifier, result, None)? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(typed) => Ok(Some(typed)),
            Err(e) => {
                tracing::debug!(
                    cache = %self.identifier,
                    identifier,
                    error = %e,
                    "Cache entry does not match requested type"
                );
                Ok(None)
            }
        }
    }

    /// Values of every live entry tagged with `tag`. Entries that do not
    /// deserialize into `T` are skipped and left in place.
    pub fn get_by_tag<T: DeserializeOwned>(&self, tag: &str) -> CacheResult<Vec<T>> {
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

fn decode(identifier: &str, bytes: &[u8]) -> CacheResult<serde_json::Value> {
    serde_json::from_slice(bytes).map_err(|e| CacheError::CorruptEntry {
        identifier: identifier.to_string(),
        reason: e.to_string(),
    })
}

impl CacheHandle for VariableFrontend {
    fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl CacheFrontend for VariableFrontend {
    fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }
}
