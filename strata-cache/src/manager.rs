//! Registry of every cache in an installation.
//!
//! Caches come from two places: explicit [`CacheManager::register_cache`]
//! calls, and `Caches` configuration entries which are built lazily on
//! first access. The `Default` entry of the configuration supplies every
//! field another entry leaves out.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_core::{CacheError, CacheResult};

use crate::backend::BackendOptions;
use crate::factory::CacheFactory;
use crate::frontend::{Cache, CacheFrontend};

/// Name of the configuration entry holding defaults.
pub const DEFAULT_CACHE_DEFINITION: &str = "Default";

/// One entry of the `Caches` configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_options: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,
}

impl CacheDefinition {
    /// Built-in defaults: variable frontend on a file backend, not persistent.
    pub fn builtin_default() -> Self {
        Self {
            frontend: Some("VariableFrontend".to_string()),
            backend: Some("FileBackend".to_string()),
            backend_options: Some(Value::Object(serde_json::Map::new())),
            persistent: Some(false),
        }
    }

    /// Fill every missing field from `defaults`, field by field.
    pub fn or(&self, defaults: &CacheDefinition) -> CacheDefinition {
        CacheDefinition {
            frontend: self.frontend.clone().or_else(|| defaults.frontend.clone()),
            backend: self.backend.clone().or_else(|| defaults.backend.clone()),
            backend_options: self
                .backend_options
                .clone()
                .or_else(|| defaults.backend_options.clone()),
            persistent: self.persistent.or(defaults.persistent),
        }
    }
}

struct RegisteredCache {
    cache: Cache,
    persistent: bool,
}

pub struct CacheManager {
    factory: CacheFactory,
    definitions: RwLock<BTreeMap<String, CacheDefinition>>,
    caches: RwLock<BTreeMap<String, RegisteredCache>>,
}

impl CacheManager {
    pub fn new(factory: CacheFactory) -> Self {
        let mut definitions = BTreeMap::new();
        definitions.insert(
            DEFAULT_CACHE_DEFINITION.to_string(),
            CacheDefinition::builtin_default(),
        );
        Self {
            factory,
            definitions: RwLock::new(definitions),
            caches: RwLock::new(BTreeMap::new()),
        }
    }

    /// Manager with every cache of `definitions` built up front.
    pub fn from_definitions(factory: CacheFactory, definitions: &Value) -> CacheResult<Self> {
        let manager = Self::new(factory);
        manager.set_cache_configurations(definitions)?;
        manager.create_all_caches()?;
        Ok(manager)
    }

    pub fn factory(&self) -> &CacheFactory {
        &self.factory
    }

    /// Add or replace cache definitions from a `Caches` mapping.
    ///
    /// Caches that were already built keep their old configuration.
    pub fn set_cache_configurations(&self, definitions: &Value) -> CacheResult<()> {
        let entries = match definitions {
            Value::Null => return Ok(()),
            Value::Object(entries) => entries,
            _ => return Err(invalid_configuration("Caches", "not a mapping")),
        };
        let mut parsed = Vec::with_capacity(entries.len());
        for (identifier, entry) in entries {
            if !entry.is_object() {
                return Err(invalid_configuration(identifier, "not a mapping"));
            }
            let definition: CacheDefinition = serde_json::from_value(entry.clone())
                .map_err(|e| invalid_configuration(identifier, e))?;
            parsed.push((identifier.clone(), definition));
        }
        let mut stored = write(&self.definitions)?;
        for (identifier, definition) in parsed {
            // a partial Default still inherits the built-in defaults
            let definition = if identifier == DEFAULT_CACHE_DEFINITION {
                definition.or(&CacheDefinition::builtin_default())
            } else {
                definition
            };
            stored.insert(identifier, definition);
        }
        Ok(())
    }

    /// Every definition, `Default` included.
    pub fn cache_configurations(&self) -> CacheResult<BTreeMap<String, CacheDefinition>> {
        Ok(read(&self.definitions)?.clone())
    }

    /// Fails with `DuplicateCache` if the identifier is already registered.
    pub fn register_cache(&self, cache: Cache, persistent: bool) -> CacheResult<()> {
        let mut caches = write(&self.caches)?;
        let identifier = cache.identifier().to_string();
        if caches.contains_key(&identifier) {
            return Err(CacheError::DuplicateCache { identifier });
        }
        tracing::debug!(cache = %identifier, persistent, "Cache registered");
        caches.insert(identifier, RegisteredCache { cache, persistent });
        Ok(())
    }

    pub fn get_cache(&self, identifier: &str) -> CacheResult<Cache> {
        if let Some(registered) = read(&self.caches)?.get(identifier) {
            return Ok(registered.cache.clone());
        }
        if !self.has_cache(identifier) {
            return Err(CacheError::NoSuchCache {
                identifier: identifier.to_string(),
            });
        }
        self.create_cache(identifier)
    }

    /// Registered or configured; `Default` is not a cache.
    pub fn has_cache(&self, identifier: &str) -> bool {
        if identifier == DEFAULT_CACHE_DEFINITION {
            return false;
        }
        let registered = self
            .caches
            .read()
            .map(|caches| caches.contains_key(identifier))
            .unwrap_or(false);
        registered
            || self
                .definitions
                .read()
                .map(|definitions| definitions.contains_key(identifier))
                .unwrap_or(false)
    }

    /// `false` for unknown caches and caches not built yet.
    pub fn is_cache_persistent(&self, identifier: &str) -> bool {
        self.caches
            .read()
            .ok()
            .and_then(|caches| caches.get(identifier).map(|c| c.persistent))
            .unwrap_or(false)
    }

    /// Registered and configured identifiers, sorted.
    pub fn cache_identifiers(&self) -> CacheResult<Vec<String>> {
        let mut identifiers: Vec<String> = read(&self.caches)?.keys().cloned().collect();
        for identifier in read(&self.definitions)?.keys() {
            if identifier != DEFAULT_CACHE_DEFINITION && !identifiers.contains(identifier) {
                identifiers.push(identifier.clone());
            }
        }
        identifiers.sort();
        Ok(identifiers)
    }

    /// Flush every cache, skipping persistent ones unless `flush_persistent`.
    pub fn flush_caches(&self, flush_persistent: bool) -> CacheResult<()> {
        self.create_all_caches()?;
        for (identifier, cache) in self.flushable(flush_persistent)? {
            cache.frontend().flush()?;
            tracing::debug!(cache = %identifier, "Cache flushed");
        }
        Ok(())
    }

    /// Flush `tag` in every cache, returning the total number of entries removed.
    pub fn flush_caches_by_tag(&self, tag: &str, flush_persistent: bool) -> CacheResult<u64> {
        self.create_all_caches()?;
        let mut flushed = 0;
        for (_, cache) in self.flushable(flush_persistent)? {
            flushed += cache.frontend().flush_by_tag(tag)?;
        }
        tracing::debug!(tag, flushed, "Caches flushed by tag");
        Ok(flushed)
    }

    /// Garbage-collect every cache built so far.
    pub fn collect_garbage(&self) -> CacheResult<()> {
        let caches: Vec<Cache> = read(&self.caches)?
            .values()
            .map(|registered| registered.cache.clone())
            .collect();
        for cache in caches {
            cache.frontend().collect_garbage()?;
        }
        Ok(())
    }

    fn flushable(&self, flush_persistent: bool) -> CacheResult<Vec<(String, Cache)>> {
        Ok(read(&self.caches)?
            .iter()
            .filter(|(_, registered)| flush_persistent || !registered.persistent)
            .map(|(identifier, registered)| (identifier.clone(), registered.cache.clone()))
            .collect())
    }

    fn create_all_caches(&self) -> CacheResult<()> {
        let pending: Vec<String> = {
            let caches = read(&self.caches)?;
            read(&self.definitions)?
                .keys()
                .filter(|identifier| {
                    identifier.as_str() != DEFAULT_CACHE_DEFINITION && !caches.contains_key(*identifier)
                })
                .cloned()
                .collect()
        };
        for identifier in pending {
            self.create_cache(&identifier)?;
        }
        Ok(())
    }

    fn create_cache(&self, identifier: &str) -> CacheResult<Cache> {
        let definition = {
            let definitions = read(&self.definitions)?;
            let defaults = definitions
                .get(DEFAULT_CACHE_DEFINITION)
                .cloned()
                .unwrap_or_else(CacheDefinition::builtin_default);
            definitions
                .get(identifier)
                .map(|definition| definition.or(&defaults))
                .ok_or_else(|| CacheError::NoSuchCache {
                    identifier: identifier.to_string(),
                })?
        };
        let builtin = CacheDefinition::builtin_default();
        let definition = definition.or(&builtin);
        let options = BackendOptions::try_from(definition.backend_options.unwrap_or(Value::Null))?;
        let cache = self.factory.create(
            identifier,
            definition.frontend.as_deref().unwrap_or("VariableFrontend"),
            definition.backend.as_deref().unwrap_or("FileBackend"),
            &options,
        )?;

        // another thread may have built the same cache meanwhile
        let mut caches = write(&self.caches)?;
        if let Some(existing) = caches.get(identifier) {
            return Ok(existing.cache.clone());
        }
        caches.insert(
            identifier.to_string(),
            RegisteredCache {
                cache: cache.clone(),
                persistent: definition.persistent.unwrap_or(false),
            },
        );
        Ok(cache)
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("factory", &self.factory)
            .field("caches", &self.cache_identifiers().unwrap_or_default())
            .finish()
    }
}

fn invalid_configuration(identifier: &str, reason: impl std::fmt::Display) -> CacheError {
    CacheError::InvalidOptions {
        backend: "CacheManager".to_string(),
        reason: format!("cache configuration for \"{identifier}\": {reason}"),
    }
}

fn read<T>(lock: &RwLock<T>) -> CacheResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| CacheError::unavailable("CacheManager", "registry lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> CacheResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| CacheError::unavailable("CacheManager", "registry lock poisoned"))
}
