//! In-process backend for tests and request-scoped caches.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};

use strata_core::{CacheError, CacheResult, EnvironmentConfiguration};

use super::{Backend, BackendCore, BackendOptions, CacheHandle};

const NAME: &str = "TransientMemoryBackend";

#[derive(Debug, Clone)]
struct MemoryEntry {
    data: Vec<u8>,
    tags: Vec<String>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Debug, Default)]
struct MemoryStore {
    entries: HashMap<String, MemoryEntry>,
    tag_index: HashMap<String, BTreeSet<String>>,
}

impl MemoryStore {
    fn unlink(&mut self, identifier: &str) -> Option<MemoryEntry> {
        let entry = self.entries.remove(identifier)?;
        for tag in &entry.tags {
            if let Some(identifiers) = self.tag_index.get_mut(tag) {
                identifiers.remove(identifier);
                if identifiers.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
        Some(entry)
    }
}

/// Entries live in a map owned by this instance and vanish with it.
///
/// Expiry is tracked with a monotonic clock rather than Unix seconds.
pub struct TransientMemoryBackend {
    core: BackendCore,
    store: RwLock<MemoryStore>,
}

impl TransientMemoryBackend {
    pub fn new(
        environment: Arc<EnvironmentConfiguration>,
        options: &BackendOptions,
    ) -> CacheResult<Self> {
        options.ensure_known(NAME, &["defaultLifetime"])?;
        Ok(Self {
            core: BackendCore::new(NAME, environment, options)?,
            store: RwLock::new(MemoryStore::default()),
        })
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.read().map(|store| store.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> CacheResult<RwLockReadGuard<'_, MemoryStore>> {
        self.store
            .read()
            .map_err(|_| CacheError::unavailable(NAME, "store lock poisoned"))
    }

    fn write(&self) -> CacheResult<RwLockWriteGuard<'_, MemoryStore>> {
        self.store
            .write()
            .map_err(|_| CacheError::unavailable(NAME, "store lock poisoned"))
    }
}

impl Backend for TransientMemoryBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn set_cache(&self, cache: Weak<dyn CacheHandle>) -> CacheResult<()> {
        self.core.assign(cache).map(|_| ())
    }

    fn set(
        &self,
        identifier: &str,
        data: &[u8],
        tags: &[&str],
        lifetime: Option<u64>,
    ) -> CacheResult<()> {
        let expires_at = match self.core.resolve_lifetime(lifetime) {
            0 => None,
            seconds => Instant::now().checked_add(Duration::from_secs(seconds)),
        };
        let mut tags: Vec<String> = tags.iter().map(|tag| tag.to_string()).collect();
        tags.sort();
        tags.dedup();

        let mut store = self.write()?;
        store.unlink(identifier);
        for tag in &tags {
            store
                .tag_index
                .entry(tag.clone())
                .or_default()
                .insert(identifier.to_string());
        }
        store.entries.insert(
            identifier.to_string(),
            MemoryEntry {
                data: data.to_vec(),
                tags,
                expires_at,
            },
        );
        Ok(())
    }

    fn get(&self, identifier: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = Instant::now();
        Ok(self
            .read()?
            .entries
            .get(identifier)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.data.clone()))
    }

    fn has(&self, identifier: &str) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(self
            .read()?
            .entries
            .get(identifier)
            .is_some_and(|entry| entry.is_live(now)))
    }

    fn remove(&self, identifier: &str) -> CacheResult<bool> {
        Ok(self.write()?.unlink(identifier).is_some())
    }

    fn flush(&self) -> CacheResult<()> {
        let mut store = self.write()?;
        store.entries.clear();
        store.tag_index.clear();
        Ok(())
    }

    fn flush_by_tag(&self, tag: &str) -> CacheResult<u64> {
        let mut store = self.write()?;
        let identifiers = store.tag_index.remove(tag).unwrap_or_default();
        let mut flushed = 0;
        for identifier in identifiers {
            if store.unlink(&identifier).is_some() {
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    fn find_identifiers_by_tag(&self, tag: &str) -> CacheResult<Vec<String>> {
        let now = Instant::now();
        let store = self.read()?;
        Ok(store
            .tag_index
            .get(tag)
            .map(|identifiers| {
                identifiers
                    .iter()
                    .filter(|id| store.entries.get(*id).is_some_and(|e| e.is_live(now)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn collect_garbage(&self) -> CacheResult<()> {
        let now = Instant::now();
        let mut store = self.write()?;
        let expired: Vec<String> = store
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(identifier, _)| identifier.clone())
            .collect();
        for identifier in expired {
            store.unlink(&identifier);
        }
        Ok(())
    }
}
