//! LMDB-backed cache storage.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped
//! key-value store shared safely between processes on one host.
//!
//! # Key Layout
//!
//! All keys are [`NamespacedKey`]s, so one database file can hold several
//! caches and installations side by side:
//! - Entry keys map an identifier to its record
//! - Tag link keys (`tag \0 identifier`) map to an empty value, which makes
//!   `find_identifiers_by_tag` and `flush_by_tag` prefix scans
//!
//! # Record Format
//!
//! `[expiry: 8 bytes LE][tag list length: 4 bytes LE][tags joined by ' '][payload]`

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RwTxn};
use strata_core::{CacheError, CacheResult, EnvironmentConfiguration};

use super::namespace_key::{KeyNamespace, NamespacedKey};
use super::{is_expired, now, Backend, BackendCore, BackendOptions, CacheHandle};

const NAME: &str = "LmdbBackend";

/// Default map size in megabytes.
pub const DEFAULT_MAP_SIZE_MB: usize = 64;

const RECORD_HEADER_LENGTH: usize = 12;

/// Error type for LMDB backend operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbBackendError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// LMDB failures mean the store is unusable, not that the caller erred.
impl From<LmdbBackendError> for CacheError {
    fn from(e: LmdbBackendError) -> Self {
        CacheError::unavailable(NAME, e)
    }
}

fn txn_error(e: heed::Error) -> LmdbBackendError {
    LmdbBackendError::Transaction(e.to_string())
}

/// An opened environment plus the namespace of the assigned cache.
struct LmdbStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    namespace: KeyNamespace,
    cache_identifier: String,
}

/// The environment is bound to one cache's namespace for its lifetime.
fn ensure_same_cache(store: &LmdbStore, identifier: &str) -> CacheResult<()> {
    if store.cache_identifier == identifier {
        return Ok(());
    }
    Err(CacheError::InvalidOptions {
        backend: NAME.to_string(),
        reason: format!(
            "already assigned to cache \"{}\", cannot reassign to \"{}\"",
            store.cache_identifier, identifier
        ),
    })
}

/// Decoded entry record.
struct Record<'a> {
    expiry: i64,
    tags: Vec<&'a str>,
    payload: &'a [u8],
}

/// LMDB-backed cache backend.
///
/// The environment is opened when the cache is assigned, at the
/// `databasePath` option or
/// `<file_cache_base_path>/<storage_namespace>/Cache/Lmdb/<cache identifier>/`.
pub struct LmdbBackend {
    core: BackendCore,
    database_path: Option<PathBuf>,
    map_size_mb: usize,
    store: OnceLock<LmdbStore>,
}

impl LmdbBackend {
    pub fn new(
        environment: Arc<EnvironmentConfiguration>,
        options: &BackendOptions,
    ) -> CacheResult<Self> {
        options.ensure_known(NAME, &["databasePath", "mapSizeMb", "defaultLifetime"])?;
        let map_size_mb = match options.u64(NAME, "mapSizeMb")? {
            Some(0) => {
                return Err(CacheError::InvalidOptions {
                    backend: NAME.to_string(),
                    reason: "mapSizeMb must be positive".to_string(),
                })
            }
            Some(size) => usize::try_from(size).unwrap_or(DEFAULT_MAP_SIZE_MB),
            None => DEFAULT_MAP_SIZE_MB,
        };
        Ok(Self {
            core: BackendCore::new(NAME, environment, options)?,
            database_path: options.string(NAME, "databasePath")?.map(PathBuf::from),
            map_size_mb,
            store: OnceLock::new(),
        })
    }

    /// Open the LMDB environment at `path`.
    fn open(path: &Path, map_size_mb: usize) -> Result<(Env, Database<Bytes, Bytes>), LmdbBackendError> {
        std::fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path)
        }
        .map_err(|e| LmdbBackendError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbBackendError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        Ok((env, db))
    }

    fn store(&self) -> CacheResult<&LmdbStore> {
        self.store.get().ok_or_else(|| CacheError::CacheNotAssigned {
            backend: NAME.to_string(),
        })
    }

    /// Keys under `prefix`, collected in a read transaction.
    fn collect_keys_with_prefix(
        &self,
        store: &LmdbStore,
        prefix: &[u8],
    ) -> Result<Vec<Vec<u8>>, LmdbBackendError> {
        let rtxn = store.env.read_txn().map_err(txn_error)?;
        let mut keys = Vec::new();
        for result in store.db.prefix_iter(&rtxn, prefix).map_err(txn_error)? {
            let (key, _) = result.map_err(txn_error)?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    /// Delete an entry and its tag links inside `wtxn`.
    fn unlink(
        store: &LmdbStore,
        wtxn: &mut RwTxn<'_>,
        identifier: &str,
    ) -> Result<bool, LmdbBackendError> {
        let entry_key = store.namespace.entry(identifier).encode();
        let tags: Vec<String> = match store.db.get(wtxn, &entry_key).map_err(txn_error)? {
            Some(bytes) => decode_record(bytes)
                .map(|record| record.tags.iter().map(|t| t.to_string()).collect())
                .unwrap_or_default(),
            None => return Ok(false),
        };
        for tag in tags {
            let link = store.namespace.tag_link(&tag, identifier).encode();
            store.db.delete(wtxn, &link).map_err(txn_error)?;
        }
        store.db.delete(wtxn, &entry_key).map_err(txn_error)
    }

    fn live_record_exists(&self, identifier: &str) -> CacheResult<bool> {
        Ok(self.get(identifier)?.is_some())
    }
}

impl Backend for LmdbBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn set_cache(&self, cache: Weak<dyn CacheHandle>) -> CacheResult<()> {
        if let Some(store) = self.store.get() {
            if let Some(handle) = cache.upgrade() {
                ensure_same_cache(store, handle.identifier())?;
            }
            self.core.assign(cache)?;
            return Ok(());
        }
        let handle = self.core.assign(cache)?;
        let environment = self.core.environment();
        let path = self.database_path.clone().unwrap_or_else(|| {
            environment
                .file_cache_base_path()
                .join(environment.storage_namespace())
                .join("Cache")
                .join("Lmdb")
                .join(handle.identifier())
        });
        let (env, db) = Self::open(&path, self.map_size_mb)?;
        let namespace = KeyNamespace::new(environment, handle.identifier());
        tracing::debug!(cache = handle.identifier(), path = %path.display(), "LMDB cache opened");
        let store = LmdbStore {
            env,
            db,
            namespace,
            cache_identifier: handle.identifier().to_string(),
        };
        if let Err(store) = self.store.set(store) {
            // lost a race against another assignment
            if let Some(existing) = self.store.get() {
                ensure_same_cache(existing, &store.cache_identifier)?;
            }
        }
        Ok(())
    }

    fn set(
        &self,
        identifier: &str,
        data: &[u8],
        tags: &[&str],
        lifetime: Option<u64>,
    ) -> CacheResult<()> {
        let store = self.store()?;
        let record = encode_record(self.core.expiry_time(lifetime), tags, data);

        let mut wtxn = store.env.write_txn().map_err(txn_error)?;
        Self::unlink(store, &mut wtxn, identifier)?;
        store
            .db
            .put(&mut wtxn, &store.namespace.entry(identifier).encode(), &record)
            .map_err(txn_error)?;
        for tag in tags {
            store
                .db
                .put(&mut wtxn, &store.namespace.tag_link(tag, identifier).encode(), &[])
                .map_err(txn_error)?;
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    fn get(&self, identifier: &str) -> CacheResult<Option<Vec<u8>>> {
        let store = self.store()?;
        let rtxn = store.env.read_txn().map_err(txn_error)?;
        let key = store.namespace.entry(identifier).encode();
        match store.db.get(&rtxn, &key).map_err(txn_error)? {
            Some(bytes) => {
                let record = decode_record(bytes).ok_or_else(|| CacheError::CorruptEntry {
                    identifier: identifier.to_string(),
                    reason: "truncated LMDB record".to_string(),
                })?;
                if is_expired(record.expiry, now()) {
                    Ok(None)
                } else {
                    Ok(Some(record.payload.to_vec()))
                }
            }
            None => Ok(None),
        }
    }

    fn has(&self, identifier: &str) -> CacheResult<bool> {
        self.live_record_exists(identifier)
    }

    fn remove(&self, identifier: &str) -> CacheResult<bool> {
        let store = self.store()?;
        let mut wtxn = store.env.write_txn().map_err(txn_error)?;
        let removed = Self::unlink(store, &mut wtxn, identifier)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(removed)
    }

    fn flush(&self) -> CacheResult<()> {
        let store = self.store()?;
        let keys = self.collect_keys_with_prefix(store, &store.namespace.prefix())?;

        let mut wtxn = store.env.write_txn().map_err(txn_error)?;
        for key in &keys {
            store.db.delete(&mut wtxn, key).map_err(txn_error)?;
        }
        wtxn.commit().map_err(txn_error)?;
        tracing::debug!(keys = keys.len(), "LMDB cache flushed");
        Ok(())
    }

    fn flush_by_tag(&self, tag: &str) -> CacheResult<u64> {
        let store = self.store()?;
        let links = self.collect_keys_with_prefix(store, &store.namespace.tag_prefix(tag))?;

        let mut wtxn = store.env.write_txn().map_err(txn_error)?;
        let mut flushed = 0u64;
        for link in &links {
            let Some(key) = NamespacedKey::decode(link) else {
                continue;
            };
            if Self::unlink(store, &mut wtxn, key.identifier())? {
                flushed += 1;
            }
            store.db.delete(&mut wtxn, link).map_err(txn_error)?;
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(flushed)
    }

    fn find_identifiers_by_tag(&self, tag: &str) -> CacheResult<Vec<String>> {
        let store = self.store()?;
        let links = self.collect_keys_with_prefix(store, &store.namespace.tag_prefix(tag))?;
        let mut identifiers = Vec::new();
        for link in links {
            if let Some(key) = NamespacedKey::decode(&link) {
                if self.live_record_exists(key.identifier())? {
                    identifiers.push(key.identifier().to_string());
                }
            }
        }
        Ok(identifiers)
    }

    fn collect_garbage(&self) -> CacheResult<()> {
        let store = self.store()?;
        let now = now();

        // Expiry is re-checked inside the write transaction, so an entry
        // renewed after the scan survives.
        let candidates = self.collect_keys_with_prefix(store, &store.namespace.entry_prefix())?;
        let mut wtxn = store.env.write_txn().map_err(txn_error)?;
        let mut collected = 0u64;
        for key in candidates {
            let Some(key) = NamespacedKey::decode(&key) else {
                continue;
            };
            let expired = store
                .db
                .get(&wtxn, &key.encode())
                .map_err(txn_error)?
                .and_then(decode_record)
                .is_some_and(|record| is_expired(record.expiry, now));
            if expired && Self::unlink(store, &mut wtxn, key.identifier())? {
                collected += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;
        tracing::debug!(collected, "LMDB cache garbage collected");
        Ok(())
    }
}

fn encode_record(expiry: i64, tags: &[&str], payload: &[u8]) -> Vec<u8> {
    let tag_list = tags.join(" ");
    let mut record = Vec::with_capacity(RECORD_HEADER_LENGTH + tag_list.len() + payload.len());
    record.extend_from_slice(&expiry.to_le_bytes());
    record.extend_from_slice(&(tag_list.len() as u32).to_le_bytes());
    record.extend_from_slice(tag_list.as_bytes());
    record.extend_from_slice(payload);
    record
}

fn decode_record(bytes: &[u8]) -> Option<Record<'_>> {
    if bytes.len() < RECORD_HEADER_LENGTH {
        return None;
    }
    let expiry = i64::from_le_bytes(bytes[0..8].try_into().ok()?);
    let tag_length = u32::from_le_bytes(bytes[8..12].try_into().ok()?) as usize;
    let tags_end = RECORD_HEADER_LENGTH.checked_add(tag_length)?;
    if tags_end > bytes.len() {
        return None;
    }
    let tags = std::str::from_utf8(&bytes[RECORD_HEADER_LENGTH..tags_end])
        .ok()?
        .split(' ')
        .filter(|t| !t.is_empty())
        .collect();
    Some(Record {
        expiry,
        tags,
        payload: &bytes[tags_end..],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::{attach, environment, StubCache};
    use tempfile::TempDir;

    fn create_test_backend() -> (LmdbBackend, Arc<dyn CacheHandle>, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let options = BackendOptions::new().with("mapSizeMb", 10);
        let backend = LmdbBackend::new(environment(temp_dir.path()), &options)
            .expect("backend creation should succeed");
        let cache = attach(&backend, "Lmdb_Cache");
        (backend, cache, temp_dir)
    }

    #[test]
    fn test_put_and_get() {
        let (backend, _cache, _temp_dir) = create_test_backend();
        backend.set("a", b"payload", &["t"], None).expect("set should succeed");
        assert_eq!(backend.get("a").expect("get"), Some(b"payload".to_vec()));
        assert!(backend.has("a").expect("has"));
    }

    #[test]
    fn test_reassignment_to_other_cache_rejected() {
        let (backend, _cache, _temp_dir) = create_test_backend();
        backend.set("a", b"1", &[], None).expect("set");

        let other: Arc<dyn CacheHandle> = Arc::new(StubCache("Other_Cache".to_string()));
        assert!(matches!(
            backend.set_cache(Arc::downgrade(&other)),
            Err(CacheError::InvalidOptions { .. })
        ));

        let same: Arc<dyn CacheHandle> = Arc::new(StubCache("Lmdb_Cache".to_string()));
        backend
            .set_cache(Arc::downgrade(&same))
            .expect("reassigning the same cache should succeed");
        assert_eq!(backend.get("a").expect("get"), Some(b"1".to_vec()));
    }

    #[test]
    fn test_get_nonexistent() {
        let (backend, _cache, _temp_dir) = create_test_backend();
        assert_eq!(backend.get("missing").expect("get"), None);
        assert!(!backend.has("missing").expect("has"));
    }

    #[test]
    fn test_remove() {
        let (backend, _cache, _temp_dir) = create_test_backend();
        backend.set("a", b"1", &["t"], None).expect("set");
        assert!(backend.remove("a").expect("remove"));
        assert!(!backend.remove("a").expect("remove"));
        assert!(backend.find_identifiers_by_tag("t").expect("find").is_empty());
    }

    #[test]
    fn test_flush_by_tag() {
        let (backend, _cache, _temp_dir) = create_test_backend();
        backend.set("a", b"1", &["t"], None).expect("set");
        backend.set("b", b"2", &["t"], None).expect("set");
        backend.set("c", b"3", &["u"], None).expect("set");

        assert_eq!(backend.flush_by_tag("t").expect("flush"), 2);
        assert!(backend.has("c").expect("has"));
        assert!(!backend.has("a").expect("has"));
        assert!(backend.find_identifiers_by_tag("t").expect("find").is_empty());
    }

    #[test]
    fn test_resetting_drops_stale_tag_links() {
        let (backend, _cache, _temp_dir) = create_test_backend();
        backend.set("a", b"1", &["old"], None).expect("set");
        backend.set("a", b"2", &["new"], None).expect("set");

        assert_eq!(backend.flush_by_tag("old").expect("flush"), 0);
        assert_eq!(backend.get("a").expect("get"), Some(b"2".to_vec()));
    }

    #[test]
    fn test_cache_isolation_in_shared_database() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let options = BackendOptions::new().with(
            "databasePath",
            temp_dir.path().join("shared").display().to_string(),
        );
        let env = environment(temp_dir.path());
        let first = LmdbBackend::new(env.clone(), &options).expect("backend");
        let _first_cache = attach(&first, "First");
        first.set("a", b"1", &[], None).expect("set");
        first.flush().expect("flush");
        first.set("b", b"2", &[], None).expect("set");

        // only the first cache's keys are visible through its namespace
        let namespace = KeyNamespace::new(&env, "Second");
        let store = first.store().expect("store");
        let foreign = first
            .collect_keys_with_prefix(store, &namespace.prefix())
            .expect("scan");
        assert!(foreign.is_empty());
        assert!(first.has("b").expect("has"));
        assert!(!first.has("a").expect("has"));
    }

    #[test]
    fn test_collect_garbage_removes_only_expired() {
        let (backend, _cache, _temp_dir) = create_test_backend();
        backend.set("forever", b"1", &["t"], Some(0)).expect("set");

        // write an already expired record directly
        let store = backend.store().expect("store");
        let mut wtxn = store.env.write_txn().expect("txn");
        let record = encode_record(now() - 10, &["t"], b"stale");
        store
            .db
            .put(&mut wtxn, &store.namespace.entry("stale").encode(), &record)
            .expect("put");
        store
            .db
            .put(&mut wtxn, &store.namespace.tag_link("t", "stale").encode(), &[])
            .expect("put");
        wtxn.commit().expect("commit");

        assert!(!backend.has("stale").expect("has"));
        assert_eq!(backend.find_identifiers_by_tag("t").expect("find"), vec!["forever"]);

        backend.collect_garbage().expect("gc");
        let links = backend
            .collect_keys_with_prefix(store, &store.namespace.tag_prefix("t"))
            .expect("scan");
        assert_eq!(links.len(), 1);
        assert!(backend.has("forever").expect("has"));
    }

    #[test]
    fn test_zero_map_size_rejected() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let options = BackendOptions::new().with("mapSizeMb", 0);
        assert!(matches!(
            LmdbBackend::new(environment(temp_dir.path()), &options),
            Err(CacheError::InvalidOptions { .. })
        ));
    }
}
