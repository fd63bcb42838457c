//! Raw file backend without tags or expiry.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, Weak};

use strata_core::{CacheError, CacheResult, EnvironmentConfiguration};
use uuid::Uuid;

use super::{Backend, BackendCore, BackendOptions, CacheHandle};

const NAME: &str = "SimpleFileBackend";

/// Each entry is a file whose contents are exactly the payload.
///
/// Tags are accepted and ignored, lifetimes are ignored, so entries live
/// until removed or flushed. Shares the directory layout of
/// [`FileBackend`](super::FileBackend).
pub struct SimpleFileBackend {
    core: BackendCore,
    configured_directory: Option<PathBuf>,
    create_parent_directories: bool,
    cache_directory: RwLock<Option<PathBuf>>,
}

impl SimpleFileBackend {
    pub fn new(
        environment: Arc<EnvironmentConfiguration>,
        options: &BackendOptions,
    ) -> CacheResult<Self> {
        options.ensure_known(
            NAME,
            &["cacheDirectory", "createParentDirectories", "defaultLifetime"],
        )?;
        Ok(Self {
            core: BackendCore::new(NAME, environment, options)?,
            configured_directory: options.string(NAME, "cacheDirectory")?.map(PathBuf::from),
            create_parent_directories: options
                .bool(NAME, "createParentDirectories")?
                .unwrap_or(true),
            cache_directory: RwLock::new(None),
        })
    }

    pub fn cache_directory(&self) -> CacheResult<PathBuf> {
        self.cache_directory
            .read()
            .ok()
            .and_then(|dir| dir.clone())
            .ok_or_else(|| CacheError::CacheNotAssigned {
                backend: NAME.to_string(),
            })
    }

    fn entry_path(&self, identifier: &str) -> CacheResult<PathBuf> {
        if identifier.is_empty() || identifier == "." || identifier == ".." {
            return Err(CacheError::InvalidIdentifier {
                identifier: identifier.to_string(),
            });
        }
        let path = self.cache_directory()?.join(identifier);
        let maximum = self.core.environment().maximum_path_length();
        if path.as_os_str().len() > maximum {
            return Err(CacheError::PathTooLong {
                path: path.display().to_string(),
                maximum,
            });
        }
        Ok(path)
    }
}

impl Backend for SimpleFileBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn set_cache(&self, cache: Weak<dyn CacheHandle>) -> CacheResult<()> {
        let handle = self.core.assign(cache)?;
        let directory = match &self.configured_directory {
            Some(directory) => directory.clone(),
            None => {
                let environment = self.core.environment();
                environment
                    .file_cache_base_path()
                    .join(environment.storage_namespace())
                    .join("Cache")
                    .join("Data")
                    .join(handle.identifier())
            }
        };
        if !directory.is_dir() {
            let created = self.create_parent_directories && fs::create_dir_all(&directory).is_ok();
            if !created {
                return Err(CacheError::CouldNotOpenResource {
                    path: directory.display().to_string(),
                });
            }
        }
        if let Ok(mut slot) = self.cache_directory.write() {
            *slot = Some(directory);
        }
        Ok(())
    }

    fn set(&self, identifier: &str, data: &[u8], _: &[&str], _: Option<u64>) -> CacheResult<()> {
        let path = self.entry_path(identifier)?;
        let directory = path.parent().unwrap_or_else(|| Path::new("."));
        let temporary = directory.join(format!(".{identifier}-{}.tmp", Uuid::now_v7()));

        let written = File::create(&temporary)
            .and_then(|mut file| file.write_all(data))
            .and_then(|_| fs::rename(&temporary, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&temporary);
            return Err(CacheError::unavailable(NAME, format!("{}: {}", path.display(), e)));
        }
        Ok(())
    }

    fn get(&self, identifier: &str) -> CacheResult<Option<Vec<u8>>> {
        let path = self.entry_path(identifier)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::unavailable(NAME, format!("{}: {}", path.display(), e))),
        }
    }

    fn has(&self, identifier: &str) -> CacheResult<bool> {
        Ok(self.entry_path(identifier)?.is_file())
    }

    fn remove(&self, identifier: &str) -> CacheResult<bool> {
        let path = self.entry_path(identifier)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::unavailable(NAME, format!("{}: {}", path.display(), e))),
        }
    }

    fn flush(&self) -> CacheResult<()> {
        let directory = self.cache_directory()?;
        let unavailable = |e: std::io::Error| {
            CacheError::unavailable(NAME, format!("{}: {}", directory.display(), e))
        };
        let read_dir = match fs::read_dir(&directory) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(unavailable(e)),
        };
        for dir_entry in read_dir {
            let path = dir_entry.map_err(unavailable)?.path();
            if path.is_file() {
                match fs::remove_file(&path) {
                    Err(e) if e.kind() != ErrorKind::NotFound => return Err(unavailable(e)),
                    _ => {}
                }
            }
        }
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
    use crate::backend::test_support::{attach, environment};
    use tempfile::TempDir;

    fn create_test_backend() -> (SimpleFileBackend, Arc<dyn CacheHandle>, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend =
            SimpleFileBackend::new(environment(temp_dir.path()), &BackendOptions::default())
                .expect("backend creation should succeed");
        let cache = attach(&backend, "Simple_Cache");
        (backend, cache, temp_dir)
    }

    #[test]
    fn test_payload_stored_verbatim() {
        let (backend, _cache, _temp_dir) = create_test_backend();
        backend.set("a", b"raw bytes", &["ignored"], Some(1)).expect("set");

        let path = backend.cache_directory().expect("assigned").join("a");
        assert_eq!(fs::read(path).expect("read"), b"raw bytes");
        assert_eq!(backend.get("a").expect("get"), Some(b"raw bytes".to_vec()));
    }

    #[test]
    fn test_tags_are_not_tracked() {
        let (backend, _cache, _temp_dir) = create_test_backend();
        backend.set("a", b"1", &["t"], None).expect("set");
        assert!(backend.find_identifiers_by_tag("t").expect("find").is_empty());
        assert_eq!(backend.flush_by_tag("t").expect("flush"), 0);
        assert!(backend.has("a").expect("has"));
    }

    #[test]
    fn test_remove_and_flush() {
        let (backend, _cache, _temp_dir) = create_test_backend();
        backend.set("a", b"1", &[], None).expect("set");
        backend.set("b", b"2", &[], None).expect("set");
        assert!(backend.remove("a").expect("remove"));
        assert!(!backend.remove("a").expect("remove"));
        backend.flush().expect("flush");
        assert!(!backend.has("b").expect("has"));
    }
}
