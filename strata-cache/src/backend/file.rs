//! File backend: one file per entry, tags and expiry kept in a trailer.
//!
//! # File Format
//!
//! ```text
//! [payload][tags joined by ' '][expiry: 14 bytes, space padded][payload length: 10 bytes, space padded]
//! ```
//!
//! `expiry` is a Unix timestamp in seconds, `0` for entries that never
//! expire. The fixed-width trailer lets `has`, tag lookups and garbage
//! collection read 24 bytes plus the tag list without touching the payload.
//!
//! # Atomicity
//!
//! Entries are written to a hidden sibling file and renamed into place, so
//! concurrent readers in other processes see either the old or the new
//! entry, never a partial one.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, Weak};
use std::time::SystemTime;

use strata_core::{CacheError, CacheResult, EnvironmentConfiguration};
use uuid::Uuid;

use super::{is_expired, now, Backend, BackendCore, BackendOptions, CacheHandle};

const NAME: &str = "FileBackend";

/// Width of the expiry field in the trailer.
pub const EXPIRY_TIME_LENGTH: usize = 14;
/// Width of the payload length field in the trailer.
pub const DATA_SIZE_DIGITS: usize = 10;

const TRAILER_LENGTH: usize = EXPIRY_TIME_LENGTH + DATA_SIZE_DIGITS;

/// Trailer and tags of one entry file, read without the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
struct EntryMetadata {
    data_size: usize,
    expiry: i64,
    tags: Vec<String>,
}

/// Stores entries as individual files below a per-cache directory.
///
/// Without a `cacheDirectory` option the directory is
/// `<file_cache_base_path>/<storage_namespace>/Cache/Data/<cache identifier>/`.
pub struct FileBackend {
    core: BackendCore,
    configured_directory: Option<PathBuf>,
    create_parent_directories: bool,
    cache_directory: RwLock<Option<PathBuf>>,
}

impl FileBackend {
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

    /// Directory holding this cache's entry files, once a cache is assigned.
    pub fn cache_directory(&self) -> CacheResult<PathBuf> {
        self.cache_directory
            .read()
            .ok()
            .and_then(|dir| dir.clone())
            .ok_or_else(|| CacheError::CacheNotAssigned {
                backend: NAME.to_string(),
            })
    }

    fn default_directory(&self, cache_identifier: &str) -> PathBuf {
        let environment = self.core.environment();
        environment
            .file_cache_base_path()
            .join(environment.storage_namespace())
            .join("Cache")
            .join("Data")
            .join(cache_identifier)
    }

    fn prepare_directory(&self, directory: &Path) -> CacheResult<()> {
        if directory.is_dir() {
            return Ok(());
        }
        let could_not_open = || CacheError::CouldNotOpenResource {
            path: directory.display().to_string(),
        };
        if !self.create_parent_directories {
            return Err(could_not_open());
        }
        fs::create_dir_all(directory).map_err(|e| {
            tracing::warn!(path = %directory.display(), error = %e, "Could not create cache directory");
            could_not_open()
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

    fn write_entry(&self, path: &Path, identifier: &str, contents: &[u8]) -> CacheResult<()> {
        let directory = path.parent().unwrap_or_else(|| Path::new("."));
        let temporary = directory.join(format!(".{identifier}-{}.tmp", Uuid::now_v7()));

        let written = File::create(&temporary)
            .and_then(|mut file| file.write_all(contents).and_then(|_| file.sync_data()))
            .and_then(|_| fs::rename(&temporary, path));
        if let Err(e) = written {
            let _ = fs::remove_file(&temporary);
            return Err(io_error(path, e));
        }
        Ok(())
    }

    /// Entry file names, skipping temporary files and anything that is not
    /// a valid identifier for the owning cache.
    fn entry_files(&self) -> CacheResult<Vec<(String, PathBuf)>> {
        let directory = self.cache_directory()?;
        let cache = self.core.cache()?;
        let read_dir = match fs::read_dir(&directory) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&directory, e)),
        };

        let mut files = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry.map_err(|e| io_error(&directory, e))?;
            let Some(name) = dir_entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || !cache.is_valid_entry_identifier(&name) {
                continue;
            }
            if dir_entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                files.push((name, dir_entry.path()));
            }
        }
        files.sort();
        Ok(files)
    }

    fn remove_path(&self, path: &Path) -> CacheResult<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(path, e)),
        }
    }
}

impl Backend for FileBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn set_cache(&self, cache: Weak<dyn CacheHandle>) -> CacheResult<()> {
        let handle = self.core.assign(cache)?;
        let directory = self
            .configured_directory
            .clone()
            .unwrap_or_else(|| self.default_directory(handle.identifier()));
        self.prepare_directory(&directory)?;
        tracing::debug!(
            cache = handle.identifier(),
            directory = %directory.display(),
            "File cache directory configured"
        );
        if let Ok(mut slot) = self.cache_directory.write() {
            *slot = Some(directory);
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
        let path = self.entry_path(identifier)?;
        let contents = encode_entry(data, tags, self.core.expiry_time(lifetime));
        self.write_entry(&path, identifier, &contents)
    }

    fn get(&self, identifier: &str) -> CacheResult<Option<Vec<u8>>> {
        let path = self.entry_path(identifier)?;
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        let (data, metadata) = decode_entry(identifier, &contents)?;
        if is_expired(metadata.expiry, now()) {
            return Ok(None);
        }
        Ok(Some(data.to_vec()))
    }

    fn has(&self, identifier: &str) -> CacheResult<bool> {
        let path = self.entry_path(identifier)?;
        match read_metadata(identifier, &path)? {
            Some((metadata, _)) => Ok(!is_expired(metadata.expiry, now())),
            None => Ok(false),
        }
    }

    fn remove(&self, identifier: &str) -> CacheResult<bool> {
        let path = self.entry_path(identifier)?;
        self.remove_path(&path)
    }

    fn flush(&self) -> CacheResult<()> {
        let directory = self.cache_directory()?;
        let read_dir = match fs::read_dir(&directory) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_error(&directory, e)),
        };
        for dir_entry in read_dir {
            let path = dir_entry.map_err(|e| io_error(&directory, e))?.path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match removed {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(io_error(&path, e)),
                _ => {}
            }
        }
        tracing::debug!(directory = %directory.display(), "File cache flushed");
        Ok(())
    }

    fn flush_by_tag(&self, tag: &str) -> CacheResult<u64> {
        let mut flushed = 0;
        for identifier in self.find_identifiers_by_tag(tag)? {
            if self.remove(&identifier)? {
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    fn find_identifiers_by_tag(&self, tag: &str) -> CacheResult<Vec<String>> {
        let now = now();
        let mut identifiers = Vec::new();
        for (identifier, path) in self.entry_files()? {
            let metadata = match read_metadata(&identifier, &path) {
                Ok(Some((metadata, _))) => metadata,
                Ok(None) => continue,
                Err(CacheError::CorruptEntry { reason, .. }) => {
                    tracing::warn!(identifier = %identifier, reason = %reason, "Skipping corrupt cache file");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !is_expired(metadata.expiry, now) && metadata.tags.iter().any(|t| t == tag) {
                identifiers.push(identifier);
            }
        }
        Ok(identifiers)
    }

    fn collect_garbage(&self) -> CacheResult<()> {
        let now = now();
        let mut collected = 0u64;
        for (identifier, path) in self.entry_files()? {
            let Ok(Some((metadata, stamp))) = read_metadata(&identifier, &path) else {
                continue;
            };
            if !is_expired(metadata.expiry, now) {
                continue;
            }
            // Only delete the file we judged: a concurrent set renames a new
            // file into place, which changes length or mtime.
            if file_stamp(&path).ok() == Some(stamp) && self.remove_path(&path)? {
                collected += 1;
            }
        }
        tracing::debug!(collected, "File cache garbage collected");
        Ok(())
    }
}

// ============================================================================
// ENTRY ENCODING
// ============================================================================

fn encode_entry(data: &[u8], tags: &[&str], expiry: i64) -> Vec<u8> {
    let tag_list = tags.join(" ");
    let mut contents = Vec::with_capacity(data.len() + tag_list.len() + TRAILER_LENGTH);
    contents.extend_from_slice(data);
    contents.extend_from_slice(tag_list.as_bytes());
    contents.extend_from_slice(
        format!("{:<width$}", expiry, width = EXPIRY_TIME_LENGTH).as_bytes(),
    );
    contents.extend_from_slice(
        format!("{:<width$}", data.len(), width = DATA_SIZE_DIGITS).as_bytes(),
    );
    contents
}

fn decode_entry<'a>(identifier: &str, contents: &'a [u8]) -> CacheResult<(&'a [u8], EntryMetadata)> {
    if contents.len() < TRAILER_LENGTH {
        return Err(corrupt(identifier, "file shorter than its trailer"));
    }
    let trailer_start = contents.len() - TRAILER_LENGTH;
    let (expiry, data_size) = parse_trailer(identifier, &contents[trailer_start..])?;
    if data_size > trailer_start {
        return Err(corrupt(identifier, "payload length exceeds file size"));
    }
    let tags = parse_tags(identifier, &contents[data_size..trailer_start])?;
    Ok((
        &contents[..data_size],
        EntryMetadata {
            data_size,
            expiry,
            tags,
        },
    ))
}

fn parse_trailer(identifier: &str, trailer: &[u8]) -> CacheResult<(i64, usize)> {
    let text = std::str::from_utf8(trailer).map_err(|_| corrupt(identifier, "trailer is not ASCII"))?;
    let (expiry, data_size) = text.split_at(EXPIRY_TIME_LENGTH);
    let expiry = expiry
        .trim()
        .parse::<i64>()
        .map_err(|_| corrupt(identifier, "unreadable expiry time"))?;
    let data_size = data_size
        .trim()
        .parse::<usize>()
        .map_err(|_| corrupt(identifier, "unreadable payload length"))?;
    Ok((expiry, data_size))
}

fn parse_tags(identifier: &str, raw: &[u8]) -> CacheResult<Vec<String>> {
    let text = std::str::from_utf8(raw).map_err(|_| corrupt(identifier, "tag list is not UTF-8"))?;
    Ok(text
        .split(' ')
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect())
}

/// Length and modification time, used to detect a file replaced under us.
type FileStamp = (u64, Option<SystemTime>);

fn file_stamp(path: &Path) -> io::Result<FileStamp> {
    let metadata = fs::metadata(path)?;
    Ok((metadata.len(), metadata.modified().ok()))
}

/// Read trailer and tags only. `None` when the file does not exist.
fn read_metadata(identifier: &str, path: &Path) -> CacheResult<Option<(EntryMetadata, FileStamp)>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    };
    let file_metadata = file.metadata().map_err(|e| io_error(path, e))?;
    let stamp = (file_metadata.len(), file_metadata.modified().ok());
    let length = usize::try_from(file_metadata.len())
        .map_err(|_| corrupt(identifier, "file too large"))?;
    if length < TRAILER_LENGTH {
        return Err(corrupt(identifier, "file shorter than its trailer"));
    }

    let trailer_start = length - TRAILER_LENGTH;
    let mut trailer = [0u8; TRAILER_LENGTH];
    file.seek(SeekFrom::Start(trailer_start as u64))
        .and_then(|_| file.read_exact(&mut trailer))
        .map_err(|e| io_error(path, e))?;
    let (expiry, data_size) = parse_trailer(identifier, &trailer)?;
    if data_size > trailer_start {
        return Err(corrupt(identifier, "payload length exceeds file size"));
    }

    let mut raw_tags = vec![0u8; trailer_start - data_size];
    file.seek(SeekFrom::Start(data_size as u64))
        .and_then(|_| file.read_exact(&mut raw_tags))
        .map_err(|e| io_error(path, e))?;
    let tags = parse_tags(identifier, &raw_tags)?;

    Ok(Some((
        EntryMetadata {
            data_size,
            expiry,
            tags,
        },
        stamp,
    )))
}

fn corrupt(identifier: &str, reason: &str) -> CacheError {
    CacheError::CorruptEntry {
        identifier: identifier.to_string(),
        reason: reason.to_string(),
    }
}

fn io_error(path: &Path, e: io::Error) -> CacheError {
    CacheError::unavailable(NAME, format!("{}: {}", path.display(), e))
}
