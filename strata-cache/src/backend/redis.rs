//! Redis backend.
//!
//! # Key Layout
//!
//! Every key starts with `<storage namespace>:<cache identifier>:`:
//!
//! - `entry:<identifier>`: payload, with a native TTL when the lifetime is limited
//! - `entries`: list of every identifier this cache has stored
//! - `tag:<tag>`: set of identifiers carrying the tag
//! - `tags:<identifier>`: set of tags of one entry
//!
//! Multi-key updates run as MULTI/EXEC transactions or Lua scripts, so other
//! clients never observe a half-written entry.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError, RedisResult};
use strata_core::{CacheError, CacheResult, EnvironmentConfiguration};

use super::{Backend, BackendCore, BackendOptions, CacheHandle};

const NAME: &str = "RedisBackend";

pub const DEFAULT_PORT: u16 = 6379;

/// Connect timeout in seconds.
pub const DEFAULT_TIMEOUT: u64 = 5;

/// KEYS[1] = entries list, ARGV[1] = key prefix
const FLUSH_SCRIPT: &str = r"
local prefix = ARGV[1]
local identifiers = redis.call('LRANGE', KEYS[1], 0, -1)
for _, identifier in ipairs(identifiers) do
    redis.call('DEL', prefix .. 'entry:' .. identifier)
    local tags = redis.call('SMEMBERS', prefix .. 'tags:' .. identifier)
    for _, tag in ipairs(tags) do
        redis.call('DEL', prefix .. 'tag:' .. tag)
    end
    redis.call('DEL', prefix .. 'tags:' .. identifier)
end
redis.call('DEL', KEYS[1])
return #identifiers
";

/// KEYS[1] = tag set, ARGV[1] = key prefix. Returns the number of entries deleted.
const FLUSH_BY_TAG_SCRIPT: &str = r"
local prefix = ARGV[1]
local identifiers = redis.call('SMEMBERS', KEYS[1])
local flushed = 0
for _, identifier in ipairs(identifiers) do
    flushed = flushed + redis.call('DEL', prefix .. 'entry:' .. identifier)
    local tags = redis.call('SMEMBERS', prefix .. 'tags:' .. identifier)
    for _, tag in ipairs(tags) do
        redis.call('SREM', prefix .. 'tag:' .. tag, identifier)
    end
    redis.call('DEL', prefix .. 'tags:' .. identifier)
    redis.call('LREM', prefix .. 'entries', 0, identifier)
end
redis.call('DEL', KEYS[1])
return flushed
";

/// KEYS[1] = entries list, ARGV[1] = key prefix. Unlinks identifiers whose
/// entry key Redis has already expired.
const COLLECT_GARBAGE_SCRIPT: &str = r"
local prefix = ARGV[1]
local identifiers = redis.call('LRANGE', KEYS[1], 0, -1)
local collected = 0
for _, identifier in ipairs(identifiers) do
    if redis.call('EXISTS', prefix .. 'entry:' .. identifier) == 0 then
        local tags = redis.call('SMEMBERS', prefix .. 'tags:' .. identifier)
        for _, tag in ipairs(tags) do
            redis.call('SREM', prefix .. 'tag:' .. tag, identifier)
        end
        redis.call('DEL', prefix .. 'tags:' .. identifier)
        redis.call('LREM', KEYS[1], 0, identifier)
        collected = collected + 1
    end
end
return collected
";

/// Key builder for one cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    pub fn new(environment: &EnvironmentConfiguration, cache_identifier: &str) -> Self {
        Self {
            prefix: format!("{}:{}:", environment.storage_namespace(), cache_identifier),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn entry(&self, identifier: &str) -> String {
        format!("{}entry:{}", self.prefix, identifier)
    }

    pub fn entries(&self) -> String {
        format!("{}entries", self.prefix)
    }

    pub fn tag(&self, tag: &str) -> String {
        format!("{}tag:{}", self.prefix, tag)
    }

    pub fn tags(&self, identifier: &str) -> String {
        format!("{}tags:{}", self.prefix, identifier)
    }
}

/// Cache backend on a Redis server.
///
/// The connection is opened on first use and re-opened after I/O failures.
pub struct RedisBackend {
    core: BackendCore,
    connection_info: ConnectionInfo,
    timeout: Duration,
    connection: Mutex<Option<redis::Connection>>,
}

impl RedisBackend {
    pub fn new(
        environment: Arc<EnvironmentConfiguration>,
        options: &BackendOptions,
    ) -> CacheResult<Self> {
        options.ensure_known(
            NAME,
            &["hostname", "port", "database", "password", "timeout", "defaultLifetime"],
        )?;
        let hostname = options
            .string(NAME, "hostname")?
            .unwrap_or_else(|| "127.0.0.1".to_string());
        let port = match options.u64(NAME, "port")? {
            Some(port) => u16::try_from(port)
                .ok()
                .filter(|port| *port > 0)
                .ok_or_else(|| invalid(format!("port {port} is out of range")))?,
            None => DEFAULT_PORT,
        };
        let database = options.u64(NAME, "database")?.unwrap_or(0);
        let database = i64::try_from(database)
            .map_err(|_| invalid(format!("database {database} is out of range")))?;
        let timeout = match options.u64(NAME, "timeout")?.unwrap_or(DEFAULT_TIMEOUT) {
            0 => return Err(invalid("timeout must be positive")),
            seconds => Duration::from_secs(seconds),
        };

        // A hostname that is a path addresses a unix socket.
        let addr = if hostname.starts_with('/') {
            ConnectionAddr::Unix(PathBuf::from(&hostname))
        } else {
            ConnectionAddr::Tcp(hostname, port)
        };
        let connection_info = ConnectionInfo {
            addr,
            redis: RedisConnectionInfo {
                db: database,
                password: options.string(NAME, "password")?.filter(|p| !p.is_empty()),
                ..Default::default()
            },
        };

        Ok(Self {
            core: BackendCore::new(NAME, environment, options)?,
            connection_info,
            timeout,
            connection: Mutex::new(None),
        })
    }

    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.connection_info
    }

    fn keys(&self) -> CacheResult<RedisKeys> {
        Ok(RedisKeys::new(self.core.environment(), &self.core.cache_identifier()?))
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut redis::Connection) -> RedisResult<T>,
    ) -> CacheResult<T> {
        let mut slot = self
            .connection
            .lock()
            .map_err(|_| CacheError::unavailable(NAME, "connection lock poisoned"))?;
        if slot.is_none() {
            let client = redis::Client::open(self.connection_info.clone()).map_err(redis_error)?;
            let connection = client
                .get_connection_with_timeout(self.timeout)
                .map_err(redis_error)?;
            tracing::debug!(addr = ?self.connection_info.addr, "RedisBackend connected");
            *slot = Some(connection);
        }
        let Some(connection) = slot.as_mut() else {
            return Err(CacheError::unavailable(NAME, "no connection"));
        };
        match f(connection) {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
                    *slot = None;
                }
                Err(redis_error(e))
            }
        }
    }
}

impl Backend for RedisBackend {
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
        let keys = self.keys()?;
        let lifetime = self.core.resolve_lifetime(lifetime);
        let tags_key = keys.tags(identifier);
        let entries_key = keys.entries();

        self.with_connection(|con| {
            redis::transaction(con, &[tags_key.as_str()], |con, pipe| {
                let previous: Vec<String> = redis::cmd("SMEMBERS").arg(&tags_key).query(con)?;
                for tag in &previous {
                    pipe.cmd("SREM").arg(keys.tag(tag)).arg(identifier).ignore();
                }
                pipe.cmd("DEL").arg(&tags_key).ignore();

                let set = pipe.cmd("SET").arg(keys.entry(identifier)).arg(data);
                if lifetime > 0 {
                    set.arg("EX").arg(lifetime);
                }
                set.ignore();

                pipe.cmd("LREM").arg(&entries_key).arg(0).arg(identifier).ignore();
                pipe.cmd("RPUSH").arg(&entries_key).arg(identifier).ignore();
                for tag in tags {
                    pipe.cmd("SADD").arg(keys.tag(tag)).arg(identifier).ignore();
                    pipe.cmd("SADD").arg(&tags_key).arg(*tag).ignore();
                }
                pipe.query::<Option<()>>(con)
            })
        })
    }

    fn get(&self, identifier: &str) -> CacheResult<Option<Vec<u8>>> {
        let key = self.keys()?.entry(identifier);
        self.with_connection(|con| redis::cmd("GET").arg(&key).query(con))
    }

    fn has(&self, identifier: &str) -> CacheResult<bool> {
        let key = self.keys()?.entry(identifier);
        self.with_connection(|con| redis::cmd("EXISTS").arg(&key).query(con))
    }

    fn remove(&self, identifier: &str) -> CacheResult<bool> {
        let keys = self.keys()?;
        let tags_key = keys.tags(identifier);

        let (deleted,): (u64,) = self.with_connection(|con| {
            redis::transaction(con, &[tags_key.as_str()], |con, pipe| {
                let tags: Vec<String> = redis::cmd("SMEMBERS").arg(&tags_key).query(con)?;
                pipe.cmd("DEL").arg(keys.entry(identifier));
                pipe.cmd("LREM").arg(keys.entries()).arg(0).arg(identifier).ignore();
                for tag in &tags {
                    pipe.cmd("SREM").arg(keys.tag(tag)).arg(identifier).ignore();
                }
                pipe.cmd("DEL").arg(&tags_key).ignore();
                pipe.query::<Option<(u64,)>>(con)
            })
        })?;
        Ok(deleted > 0)
    }

    fn flush(&self) -> CacheResult<()> {
        let keys = self.keys()?;
        let flushed: u64 = self.with_connection(|con| {
            redis::Script::new(FLUSH_SCRIPT)
                .key(keys.entries())
                .arg(keys.prefix())
                .invoke(con)
        })?;
        tracing::debug!(prefix = keys.prefix(), flushed, "RedisBackend flushed");
        Ok(())
    }

    fn flush_by_tag(&self, tag: &str) -> CacheResult<u64> {
        let keys = self.keys()?;
        self.with_connection(|con| {
            redis::Script::new(FLUSH_BY_TAG_SCRIPT)
                .key(keys.tag(tag))
                .arg(keys.prefix())
                .invoke(con)
        })
    }

    fn find_identifiers_by_tag(&self, tag: &str) -> CacheResult<Vec<String>> {
        let keys = self.keys()?;
        let tag_key = keys.tag(tag);
        let mut identifiers = self.with_connection(|con| {
            let candidates: Vec<String> = redis::cmd("SMEMBERS").arg(&tag_key).query(con)?;
            if candidates.is_empty() {
                return Ok(candidates);
            }
            let mut pipe = redis::pipe();
            for identifier in &candidates {
                pipe.cmd("EXISTS").arg(keys.entry(identifier));
            }
            let live: Vec<bool> = pipe.query(con)?;
            Ok(candidates
                .into_iter()
                .zip(live)
                .filter_map(|(identifier, live)| live.then_some(identifier))
                .collect::<Vec<_>>())
        })?;
        identifiers.sort();
        Ok(identifiers)
    }

    fn collect_garbage(&self) -> CacheResult<()> {
        let keys = self.keys()?;
        let collected: u64 = self.with_connection(|con| {
            redis::Script::new(COLLECT_GARBAGE_SCRIPT)
                .key(keys.entries())
                .arg(keys.prefix())
                .invoke(con)
        })?;
        tracing::debug!(prefix = keys.prefix(), collected, "RedisBackend garbage collected");
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> CacheError {
    CacheError::InvalidOptions {
        backend: NAME.to_string(),
        reason: reason.into(),
    }
}

fn redis_error(e: RedisError) -> CacheError {
    CacheError::unavailable(NAME, e)
}
