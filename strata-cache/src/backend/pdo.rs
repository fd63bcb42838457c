//! SQL database backend.
//!
//! Two tables shared by every cache and installation using the same
//! database, told apart by the `cache` column (cache identifier) and the
//! `context` column (storage namespace):
//!
//! ```sql
//! cache(identifier, cache, context, created, lifetime, content)
//! tags(identifier, cache, context, tag)
//! ```
//!
//! Only the `sqlite:` data source is supported, either `sqlite:<path>` or
//! `sqlite::memory:`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use strata_core::{CacheError, CacheResult, EnvironmentConfiguration};

use super::{now, Backend, BackendCore, BackendOptions, CacheHandle};

const NAME: &str = "PdoBackend";

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    Memory,
    File(PathBuf),
}

impl DataSource {
    /// Parse a `sqlite:` DSN. Other drivers are rejected.
    pub fn parse(dsn: &str) -> CacheResult<Self> {
        match dsn.split_once(':') {
            Some(("sqlite", ":memory:")) => Ok(DataSource::Memory),
            Some(("sqlite", path)) if !path.is_empty() => Ok(DataSource::File(PathBuf::from(path))),
            Some(("sqlite", _)) => Err(invalid("sqlite data source needs a path")),
            Some((driver, _)) => Err(invalid(format!("unsupported database driver \"{driver}\""))),
            None => Err(invalid(format!("malformed data source name \"{dsn}\""))),
        }
    }

    fn open(&self) -> rusqlite::Result<Connection> {
        match self {
            DataSource::Memory => Connection::open_in_memory(),
            DataSource::File(path) => Connection::open(path),
        }
    }
}

/// Rows belonging to one cache of one installation.
struct Scope {
    cache: String,
    context: String,
}

/// Cache backend on top of an SQL database.
pub struct PdoBackend {
    core: BackendCore,
    data_source: DataSource,
    cache_table: String,
    tags_table: String,
    connection: Mutex<Option<Connection>>,
}

impl PdoBackend {
    pub fn new(
        environment: Arc<EnvironmentConfiguration>,
        options: &BackendOptions,
    ) -> CacheResult<Self> {
        options.ensure_known(
            NAME,
            &[
                "dataSourceName",
                "username",
                "password",
                "cacheTableName",
                "tagsTableName",
                "defaultLifetime",
            ],
        )?;
        let dsn = options
            .string(NAME, "dataSourceName")?
            .ok_or_else(|| invalid("option \"dataSourceName\" is required"))?;
        if options.string(NAME, "username")?.is_some() {
            tracing::debug!("PdoBackend ignores credentials for sqlite data sources");
        }
        let cache_table = table_name(options.string(NAME, "cacheTableName")?, "cache")?;
        let tags_table = table_name(options.string(NAME, "tagsTableName")?, "tags")?;
        if cache_table == tags_table {
            return Err(invalid("cache and tags tables must differ"));
        }
        Ok(Self {
            core: BackendCore::new(NAME, environment, options)?,
            data_source: DataSource::parse(&dsn)?,
            cache_table,
            tags_table,
            connection: Mutex::new(None),
        })
    }

    /// Create the cache and tags tables if they do not exist yet.
    pub fn setup(&self) -> CacheResult<()> {
        self.with_connection(|_| Ok(()))
    }

    fn create_schema(&self, connection: &Connection) -> rusqlite::Result<()> {
        connection.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{cache}\" (
                identifier TEXT NOT NULL,
                cache TEXT NOT NULL,
                context TEXT NOT NULL,
                created INTEGER NOT NULL,
                lifetime INTEGER NOT NULL DEFAULT 0,
                content BLOB,
                PRIMARY KEY (identifier, cache, context)
            );
            CREATE TABLE IF NOT EXISTS \"{tags}\" (
                identifier TEXT NOT NULL,
                cache TEXT NOT NULL,
                context TEXT NOT NULL,
                tag TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS \"{tags}_identifier\" ON \"{tags}\" (identifier, cache, context);
            CREATE INDEX IF NOT EXISTS \"{tags}_tag\" ON \"{tags}\" (tag, cache, context);",
            cache = self.cache_table,
            tags = self.tags_table,
        ))
    }

    /// Run `f` on the lazily opened connection.
    ///
    /// A failed statement leaves the connection in place; a failed open is
    /// retried on the next call.
    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> CacheResult<T> {
        let mut slot = self
            .connection
            .lock()
            .map_err(|_| CacheError::unavailable(NAME, "connection lock poisoned"))?;
        if slot.is_none() {
            let connection = self.data_source.open().map_err(sql_error)?;
            self.create_schema(&connection).map_err(sql_error)?;
            tracing::debug!(data_source = ?self.data_source, "PdoBackend connected");
            *slot = Some(connection);
        }
        match slot.as_mut() {
            Some(connection) => f(connection).map_err(sql_error),
            None => Err(CacheError::unavailable(NAME, "no connection")),
        }
    }

    fn scope(&self) -> CacheResult<Scope> {
        Ok(Scope {
            cache: self.core.cache_identifier()?,
            context: self.core.environment().storage_namespace(),
        })
    }

    fn remove_within(&self, tx: &Transaction<'_>, scope: &Scope, identifier: &str) -> rusqlite::Result<usize> {
        tx.execute(
            &format!(
                "DELETE FROM \"{}\" WHERE identifier = ?1 AND cache = ?2 AND context = ?3",
                self.tags_table
            ),
            params![identifier, scope.cache, scope.context],
        )?;
        tx.execute(
            &format!(
                "DELETE FROM \"{}\" WHERE identifier = ?1 AND cache = ?2 AND context = ?3",
                self.cache_table
            ),
            params![identifier, scope.cache, scope.context],
        )
    }
}

impl Backend for PdoBackend {
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
        let scope = self.scope()?;
        let lifetime = i64::try_from(self.core.resolve_lifetime(lifetime)).unwrap_or(i64::MAX);
        self.with_connection(|connection| {
            let tx = connection.transaction()?;
            self.remove_within(&tx, &scope, identifier)?;
            tx.execute(
                &format!(
                    "INSERT INTO \"{}\" (identifier, cache, context, created, lifetime, content)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    self.cache_table
                ),
                params![identifier, scope.cache, scope.context, now(), lifetime, data],
            )?;
            {
                let mut insert_tag = tx.prepare(&format!(
                    "INSERT INTO \"{}\" (identifier, cache, context, tag) VALUES (?1, ?2, ?3, ?4)",
                    self.tags_table
                ))?;
                for tag in tags {
                    insert_tag.execute(params![identifier, scope.cache, scope.context, tag])?;
                }
            }
            tx.commit()
        })
    }

    fn get(&self, identifier: &str) -> CacheResult<Option<Vec<u8>>> {
        let scope = self.scope()?;
        self.with_connection(|connection| {
            connection
                .query_row(
                    &format!(
                        "SELECT content FROM \"{}\"
                         WHERE identifier = ?1 AND cache = ?2 AND context = ?3
                         AND (lifetime = 0 OR created + lifetime >= ?4)",
                        self.cache_table
                    ),
                    params![identifier, scope.cache, scope.context, now()],
                    |row| row.get::<_, Option<Vec<u8>>>(0),
                )
                .optional()
                .map(|content| content.map(Option::unwrap_or_default))
        })
    }

    fn has(&self, identifier: &str) -> CacheResult<bool> {
        let scope = self.scope()?;
        self.with_connection(|connection| {
            connection.query_row(
                &format!(
                    "SELECT COUNT(*) FROM \"{}\"
                     WHERE identifier = ?1 AND cache = ?2 AND context = ?3
                     AND (lifetime = 0 OR created + lifetime >= ?4)",
                    self.cache_table
                ),
                params![identifier, scope.cache, scope.context, now()],
                |row| row.get::<_, i64>(0),
            )
        })
        .map(|count| count > 0)
    }

    fn remove(&self, identifier: &str) -> CacheResult<bool> {
        let scope = self.scope()?;
        self.with_connection(|connection| {
            let tx = connection.transaction()?;
            let removed = self.remove_within(&tx, &scope, identifier)?;
            tx.commit()?;
            Ok(removed > 0)
        })
    }

    fn flush(&self) -> CacheResult<()> {
        let scope = self.scope()?;
        self.with_connection(|connection| {
            let tx = connection.transaction()?;
            for table in [&self.tags_table, &self.cache_table] {
                tx.execute(
                    &format!("DELETE FROM \"{table}\" WHERE cache = ?1 AND context = ?2"),
                    params![scope.cache, scope.context],
                )?;
            }
            tx.commit()
        })
    }

    fn flush_by_tag(&self, tag: &str) -> CacheResult<u64> {
        let scope = self.scope()?;
        self.with_connection(|connection| {
            let tx = connection.transaction()?;
            let tagged = format!(
                "SELECT identifier FROM \"{}\" WHERE tag = ?1 AND cache = ?2 AND context = ?3",
                self.tags_table
            );
            let flushed = tx.execute(
                &format!(
                    "DELETE FROM \"{}\" WHERE cache = ?2 AND context = ?3 AND identifier IN ({tagged})",
                    self.cache_table
                ),
                params![tag, scope.cache, scope.context],
            )?;
            // also drops the flushed entries' other tags
            tx.execute(
                &format!(
                    "DELETE FROM \"{}\" WHERE cache = ?2 AND context = ?3 AND identifier IN ({tagged})",
                    self.tags_table
                ),
                params![tag, scope.cache, scope.context],
            )?;
            tx.commit()?;
            Ok(flushed as u64)
        })
    }

    fn find_identifiers_by_tag(&self, tag: &str) -> CacheResult<Vec<String>> {
        let scope = self.scope()?;
        self.with_connection(|connection| {
            let mut statement = connection.prepare(&format!(
                "SELECT t.identifier FROM \"{tags}\" t
                 JOIN \"{cache}\" c
                   ON c.identifier = t.identifier AND c.cache = t.cache AND c.context = t.context
                 WHERE t.tag = ?1 AND t.cache = ?2 AND t.context = ?3
                 AND (c.lifetime = 0 OR c.created + c.lifetime >= ?4)
                 ORDER BY t.identifier",
                tags = self.tags_table,
                cache = self.cache_table,
            ))?;
            let rows = statement.query_map(params![tag, scope.cache, scope.context, now()], |row| {
                row.get::<_, String>(0)
            })?;
            rows.collect()
        })
    }

    fn collect_garbage(&self) -> CacheResult<()> {
        let scope = self.scope()?;
        let collected = self.with_connection(|connection| {
            let now = now();
            let tx = connection.transaction()?;
            tx.execute(
                &format!(
                    "DELETE FROM \"{tags}\" WHERE cache = ?1 AND context = ?2 AND identifier IN (
                        SELECT identifier FROM \"{cache}\"
                        WHERE cache = ?1 AND context = ?2 AND lifetime > 0 AND created + lifetime < ?3
                    )",
                    tags = self.tags_table,
                    cache = self.cache_table,
                ),
                params![scope.cache, scope.context, now],
            )?;
            let collected = tx.execute(
                &format!(
                    "DELETE FROM \"{}\"
                     WHERE cache = ?1 AND context = ?2 AND lifetime > 0 AND created + lifetime < ?3",
                    self.cache_table
                ),
                params![scope.cache, scope.context, now],
            )?;
            tx.commit()?;
            Ok(collected)
        })?;
        tracing::debug!(cache = %scope.cache, collected, "PdoBackend garbage collected");
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> CacheError {
    CacheError::InvalidOptions {
        backend: NAME.to_string(),
        reason: reason.into(),
    }
}

fn sql_error(e: rusqlite::Error) -> CacheError {
    CacheError::unavailable(NAME, e)
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn table_name(configured: Option<String>, default: &str) -> CacheResult<String> {
    let name = configured.unwrap_or_else(|| default.to_string());
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(invalid(format!("invalid table name \"{name}\"")))
    }
}
