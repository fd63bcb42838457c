//! Construct caches from kind names.
//!
//! Backend kinds map to constructor functions in a registry that is
//! checked when a kind is registered, so a typo in configuration fails with
//! `InvalidBackend` at `create` time instead of somewhere deep in a request.
//! Kinds may be given fully qualified (`Neos\Cache\Backend\FileBackend`);
//! only the last `\`-separated segment is looked up.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use strata_core::{CacheError, CacheResult, EnvironmentConfiguration};

use crate::backend::{
    Backend, BackendOptions, FileBackend, LmdbBackend, NullBackend, PdoBackend, RedisBackend,
    SimpleFileBackend, TransientMemoryBackend,
};
use crate::frontend::{string, variable, Cache, StringFrontend, VariableFrontend};
use crate::simple_cache::SimpleCache;

/// Builds one backend instance from the environment and its options.
pub type BackendConstructor =
    fn(Arc<EnvironmentConfiguration>, &BackendOptions) -> CacheResult<Box<dyn Backend>>;

/// The two frontend flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontendKind {
    String,
    Variable,
}

impl FrontendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrontendKind::String => string::KIND,
            FrontendKind::Variable => variable::KIND,
        }
    }
}

impl fmt::Display for FrontendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FrontendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match short_name(s) {
            string::KIND => Ok(FrontendKind::String),
            variable::KIND => Ok(FrontendKind::Variable),
            _ => Err(CacheError::InvalidCache {
                kind: s.to_string(),
            }),
        }
    }
}

fn short_name(kind: &str) -> &str {
    kind.rsplit('\\').next().unwrap_or(kind)
}

fn boxed<B: Backend + 'static>(backend: CacheResult<B>) -> CacheResult<Box<dyn Backend>> {
    backend.map(|b| Box::new(b) as Box<dyn Backend>)
}

/// Registry of backend kinds plus the environment every backend is built in.
pub struct CacheFactory {
    environment: Arc<EnvironmentConfiguration>,
    backends: BTreeMap<String, BackendConstructor>,
}

impl CacheFactory {
    /// Factory with every built-in backend registered.
    pub fn new(environment: Arc<EnvironmentConfiguration>) -> Self {
        let mut backends: BTreeMap<String, BackendConstructor> = BTreeMap::new();
        backends.insert("FileBackend".into(), |env, opts| boxed(FileBackend::new(env, opts)));
        backends.insert("SimpleFileBackend".into(), |env, opts| {
            boxed(SimpleFileBackend::new(env, opts))
        });
        backends.insert("PdoBackend".into(), |env, opts| boxed(PdoBackend::new(env, opts)));
        backends.insert("RedisBackend".into(), |env, opts| boxed(RedisBackend::new(env, opts)));
        backends.insert("LmdbBackend".into(), |env, opts| boxed(LmdbBackend::new(env, opts)));
        backends.insert("TransientMemoryBackend".into(), |env, opts| {
            boxed(TransientMemoryBackend::new(env, opts))
        });
        backends.insert("NullBackend".into(), |env, opts| boxed(NullBackend::new(env, opts)));
        Self {
            environment,
            backends,
        }
    }

    /// Factory with no backends at all.
    pub fn empty(environment: Arc<EnvironmentConfiguration>) -> Self {
        Self {
            environment,
            backends: BTreeMap::new(),
        }
    }

    pub fn environment(&self) -> &Arc<EnvironmentConfiguration> {
        &self.environment
    }

    /// Register a backend kind. Kinds must be non-empty, unqualified and
    /// not registered yet.
    pub fn register_backend(&mut self, kind: &str, constructor: BackendConstructor) -> CacheResult<()> {
        let valid = !kind.is_empty()
            && !kind.contains('\\')
            && !kind.chars().any(char::is_whitespace)
            && !self.backends.contains_key(kind);
        if !valid {
            return Err(CacheError::InvalidBackend {
                kind: kind.to_string(),
            });
        }
        self.backends.insert(kind.to_string(), constructor);
        Ok(())
    }

    pub fn backend_kinds(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    pub fn create_backend(&self, kind: &str, options: &BackendOptions) -> CacheResult<Box<dyn Backend>> {
        let constructor = self
            .backends
            .get(short_name(kind))
            .ok_or_else(|| CacheError::InvalidBackend {
                kind: kind.to_string(),
            })?;
        constructor(self.environment.clone(), options)
    }

    /// Build a backend, wrap it in a frontend and assign the back-reference.
    pub fn create(
        &self,
        cache_identifier: &str,
        frontend_kind: &str,
        backend_kind: &str,
        options: &BackendOptions,
    ) -> CacheResult<Cache> {
        let backend = self.create_backend(backend_kind, options)?;
        let cache = match frontend_kind.parse::<FrontendKind>()? {
            FrontendKind::String => {
                Cache::String(StringFrontend::new(cache_identifier, backend)?.into_shared()?)
            }
            FrontendKind::Variable => {
                Cache::Variable(VariableFrontend::new(cache_identifier, backend)?.into_shared()?)
            }
        };
        tracing::debug!(
            cache = cache_identifier,
            frontend = cache.kind(),
            backend = cache.backend_name(),
            "Cache created"
        );
        Ok(cache)
    }

    pub fn create_simple_cache(
        &self,
        cache_identifier: &str,
        backend_kind: &str,
        options: &BackendOptions,
    ) -> CacheResult<Arc<SimpleCache>> {
        let backend = self.create_backend(backend_kind, options)?;
        SimpleCache::new(cache_identifier, backend)?.into_shared()
    }
}

impl fmt::Debug for CacheFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheFactory")
            .field("environment", &self.environment)
            .field("backends", &self.backend_kinds())
            .finish()
    }
}
