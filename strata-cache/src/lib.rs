//! STRATA Cache - Tag-Aware Cache Engine
//!
//! Pluggable storage [`backend`]s behind identifier-validating
//! [`frontend`]s, a PSR-16 style [`SimpleCache`], a kind-name
//! [`CacheFactory`] and the installation-wide [`CacheManager`].
//!
//! ```ignore
//! let environment = Arc::new(EnvironmentConfiguration::from_env()?);
//! let factory = CacheFactory::new(environment);
//! let cache = factory.create("Flow_Routing", "VariableFrontend", "FileBackend", &BackendOptions::new())?;
//! let routes = cache.as_variable().expect("variable frontend");
//! routes.set("home", &route, &["routes"], None)?;
//! ```

pub mod backend;
pub mod factory;
pub mod frontend;
pub mod manager;
pub mod simple_cache;

pub use backend::{
    Backend, BackendOptions, CacheHandle, FileBackend, LmdbBackend, LmdbBackendError,
    NullBackend, PdoBackend, RedisBackend, SimpleFileBackend, TransientMemoryBackend,
    DEFAULT_LIFETIME,
};
pub use factory::{BackendConstructor, CacheFactory, FrontendKind};
pub use frontend::{Cache, CacheFrontend, StringFrontend, VariableFrontend};
pub use manager::{CacheDefinition, CacheManager, DEFAULT_CACHE_DEFINITION};
pub use simple_cache::SimpleCache;
