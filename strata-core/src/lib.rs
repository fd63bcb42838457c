//! STRATA Core - Shared Types
//!
//! Environment description, application context, identifier validation and
//! error types. Every other crate in the workspace depends on this one.

pub mod context;
pub mod environment;
pub mod error;
pub mod identifier;
pub mod telemetry;

pub use context::{ApplicationContext, ROOT_CONTEXTS};
pub use environment::{
    EnvironmentConfiguration, DEFAULT_APPLICATION_IDENTIFIER, DEFAULT_MAXIMUM_PATH_LENGTH,
};
pub use error::{
    CacheError, CacheResult, ConfigError, ConfigResult, StrataError, StrataResult,
};
pub use identifier::{
    is_valid_cache_identifier, is_valid_entry_identifier, is_valid_tag,
    validate_cache_identifier, validate_identifier, validate_tags, CACHE_IDENTIFIER_PATTERN,
    IDENTIFIER_PATTERN, MAX_IDENTIFIER_LENGTH,
};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
