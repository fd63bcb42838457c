//! Error types for STRATA operations

use thiserror::Error;

/// Cache engine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Invalid entry identifier: \"{identifier}\"")]
    InvalidIdentifier { identifier: String },

    #[error("Invalid tag: \"{tag}\"")]
    InvalidTag { tag: String },

    #[error("Unknown cache backend: {kind}")]
    InvalidBackend { kind: String },

    #[error("Unknown cache frontend: {kind}")]
    InvalidCache { kind: String },

    #[error("A cache with identifier \"{identifier}\" is already registered")]
    DuplicateCache { identifier: String },

    #[error("No cache with identifier \"{identifier}\" is registered")]
    NoSuchCache { identifier: String },

    #[error("Backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Corrupt cache entry \"{identifier}\": {reason}")]
    CorruptEntry { identifier: String, reason: String },

    #[error("Could not open resource: {path}")]
    CouldNotOpenResource { path: String },

    #[error("Path {path} exceeds the maximum path length of {maximum}")]
    PathTooLong { path: String, maximum: usize },

    #[error("Invalid options for {backend}: {reason}")]
    InvalidOptions { backend: String, reason: String },

    #[error("No cache has been assigned to backend {backend}")]
    CacheNotAssigned { backend: String },

    #[error("Could not serialize entry \"{identifier}\": {reason}")]
    Serialization { identifier: String, reason: String },
}

impl CacheError {
    /// Whether a caller may treat this failure as a cache miss.
    ///
    /// Only storage unavailability qualifies; everything else is either a
    /// caller bug or a configuration problem.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CacheError::BackendUnavailable { .. })
    }

    /// Shorthand used by the storage backends when mapping driver errors.
    pub fn unavailable(backend: &str, reason: impl std::fmt::Display) -> Self {
        CacheError::BackendUnavailable {
            backend: backend.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Configuration pipeline errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Could not parse configuration file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Could not read configuration file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Configuration type \"{name}\" is not registered")]
    InvalidConfigurationType { name: String },

    #[error("Invalid application context \"{context}\": {reason}")]
    InvalidContext { context: String, reason: String },

    #[error("Configuration source {name} failed: {reason}")]
    Source { name: String, reason: String },
}

/// Master error type for all STRATA errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrataError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Telemetry initialization failed: {reason}")]
    Telemetry { reason: String },
}

/// Result type alias for STRATA operations.
pub type StrataResult<T> = Result<T, StrataError>;

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_display_invalid_identifier() {
        let err = CacheError::InvalidIdentifier {
            identifier: "no spaces".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Invalid entry identifier"));
        assert!(msg.contains("no spaces"));
    }

    #[test]
    fn test_cache_error_display_path_too_long() {
        let err = CacheError::PathTooLong {
            path: "/tmp/deep".to_string(),
            maximum: 12,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("/tmp/deep"));
        assert!(msg.contains("12"));
    }

    #[test]
    fn test_cache_error_display_backend_unavailable() {
        let err = CacheError::unavailable("RedisBackend", "connection refused");
        let msg = format!("{}", err);
        assert!(msg.contains("RedisBackend"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_only_backend_unavailable_is_recoverable() {
        assert!(CacheError::unavailable("FileBackend", "disk full").is_recoverable());
        assert!(!CacheError::CorruptEntry {
            identifier: "a".to_string(),
            reason: "eof".to_string(),
        }
        .is_recoverable());
        assert!(!CacheError::InvalidTag {
            tag: "%".to_string()
        }
        .is_recoverable());
        assert!(!CacheError::CacheNotAssigned {
            backend: "PdoBackend".to_string()
        }
        .is_recoverable());
    }

    #[test]
    fn test_config_error_display_parse() {
        let err = ConfigError::Parse {
            path: "Configuration/Settings.yaml".to_string(),
            reason: "did not find expected key".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Settings.yaml"));
        assert!(msg.contains("did not find expected key"));
    }

    #[test]
    fn test_config_error_display_invalid_type() {
        let err = ConfigError::InvalidConfigurationType {
            name: "Routes".to_string(),
        };
        assert!(format!("{}", err).contains("Routes"));
    }

    #[test]
    fn test_strata_error_from_variants() {
        let cache = StrataError::from(CacheError::InvalidBackend {
            kind: "MemcachedBackend".to_string(),
        });
        assert!(matches!(cache, StrataError::Cache(_)));

        let config = StrataError::from(ConfigError::Source {
            name: "Policy".to_string(),
            reason: "boom".to_string(),
        });
        assert!(matches!(config, StrataError::Config(_)));
    }
}
