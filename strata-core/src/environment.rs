//! Deployment environment shared by every cache backend.
//!
//! Everything a backend needs to know about where it runs lives here, passed
//! in explicitly: there is no process-global root path or path limit.
//!
//! # Environment Variables
//!
//! - `STRATA_APPLICATION_IDENTIFIER` (default `strata`)
//! - `STRATA_CONTEXT` (default `Development`)
//! - `STRATA_PATH_TEMPORARY_BASE` (default `<system temp>/strata`)
//! - `STRATA_MAX_PATH_LENGTH` (default 1024)

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::context::ApplicationContext;
use crate::error::ConfigResult;

/// Default application identifier when none is configured.
pub const DEFAULT_APPLICATION_IDENTIFIER: &str = "strata";

/// Default upper bound for generated file paths.
pub const DEFAULT_MAXIMUM_PATH_LENGTH: usize = 1024;

/// Immutable description of one installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentConfiguration {
    application_identifier: String,
    application_context: ApplicationContext,
    file_cache_base_path: PathBuf,
    maximum_path_length: usize,
}

impl EnvironmentConfiguration {
    pub fn new(
        application_identifier: impl Into<String>,
        application_context: ApplicationContext,
        file_cache_base_path: impl Into<PathBuf>,
        maximum_path_length: usize,
    ) -> Self {
        Self {
            application_identifier: application_identifier.into(),
            application_context,
            file_cache_base_path: file_cache_base_path.into(),
            maximum_path_length,
        }
    }

    /// Build from `STRATA_*` environment variables, falling back to defaults.
    ///
    /// Fails only when `STRATA_CONTEXT` is set to an invalid context.
    pub fn from_env() -> ConfigResult<Self> {
        let application_identifier = std::env::var("STRATA_APPLICATION_IDENTIFIER")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_APPLICATION_IDENTIFIER.to_string());

        let application_context = match std::env::var("STRATA_CONTEXT") {
            Ok(value) if !value.is_empty() => ApplicationContext::new(&value)?,
            _ => ApplicationContext::default(),
        };

        let file_cache_base_path = std::env::var("STRATA_PATH_TEMPORARY_BASE")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("strata"));

        let maximum_path_length = std::env::var("STRATA_MAX_PATH_LENGTH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAXIMUM_PATH_LENGTH);

        Ok(Self {
            application_identifier,
            application_context,
            file_cache_base_path,
            maximum_path_length,
        })
    }

    pub fn with_application_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.application_identifier = identifier.into();
        self
    }

    pub fn with_application_context(mut self, context: ApplicationContext) -> Self {
        self.application_context = context;
        self
    }

    pub fn with_file_cache_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_cache_base_path = path.into();
        self
    }

    pub fn with_maximum_path_length(mut self, length: usize) -> Self {
        self.maximum_path_length = length;
        self
    }

    pub fn application_identifier(&self) -> &str {
        &self.application_identifier
    }

    pub fn application_context(&self) -> &ApplicationContext {
        &self.application_context
    }

    pub fn file_cache_base_path(&self) -> &Path {
        &self.file_cache_base_path
    }

    pub fn maximum_path_length(&self) -> usize {
        self.maximum_path_length
    }

    /// Full SHA-256 digest of `application_identifier:context`.
    pub fn namespace_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.application_identifier.as_bytes());
        hasher.update(b":");
        hasher.update(self.application_context.as_str().as_bytes());
        let result = hasher.finalize();
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&result);
        digest
    }

    /// Short namespace token separating installations and contexts that
    /// share one storage location.
    ///
    /// First 16 hex characters of [`Self::namespace_digest`].
    pub fn storage_namespace(&self) -> String {
        hex::encode(&self.namespace_digest()[..8])
    }
}

impl Default for EnvironmentConfiguration {
    fn default() -> Self {
        Self::new(
            DEFAULT_APPLICATION_IDENTIFIER,
            ApplicationContext::default(),
            std::env::temp_dir().join("strata"),
            DEFAULT_MAXIMUM_PATH_LENGTH,
        )
    }
}
