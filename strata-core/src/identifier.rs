//! Entry identifier and tag validation.
//!
//! Identifiers and tags share one pattern, `^[A-Za-z0-9_.]{1,64}$`. The
//! check runs before any storage is touched, so backends can assume every
//! key they see is well formed.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CacheError, CacheResult};

/// Pattern every entry identifier and tag must match.
pub const IDENTIFIER_PATTERN: &str = r"^[A-Za-z0-9_.]{1,64}$";

/// Longest identifier or tag accepted.
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Pattern for the identifier of a cache itself, e.g. `Flow_Mvc_Routing_Route`.
pub const CACHE_IDENTIFIER_PATTERN: &str = r"^[A-Za-z0-9_%\-&]{1,250}$";

static IDENTIFIER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(IDENTIFIER_PATTERN).expect("Invalid identifier regex"));

static CACHE_IDENTIFIER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(CACHE_IDENTIFIER_PATTERN).expect("Invalid cache identifier regex"));

/// Check an identifier or tag against [`IDENTIFIER_PATTERN`].
pub fn is_valid_entry_identifier(identifier: &str) -> bool {
    IDENTIFIER_REGEX.is_match(identifier)
}

/// Same pattern, tag flavour.
pub fn is_valid_tag(tag: &str) -> bool {
    IDENTIFIER_REGEX.is_match(tag)
}

/// Fail with [`CacheError::InvalidIdentifier`] unless `identifier` is valid.
pub fn validate_identifier(identifier: &str) -> CacheResult<()> {
    if is_valid_entry_identifier(identifier) {
        Ok(())
    } else {
        Err(CacheError::InvalidIdentifier {
            identifier: identifier.to_string(),
        })
    }
}

pub fn is_valid_cache_identifier(identifier: &str) -> bool {
    CACHE_IDENTIFIER_REGEX.is_match(identifier)
}

/// Fail with [`CacheError::InvalidIdentifier`] unless `identifier` names a cache.
pub fn validate_cache_identifier(identifier: &str) -> CacheResult<()> {
    if is_valid_cache_identifier(identifier) {
        Ok(())
    } else {
        Err(CacheError::InvalidIdentifier {
            identifier: identifier.to_string(),
        })
    }
}

/// Fail with [`CacheError::InvalidTag`] on the first invalid tag.
pub fn validate_tags<S: AsRef<str>>(tags: &[S]) -> CacheResult<()> {
    for tag in tags {
        let tag = tag.as_ref();
        if !is_valid_tag(tag) {
            return Err(CacheError::InvalidTag {
                tag: tag.to_string(),
            });
        }
    }
    Ok(())
}
