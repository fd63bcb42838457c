//! Namespaced byte keys for the LMDB backend.
//!
//! A `NamespacedKey` can only be built from a [`KeyNamespace`], which in turn
//! can only be derived from an environment plus a cache identifier. There is
//! no way to address another installation's or another cache's entries by
//! accident.

use sha2::{Digest, Sha256};
use strata_core::EnvironmentConfiguration;

/// Separator between the namespace digest and the rest of the key.
const SEPARATOR: u8 = 0xFF;

/// Separator between tag and identifier in tag link keys. Neither may
/// contain a NUL byte.
const TAG_SEPARATOR: u8 = 0x00;

/// Kind byte following the separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// `identifier` -> entry record
    Entry,
    /// `tag \0 identifier` -> empty, one per tag and entry
    TagLink,
}

impl KeyKind {
    fn to_byte(self) -> u8 {
        match self {
            KeyKind::Entry => 1,
            KeyKind::TagLink => 2,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(KeyKind::Entry),
            2 => Some(KeyKind::TagLink),
            _ => None,
        }
    }
}

/// First 16 bytes of SHA-256(`storage_namespace:cache_identifier`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyNamespace([u8; 16]);

impl KeyNamespace {
    pub fn new(environment: &EnvironmentConfiguration, cache_identifier: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(environment.storage_namespace().as_bytes());
        hasher.update(b":");
        hasher.update(cache_identifier.as_bytes());
        let result = hasher.finalize();
        let mut digest = [0u8; 16];
        digest.copy_from_slice(&result[..16]);
        Self(digest)
    }

    /// Prefix shared by every key of this namespace.
    ///
    /// Format: [digest: 16 bytes][separator: 1 byte]
    pub fn prefix(&self) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(17);
        prefix.extend_from_slice(&self.0);
        prefix.push(SEPARATOR);
        prefix
    }

    /// Prefix of all entry keys.
    pub fn entry_prefix(&self) -> Vec<u8> {
        let mut prefix = self.prefix();
        prefix.push(KeyKind::Entry.to_byte());
        prefix
    }

    /// Prefix of all link keys for one tag.
    pub fn tag_prefix(&self, tag: &str) -> Vec<u8> {
        let mut prefix = self.prefix();
        prefix.push(KeyKind::TagLink.to_byte());
        prefix.extend_from_slice(tag.as_bytes());
        prefix.push(TAG_SEPARATOR);
        prefix
    }

    pub fn entry(&self, identifier: &str) -> NamespacedKey {
        NamespacedKey {
            namespace: *self,
            kind: KeyKind::Entry,
            tag: None,
            identifier: identifier.to_string(),
        }
    }

    pub fn tag_link(&self, tag: &str, identifier: &str) -> NamespacedKey {
        NamespacedKey {
            namespace: *self,
            kind: KeyKind::TagLink,
            tag: Some(tag.to_string()),
            identifier: identifier.to_string(),
        }
    }
}

/// A decoded or to-be-encoded LMDB key.
///
/// # Binary Format
///
/// - Bytes 0-15: namespace digest
/// - Byte 16: separator (0xFF)
/// - Byte 17: kind
/// - Entry: identifier bytes
/// - TagLink: tag bytes, 0x00, identifier bytes
///
/// Keys sort by namespace first, then kind, then tag, so flushing a cache
/// or resolving a tag is a single prefix scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespacedKey {
    namespace: KeyNamespace,
    kind: KeyKind,
    tag: Option<String>,
    identifier: String,
}

impl NamespacedKey {
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn encode(&self) -> Vec<u8> {
        match &self.tag {
            Some(tag) => {
                let mut bytes = self.namespace.tag_prefix(tag);
                bytes.extend_from_slice(self.identifier.as_bytes());
                bytes
            }
            None => {
                let mut bytes = self.namespace.entry_prefix();
                bytes.extend_from_slice(self.identifier.as_bytes());
                bytes
            }
        }
    }

    /// Decode a key from bytes.
    ///
    /// Returns `None` if the separator or kind byte is wrong, the rest is
    /// not UTF-8, or a tag link lacks its inner separator.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 18 || bytes[16] != SEPARATOR {
            return None;
        }
        let mut digest = [0u8; 16];
        digest.copy_from_slice(&bytes[0..16]);
        let namespace = KeyNamespace(digest);
        let kind = KeyKind::from_byte(bytes[17])?;
        let rest = &bytes[18..];

        match kind {
            KeyKind::Entry => Some(Self {
                namespace,
                kind,
                tag: None,
                identifier: String::from_utf8(rest.to_vec()).ok()?,
            }),
            KeyKind::TagLink => {
                let split = rest.iter().position(|b| *b == TAG_SEPARATOR)?;
                Some(Self {
                    namespace,
                    kind,
                    tag: Some(String::from_utf8(rest[..split].to_vec()).ok()?),
                    identifier: String::from_utf8(rest[split + 1..].to_vec()).ok()?,
                })
            }
        }
    }
}
