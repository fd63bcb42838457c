//! STRATA Test Utilities
//!
//! Shared test infrastructure for the STRATA workspace:
//! - Proptest generators for identifiers, tags, payloads and YAML values
//! - A call-recording mock backend
//! - On-disk configuration tree fixtures
//! - Custom assertions for cache and configuration errors

pub use strata_cache::{Backend, BackendOptions, CacheHandle, TransientMemoryBackend};
pub use strata_core::{
    CacheError, CacheResult, ConfigError, ConfigResult, EnvironmentConfiguration, StrataError,
};

use std::sync::{Arc, Mutex, Weak};

// ============================================================================
// RECORDING BACKEND
// ============================================================================

/// One call observed by [`RecordingBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    SetCache(String),
    Set {
        identifier: String,
        tags: Vec<String>,
        lifetime: Option<u64>,
    },
    Get(String),
    Has(String),
    Remove(String),
    Flush,
    FlushByTag(String),
    FindIdentifiersByTag(String),
    CollectGarbage,
}

/// Shared view of the calls a [`RecordingBackend`] received.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<BackendCall>>>);

impl CallLog {
    fn push(&self, call: BackendCall) {
        if let Ok(mut calls) = self.0.lock() {
            calls.push(call);
        }
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.0.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.calls().is_empty()
    }

    pub fn clear(&self) {
        if let Ok(mut calls) = self.0.lock() {
            calls.clear();
        }
    }
}

/// In-memory backend that records every call before delegating.
///
/// The [`CallLog`] stays with the test while the backend moves into a
/// frontend, so tests can assert on what reached storage.
pub struct RecordingBackend {
    inner: TransientMemoryBackend,
    log: CallLog,
}

impl RecordingBackend {
    pub fn new() -> (Self, CallLog) {
        let log = CallLog::default();
        let inner = TransientMemoryBackend::new(
            Arc::new(EnvironmentConfiguration::default()),
            &BackendOptions::default(),
        )
        .expect("memory backend accepts default options");
        (
            Self {
                inner,
                log: log.clone(),
            },
            log,
        )
    }
}

impl Backend for RecordingBackend {
    fn name(&self) -> &'static str {
        "RecordingBackend"
    }

    fn set_cache(&self, cache: Weak<dyn CacheHandle>) -> CacheResult<()> {
        if let Some(handle) = cache.upgrade() {
            self.log.push(BackendCall::SetCache(handle.identifier().to_string()));
        }
        self.inner.set_cache(cache)
    }

    fn set(
        &self,
        identifier: &str,
        data: &[u8],
        tags: &[&str],
        lifetime: Option<u64>,
    ) -> CacheResult<()> {
        self.log.push(BackendCall::Set {
            identifier: identifier.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            lifetime,
        });
        self.inner.set(identifier, data, tags, lifetime)
    }

    fn get(&self, identifier: &str) -> CacheResult<Option<Vec<u8>>> {
        self.log.push(BackendCall::Get(identifier.to_string()));
        self.inner.get(identifier)
    }

    fn has(&self, identifier: &str) -> CacheResult<bool> {
        self.log.push(BackendCall::Has(identifier.to_string()));
        self.inner.has(identifier)
    }

    fn remove(&self, identifier: &str) -> CacheResult<bool> {
        self.log.push(BackendCall::Remove(identifier.to_string()));
        self.inner.remove(identifier)
    }

    fn flush(&self) -> CacheResult<()> {
        self.log.push(BackendCall::Flush);
        self.inner.flush()
    }

    fn flush_by_tag(&self, tag: &str) -> CacheResult<u64> {
        self.log.push(BackendCall::FlushByTag(tag.to_string()));
        self.inner.flush_by_tag(tag)
    }

    fn find_identifiers_by_tag(&self, tag: &str) -> CacheResult<Vec<String>> {
        self.log.push(BackendCall::FindIdentifiersByTag(tag.to_string()));
        self.inner.find_identifiers_by_tag(tag)
    }

    fn collect_garbage(&self) -> CacheResult<()> {
        self.log.push(BackendCall::CollectGarbage);
        self.inner.collect_garbage()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache keys and configuration trees.

    use proptest::prelude::*;
    use serde_yaml::{Mapping, Value};

    /// Identifiers matching `^[A-Za-z0-9_.]{1,64}$`.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_.]{1,64}"
    }

    /// Tags share the identifier pattern.
    pub fn arb_tag() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_]{1,16}"
    }

    pub fn arb_tags() -> impl Strategy<Value = Vec<String>> {
        prop::collection::btree_set(arb_tag(), 0..4).prop_map(|tags| tags.into_iter().collect())
    }

    /// Strings that fail the identifier pattern: empty, too long, or with a
    /// forbidden character.
    pub fn arb_invalid_identifier() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            "[a-z]{65,80}",
            ("[a-z]{0,10}", "[ /:\\-\u{e4}\t]", "[a-z]{0,10}")
                .prop_map(|(head, bad, tail)| format!("{head}{bad}{tail}")),
        ]
    }

    pub fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), 0..512)
    }

    /// Scalar YAML values.
    pub fn arb_yaml_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| Value::Number(n.into())),
            "[a-z ]{0,12}".prop_map(Value::String),
        ]
    }

    /// Nested YAML mappings with string keys, up to three levels deep.
    pub fn arb_yaml_mapping() -> impl Strategy<Value = Value> {
        let leaf = arb_yaml_scalar();
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..3).prop_map(Value::Sequence),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(|entries| {
                    Value::Mapping(
                        entries
                            .into_iter()
                            .map(|(k, v)| (Value::String(k), v))
                            .collect::<Mapping>(),
                    )
                }),
            ]
        })
        .prop_map(|value| match value {
            Value::Mapping(_) => value,
            other => {
                let mut mapping = Mapping::new();
                mapping.insert(Value::String("value".to_string()), other);
                Value::Mapping(mapping)
            }
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! On-disk configuration trees.

    use std::fs;
    use std::path::{Path, PathBuf};

    use tempfile::TempDir;

    /// A throwaway installation: root configuration plus package directories.
    ///
    /// ```text
    /// <root>/Configuration/<Type>.yaml
    /// <root>/Configuration/<Context>/<Type>.yaml
    /// <root>/Packages/<Package>/Configuration/...
    /// ```
    pub struct ConfigTree {
        root: TempDir,
        packages: Vec<(String, PathBuf)>,
    }

    impl ConfigTree {
        pub fn new() -> Self {
            Self {
                root: TempDir::new().expect("TempDir creation should succeed"),
                packages: Vec::new(),
            }
        }

        pub fn root(&self) -> &Path {
            self.root.path()
        }

        /// Directory for temporary data, inside the tree.
        pub fn temporary_directory(&self) -> PathBuf {
            self.root.path().join("Data").join("Temporary")
        }

        /// Packages in registration order.
        pub fn packages(&self) -> &[(String, PathBuf)] {
            &self.packages
        }

        /// Register a package directory; registration order is merge order.
        pub fn package(&mut self, key: &str) -> PathBuf {
            let path = self.root.path().join("Packages").join(key);
            fs::create_dir_all(path.join("Configuration")).expect("package dir should be created");
            self.packages.push((key.to_string(), path.clone()));
            path
        }

        /// Write `<root>/Configuration/[<context>/]<file_name>`.
        pub fn write_root(&self, context: Option<&str>, file_name: &str, yaml: &str) -> PathBuf {
            write_config(self.root.path(), context, file_name, yaml)
        }

        /// Write `<package>/Configuration/[<context>/]<file_name>`.
        pub fn write_package(
            &self,
            key: &str,
            context: Option<&str>,
            file_name: &str,
            yaml: &str,
        ) -> PathBuf {
            let package = self
                .packages
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, path)| path.clone())
                .expect("package should be registered first");
            write_config(&package, context, file_name, yaml)
        }
    }

    impl Default for ConfigTree {
        fn default() -> Self {
            Self::new()
        }
    }

    fn write_config(base: &Path, context: Option<&str>, file_name: &str, yaml: &str) -> PathBuf {
        let mut directory = base.join("Configuration");
        if let Some(context) = context {
            directory = directory.join(context);
        }
        fs::create_dir_all(&directory).expect("configuration dir should be created");
        let path = directory.join(file_name);
        fs::write(&path, yaml).expect("configuration file should be written");
        path
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on STRATA error variants.

    use super::*;

    #[track_caller]
    pub fn assert_invalid_identifier<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::InvalidIdentifier { .. }) | Err(CacheError::InvalidTag { .. }) => {}
            other => panic!("Expected InvalidIdentifier, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_unavailable<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::BackendUnavailable { .. }) => {}
            other => panic!("Expected BackendUnavailable, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_parse_error<T: std::fmt::Debug>(result: &ConfigResult<T>) {
        match result {
            Err(ConfigError::Parse { .. }) => {}
            other => panic!("Expected Parse error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_recording_backend_logs_calls() {
        let (backend, log) = RecordingBackend::new();
        backend.set("a", b"1", &["t"], Some(5)).expect("set should succeed");
        backend.get("a").expect("get should succeed");
        backend.flush_by_tag("t").expect("flush should succeed");

        assert_eq!(
            log.calls(),
            vec![
                BackendCall::Set {
                    identifier: "a".to_string(),
                    tags: vec!["t".to_string()],
                    lifetime: Some(5),
                },
                BackendCall::Get("a".to_string()),
                BackendCall::FlushByTag("t".to_string()),
            ]
        );
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_config_tree_layout() {
        let mut tree = fixtures::ConfigTree::new();
        tree.package("Acme.Base");
        let file = tree.write_package("Acme.Base", Some("Production"), "Settings.yaml", "a: 1\n");
        assert!(file.ends_with("Packages/Acme.Base/Configuration/Production/Settings.yaml"));
        let root = tree.write_root(None, "Settings.yaml", "b: 2\n");
        assert!(root.starts_with(tree.root()));
        assert_eq!(tree.packages().len(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_identifiers_are_valid(id in generators::arb_identifier()) {
            prop_assert!(strata_core::is_valid_entry_identifier(&id));
        }

        #[test]
        fn prop_generated_invalid_identifiers_are_invalid(id in generators::arb_invalid_identifier()) {
            prop_assert!(!strata_core::is_valid_entry_identifier(&id));
        }

        #[test]
        fn prop_generated_tags_are_valid(tags in generators::arb_tags()) {
            prop_assert!(strata_core::validate_tags(&tags).is_ok());
        }

        #[test]
        fn prop_generated_yaml_is_mapping(value in generators::arb_yaml_mapping()) {
            prop_assert!(value.is_mapping());
        }
    }
}
