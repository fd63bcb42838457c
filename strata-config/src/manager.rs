//! Registry of configuration types and their processed results.
//!
//! Each type is processed on first access and kept. Results are stored
//! twice: as merged by the source, and with `%env:...%` placeholders
//! resolved. Only the merged form goes to the on-disk cache, so environment
//! variables are read again whenever the cache is loaded.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_yaml::Value;
use strata_core::{ApplicationContext, ConfigError, ConfigResult};

use crate::merge::value_by_path;
use crate::placeholder::{has_placeholders, substitute_env};
use crate::source::{
    ConfigurationSource, MergeConfigurationSource, ObjectsConfigurationSource, Package,
    PolicyConfigurationSource, SettingsConfigurationSource,
};

pub const CONFIGURATION_TYPE_CACHES: &str = "Caches";
pub const CONFIGURATION_TYPE_OBJECTS: &str = "Objects";
pub const CONFIGURATION_TYPE_POLICY: &str = "Policy";
pub const CONFIGURATION_TYPE_SETTINGS: &str = "Settings";

/// Directory below the temporary directory holding the cache file.
const CACHE_DIRECTORY: &str = "Configuration";

#[derive(Default)]
struct ProcessedConfigurations {
    merged: BTreeMap<String, Value>,
    resolved: BTreeMap<String, Value>,
    needs_save: bool,
}

pub struct ConfigurationManager {
    context: ApplicationContext,
    packages: Vec<Package>,
    sources: BTreeMap<String, Arc<dyn ConfigurationSource>>,
    temporary_directory: Option<PathBuf>,
    state: RwLock<ProcessedConfigurations>,
}

impl ConfigurationManager {
    pub fn new(context: ApplicationContext) -> Self {
        Self {
            context,
            packages: Vec::new(),
            sources: BTreeMap::new(),
            temporary_directory: None,
            state: RwLock::new(ProcessedConfigurations::default()),
        }
    }

    /// Register the built-in types, all reading below `root`: `Caches` as a
    /// plain merge, `Objects` per package, `Settings` with package keys and
    /// the running context, `Policy` with privilege concatenation.
    pub fn with_default_types(
        mut self,
        root: impl Into<PathBuf>,
        temporary_directory: impl Into<PathBuf>,
    ) -> Self {
        let root = root.into();
        let temporary_directory = temporary_directory.into();
        self.register_source(MergeConfigurationSource::new(CONFIGURATION_TYPE_CACHES, root.clone()));
        self.register_source(ObjectsConfigurationSource::new(root.clone()));
        self.register_source(SettingsConfigurationSource::new(root.clone()));
        self.register_source(
            PolicyConfigurationSource::new(root).with_temporary_directory(temporary_directory),
        );
        self
    }

    /// Use `temporary_directory` for the on-disk cache and load it if a
    /// cache file for this context exists.
    pub fn with_cache_directory(mut self, temporary_directory: impl Into<PathBuf>) -> ConfigResult<Self> {
        self.temporary_directory = Some(temporary_directory.into());
        self.load_configuration_cache()?;
        Ok(self)
    }

    pub fn with_packages(mut self, packages: Vec<Package>) -> Self {
        self.set_packages(packages);
        self
    }

    pub fn context(&self) -> &ApplicationContext {
        &self.context
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    /// Replace the package list; every processed type is discarded.
    pub fn set_packages(&mut self, packages: Vec<Package>) {
        self.packages = packages;
        if let Ok(mut state) = self.state.write() {
            *state = ProcessedConfigurations::default();
        }
    }

    /// Register a source under its name, replacing and invalidating any
    /// earlier source of that type.
    pub fn register_source(&mut self, source: impl ConfigurationSource + 'static) {
        let name = source.name().to_string();
        if let Ok(mut state) = self.state.write() {
            state.merged.remove(&name);
            state.resolved.remove(&name);
        }
        tracing::debug!(configuration_type = %name, "Configuration source registered");
        self.sources.insert(name, Arc::new(source));
    }

    /// Registered type names, sorted.
    pub fn configuration_types(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    /// The processed configuration of `configuration_type`, or the value at
    /// the dotted `path` inside it. A path that leads nowhere is `None`.
    pub fn get_configuration(
        &self,
        configuration_type: &str,
        path: Option<&str>,
    ) -> ConfigResult<Option<Value>> {
        let configuration = self.processed(configuration_type)?;
        Ok(match path {
            None => Some(configuration),
            Some(path) => value_by_path(&configuration, path).cloned(),
        })
    }

    /// Like [`Self::get_configuration`], converted to JSON for consumers
    /// such as the cache manager.
    pub fn get_configuration_json(
        &self,
        configuration_type: &str,
        path: Option<&str>,
    ) -> ConfigResult<Option<serde_json::Value>> {
        self.get_configuration(configuration_type, path)?
            .map(|value| {
                serde_json::to_value(&value).map_err(|e| ConfigError::Source {
                    name: configuration_type.to_string(),
                    reason: format!("not representable as JSON: {e}"),
                })
            })
            .transpose()
    }

    /// Process every registered type.
    pub fn warmup(&self) -> ConfigResult<()> {
        for name in self.sources.keys() {
            self.processed(name)?;
        }
        tracing::info!(
            context = %self.context,
            types = self.sources.len(),
            "Configuration warmed up"
        );
        Ok(())
    }

    /// Forget every processed type and delete the cache file.
    pub fn flush_configuration_cache(&self) -> ConfigResult<()> {
        *write(&self.state)? = ProcessedConfigurations::default();
        let Some(path) = self.configuration_cache_path() else {
            return Ok(());
        };
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Configuration cache flushed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    /// Process every type and write the merged results to the cache file.
    ///
    /// Does nothing without a temporary directory.
    pub fn save_configuration_cache(&self) -> ConfigResult<()> {
        for name in self.sources.keys() {
            self.merged(name)?;
        }
        let Some(path) = self.configuration_cache_path() else {
            return Ok(());
        };

        let mut state = write(&self.state)?;
        let document = serde_yaml::to_string(&state.merged).map_err(|e| ConfigError::Source {
            name: "ConfigurationManager".to_string(),
            reason: format!("could not serialize configuration cache: {e}"),
        })?;
        write_atomically(&path, &document)?;
        state.needs_save = false;
        tracing::info!(
            path = %path.display(),
            types = state.merged.len(),
            "Configuration cache saved"
        );
        Ok(())
    }

    /// Save the cache if anything was processed since the last save.
    pub fn shutdown(&self) -> ConfigResult<()> {
        if read(&self.state)?.needs_save {
            self.save_configuration_cache()?;
        }
        Ok(())
    }

    /// Flush, then reprocess and save every type.
    pub fn refresh_configuration(&self) -> ConfigResult<()> {
        self.flush_configuration_cache()?;
        self.save_configuration_cache()
    }

    /// `<temporary>/Configuration/<Context_Name>Configurations.yaml`.
    pub fn configuration_cache_path(&self) -> Option<PathBuf> {
        self.temporary_directory.as_ref().map(|directory| {
            directory.join(CACHE_DIRECTORY).join(format!(
                "{}Configurations.yaml",
                self.context.to_path_segment()
            ))
        })
    }

    fn source(&self, configuration_type: &str) -> ConfigResult<&Arc<dyn ConfigurationSource>> {
        self.sources
            .get(configuration_type)
            .ok_or_else(|| ConfigError::InvalidConfigurationType {
                name: configuration_type.to_string(),
            })
    }

    fn merged(&self, configuration_type: &str) -> ConfigResult<Value> {
        let source = self.source(configuration_type)?;
        if let Some(merged) = read(&self.state)?.merged.get(configuration_type) {
            return Ok(merged.clone());
        }

        let merged = source.process(&self.packages, &self.context)?;
        tracing::info!(
            configuration_type,
            context = %self.context,
            "Configuration processed"
        );
        let mut state = write(&self.state)?;
        state.needs_save = true;
        Ok(state
            .merged
            .entry(configuration_type.to_string())
            .or_insert(merged)
            .clone())
    }

    fn processed(&self, configuration_type: &str) -> ConfigResult<Value> {
        self.source(configuration_type)?;
        if let Some(resolved) = read(&self.state)?.resolved.get(configuration_type) {
            return Ok(resolved.clone());
        }
        let merged = self.merged(configuration_type)?;
        let resolved = if has_placeholders(&merged) {
            tracing::debug!(configuration_type, "Resolving environment placeholders");
            substitute_env(merged)
        } else {
            merged
        };
        Ok(write(&self.state)?
            .resolved
            .entry(configuration_type.to_string())
            .or_insert(resolved)
            .clone())
    }

    fn load_configuration_cache(&self) -> ConfigResult<()> {
        let Some(path) = self.configuration_cache_path() else {
            return Ok(());
        };
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_error(&path, e)),
        };
        let merged: BTreeMap<String, Value> = match serde_yaml::from_str(&content) {
            Ok(merged) => merged,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable configuration cache"
                );
                return Ok(());
            }
        };
        tracing::debug!(path = %path.display(), types = merged.len(), "Configuration cache loaded");
        let mut state = write(&self.state)?;
        state.merged = merged;
        state.resolved.clear();
        Ok(())
    }
}

impl std::fmt::Debug for ConfigurationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationManager")
            .field("context", &self.context)
            .field("packages", &self.packages)
            .field("types", &self.configuration_types())
            .field("temporary_directory", &self.temporary_directory)
            .finish()
    }
}

fn write_atomically(path: &Path, content: &str) -> ConfigResult<()> {
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(directory).map_err(|e| io_error(directory, e))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("Configurations.yaml");
    let temporary = directory.join(format!(".{file_name}.{}.tmp", std::process::id()));
    let written = fs::write(&temporary, content).and_then(|_| fs::rename(&temporary, path));
    if let Err(e) = written {
        let _ = fs::remove_file(&temporary);
        return Err(io_error(path, e));
    }
    Ok(())
}

fn io_error(path: &Path, error: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.display().to_string(),
        reason: error.to_string(),
    }
}

fn poisoned() -> ConfigError {
    ConfigError::Source {
        name: "ConfigurationManager".to_string(),
        reason: "configuration state lock poisoned".to_string(),
    }
}

fn read<T>(lock: &RwLock<T>) -> ConfigResult<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| poisoned())
}

fn write<T>(lock: &RwLock<T>) -> ConfigResult<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| poisoned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ClosureConfigurationSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strata_test_utils::fixtures::ConfigTree;

    fn yaml(source: &str) -> Value {
        serde_yaml::from_str(source).expect("fixture should parse")
    }

    fn counting_source(name: &str, calls: Arc<AtomicUsize>, value: &str) -> ClosureConfigurationSource {
        let value = yaml(value);
        ClosureConfigurationSource::new(name, move |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value.clone())
        })
    }

    #[test]
    fn test_unregistered_type() {
        let manager = ConfigurationManager::new(ApplicationContext::development());
        assert!(matches!(
            manager.get_configuration("Views", None),
            Err(ConfigError::InvalidConfigurationType { name }) if name == "Views"
        ));
    }

    #[test]
    fn test_processed_once_and_path_lookup() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut manager = ConfigurationManager::new(ApplicationContext::development());
        manager.register_source(counting_source(
            "Settings",
            calls.clone(),
            "{Neos: {Flow: {core: {context: Development}}}}",
        ));

        let context = manager
            .get_configuration("Settings", Some("Neos.Flow.core.context"))
            .expect("get should succeed");
        assert_eq!(context, Some(Value::from("Development")));
        assert_eq!(
            manager
                .get_configuration("Settings", Some("Neos.Flow.missing"))
                .expect("get should succeed"),
            None
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_source_replaces_and_invalidates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut manager = ConfigurationManager::new(ApplicationContext::development());
        manager.register_source(counting_source("Settings", calls.clone(), "{version: 1}"));
        manager.get_configuration("Settings", None).expect("get should succeed");

        manager.register_source(counting_source("Settings", calls.clone(), "{version: 2}"));
        let value = manager
            .get_configuration("Settings", Some("version"))
            .expect("get should succeed");
        assert_eq!(value, Some(Value::from(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.configuration_types(), vec!["Settings"]);
    }

    #[test]
    fn test_env_placeholders_resolved_on_read() {
        std::env::set_var("STRATA_TEST_CONFIG_HOST", "cache.internal");
        let mut manager = ConfigurationManager::new(ApplicationContext::development());
        manager.register_source(ClosureConfigurationSource::new("Caches", |_, _| {
            Ok(yaml("{Flow_Session: {backendOptions: {hostname: '%env:STRATA_TEST_CONFIG_HOST%', password: '%env:STRATA_TEST_CONFIG_UNSET%'}}}"))
        }));

        let options = manager
            .get_configuration("Caches", Some("Flow_Session.backendOptions"))
            .expect("get should succeed");
        assert_eq!(options, Some(yaml("{hostname: cache.internal, password: ~}")));
    }

    #[test]
    fn test_values_without_placeholders_untouched() {
        let mut manager = ConfigurationManager::new(ApplicationContext::development());
        manager.register_source(ClosureConfigurationSource::new("Settings", |_, _| {
            Ok(yaml("{discount: '100%', label: 'env:HOME', nested: [a, {b: ~}]}"))
        }));
        assert_eq!(
            manager.get_configuration("Settings", None).expect("get should succeed"),
            Some(yaml("{discount: '100%', label: 'env:HOME', nested: [a, {b: ~}]}"))
        );
    }

    #[test]
    fn test_json_conversion() {
        let mut manager = ConfigurationManager::new(ApplicationContext::development());
        manager.register_source(ClosureConfigurationSource::new("Caches", |_, _| {
            Ok(yaml("{Default: {backend: FileBackend, backendOptions: {defaultLifetime: 0}}}"))
        }));
        let caches = manager
            .get_configuration_json("Caches", None)
            .expect("get should succeed");
        assert_eq!(
            caches,
            Some(serde_json::json!({"Default": {"backend": "FileBackend", "backendOptions": {"defaultLifetime": 0}}}))
        );
    }

    #[test]
    fn test_default_types() {
        let tree = ConfigTree::new();
        let manager = ConfigurationManager::new(ApplicationContext::production())
            .with_default_types(tree.root(), tree.temporary_directory());
        assert_eq!(
            manager.configuration_types(),
            vec!["Caches", "Objects", "Policy", "Settings"]
        );
        manager.warmup().expect("warmup should succeed");
        assert_eq!(
            manager.get_configuration("Settings", None).expect("get should succeed"),
            Some(Value::Mapping(Default::default()))
        );
    }

    #[test]
    fn test_default_settings_carry_running_context() {
        let mut tree = ConfigTree::new();
        let flow = tree.package("Neos.Flow");
        let context = ApplicationContext::new("Production/Staging").expect("valid context");
        let manager = ConfigurationManager::new(context)
            .with_default_types(tree.root(), tree.temporary_directory())
            .with_packages(vec![Package::new("Neos.Flow", flow)]);

        assert_eq!(
            manager
                .get_configuration("Settings", Some("Neos.Flow.core.context"))
                .expect("get should succeed"),
            Some(Value::from("Production/Staging"))
        );
        assert_eq!(
            manager
                .get_configuration("Objects", None)
                .expect("get should succeed"),
            Some(yaml("{Neos.Flow: {}}"))
        );
    }

    #[test]
    fn test_cache_file_round_trip() {
        let tree = ConfigTree::new();
        tree.write_root(None, "Settings.yaml", "answer: 42\n");
        let context = ApplicationContext::new("Production/Staging").expect("valid context");

        let manager = ConfigurationManager::new(context.clone())
            .with_default_types(tree.root(), tree.temporary_directory())
            .with_cache_directory(tree.temporary_directory())
            .expect("cache load should succeed");
        manager.save_configuration_cache().expect("save should succeed");

        let path = manager.configuration_cache_path().expect("cache path");
        assert_eq!(
            path,
            tree.temporary_directory()
                .join("Configuration")
                .join("Production_StagingConfigurations.yaml")
        );
        assert!(path.is_file());

        // the file now wins over the changed source file
        tree.write_root(None, "Settings.yaml", "answer: 7\n");
        let cached = ConfigurationManager::new(context)
            .with_default_types(tree.root(), tree.temporary_directory())
            .with_cache_directory(tree.temporary_directory())
            .expect("cache load should succeed");
        assert_eq!(
            cached.get_configuration("Settings", Some("answer")).expect("get should succeed"),
            Some(Value::from(42))
        );

        cached.flush_configuration_cache().expect("flush should succeed");
        assert!(!path.exists());
        assert_eq!(
            cached.get_configuration("Settings", Some("answer")).expect("get should succeed"),
            Some(Value::from(7))
        );
    }

    #[test]
    fn test_shutdown_saves_only_when_needed() {
        let tree = ConfigTree::new();
        let manager = ConfigurationManager::new(ApplicationContext::development())
            .with_default_types(tree.root(), tree.temporary_directory())
            .with_cache_directory(tree.temporary_directory())
            .expect("cache load should succeed");
        let path = manager.configuration_cache_path().expect("cache path");

        manager.shutdown().expect("shutdown should succeed");
        assert!(!path.exists());

        manager.get_configuration("Caches", None).expect("get should succeed");
        manager.shutdown().expect("shutdown should succeed");
        assert!(path.is_file());
    }

    #[test]
    fn test_corrupt_cache_file_is_ignored() {
        let tree = ConfigTree::new();
        tree.write_root(None, "Settings.yaml", "answer: 42\n");
        let cache_dir = tree.temporary_directory().join("Configuration");
        fs::create_dir_all(&cache_dir).expect("mkdir should succeed");
        fs::write(cache_dir.join("DevelopmentConfigurations.yaml"), "- not: [a, mapping\n")
            .expect("write should succeed");

        let manager = ConfigurationManager::new(ApplicationContext::development())
            .with_default_types(tree.root(), tree.temporary_directory())
            .with_cache_directory(tree.temporary_directory())
            .expect("cache load should succeed");
        assert_eq!(
            manager.get_configuration("Settings", Some("answer")).expect("get should succeed"),
            Some(Value::from(42))
        );
    }
}
