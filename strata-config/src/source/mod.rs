//! Configuration sources.
//!
//! A source produces one named configuration type (`Settings`, `Caches`,
//! `Policy`, ...) from the installation's packages and the application
//! context. The file based sources all walk the same layers, each layer
//! overruling the ones before it:
//!
//! ```text
//! <package>/Configuration/<Type>.yaml              for every package, in order
//! <root>/Configuration/<Type>.yaml
//! for every context, general to specific:
//!     <package>/Configuration/<Context>/<Type>.yaml    for every package
//!     <root>/Configuration/<Context>/<Type>.yaml
//! ```
//!
//! They differ in how two layers are combined. `Settings` additionally
//! seeds package keys and the running context; `Objects` is kept apart per
//! package.

use std::fmt;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use strata_core::{ApplicationContext, ConfigResult};

use crate::merge::overrule;
use crate::yaml::{empty_mapping, YamlSource};

mod append;
mod closure;
mod objects;
mod policy;
mod settings;

pub use append::AppendConfigurationSource;
pub use closure::{ClosureConfigurationSource, ConfigurationClosure};
pub use objects::ObjectsConfigurationSource;
pub use policy::{PolicyConfigurationSource, TESTING_POLICY_FILE};
pub use settings::{SettingsConfigurationSource, CONTEXT_SETTING_PATH, FRAMEWORK_PACKAGE_KEY};

/// Directory below a package or the root that holds configuration files.
pub const CONFIGURATION_DIRECTORY: &str = "Configuration";

/// An installed package contributing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub key: String,
    pub path: PathBuf,
}

impl Package {
    pub fn new(key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
        }
    }

    pub fn configuration_path(&self) -> PathBuf {
        self.path.join(CONFIGURATION_DIRECTORY)
    }
}

/// Produces the merged configuration for one type.
pub trait ConfigurationSource: Send + Sync {
    /// The configuration type this source produces.
    fn name(&self) -> &str;

    /// Build the configuration. Packages are in registration order.
    fn process(&self, packages: &[Package], context: &ApplicationContext) -> ConfigResult<Value>;
}

impl fmt::Debug for dyn ConfigurationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigurationSource({})", self.name())
    }
}

/// Every file location for `name`, extension stripped, in merge order.
pub fn layered_paths(
    root: &Path,
    packages: &[Package],
    context: &ApplicationContext,
    name: &str,
) -> Vec<PathBuf> {
    let root_configuration = root.join(CONFIGURATION_DIRECTORY);
    let mut paths: Vec<PathBuf> = packages
        .iter()
        .map(|package| package.configuration_path().join(name))
        .collect();
    paths.push(root_configuration.join(name));

    for context_name in context.hierarchy() {
        paths.extend(
            packages
                .iter()
                .map(|package| package.configuration_path().join(&context_name).join(name)),
        );
        paths.push(root_configuration.join(&context_name).join(name));
    }
    paths
}

/// Load every layer and fold the documents with `combine`.
pub(crate) fn process_layers<F>(
    root: &Path,
    packages: &[Package],
    context: &ApplicationContext,
    name: &str,
    allow_split: bool,
    combine: F,
) -> ConfigResult<Value>
where
    F: Fn(Value, Value) -> Value,
{
    let mut configuration = empty_mapping();
    let mut files = 0usize;
    for path in layered_paths(root, packages, context, name) {
        for document in YamlSource::load_documents(&path, allow_split)? {
            configuration = combine(configuration, document);
            files += 1;
        }
    }
    tracing::debug!(
        configuration_type = name,
        context = %context,
        packages = packages.len(),
        files,
        "Configuration layers merged"
    );
    Ok(configuration)
}

/// Plain overrule merge across all layers.
#[derive(Debug, Clone)]
pub struct MergeConfigurationSource {
    name: String,
    root: PathBuf,
    allow_split: bool,
}

impl MergeConfigurationSource {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            allow_split: true,
        }
    }

    /// Ignore `<Type>.*.yaml` split files.
    pub fn without_split_files(mut self) -> Self {
        self.allow_split = false;
        self
    }
}

impl ConfigurationSource for MergeConfigurationSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, packages: &[Package], context: &ApplicationContext) -> ConfigResult<Value> {
        process_layers(&self.root, packages, context, &self.name, self.allow_split, overrule)
    }
}
