use std::path::PathBuf;

use serde_yaml::Value;
use strata_core::{ApplicationContext, ConfigResult};

use super::{process_layers, ConfigurationSource, Package};
use crate::manager::CONFIGURATION_TYPE_SETTINGS;
use crate::merge::{overrule, set_value_by_path, value_by_path};
use crate::yaml::empty_mapping;

/// Package whose settings are merged first.
pub const FRAMEWORK_PACKAGE_KEY: &str = "Neos.Flow";

/// Path the running context is written to.
pub const CONTEXT_SETTING_PATH: &str = "Neos.Flow.core.context";

/// Layered merge for `Settings`.
///
/// Differs from a plain merge in three ways: the framework package always
/// comes first, every package key exists as a (possibly empty) mapping, and
/// `Neos.Flow.core.context` holds the running context. A tree without any
/// package and without settings files stays empty.
#[derive(Debug, Clone)]
pub struct SettingsConfigurationSource {
    name: String,
    root: PathBuf,
}

impl SettingsConfigurationSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            name: CONFIGURATION_TYPE_SETTINGS.to_string(),
            root: root.into(),
        }
    }
}

impl ConfigurationSource for SettingsConfigurationSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, packages: &[Package], context: &ApplicationContext) -> ConfigResult<Value> {
        let packages = framework_first(packages);

        let mut skeleton = empty_mapping();
        for package in &packages {
            if value_by_path(&skeleton, &package.key).is_none() {
                set_value_by_path(&mut skeleton, &package.key, empty_mapping());
            }
        }

        let layered = process_layers(&self.root, &packages, context, &self.name, true, overrule)?;
        let mut settings = overrule(skeleton, layered);
        if settings.as_mapping().is_some_and(|mapping| !mapping.is_empty()) {
            set_value_by_path(&mut settings, CONTEXT_SETTING_PATH, Value::from(context.to_string()));
        }
        Ok(settings)
    }
}

fn framework_first(packages: &[Package]) -> Vec<Package> {
    let mut ordered = Vec::with_capacity(packages.len());
    ordered.extend(packages.iter().filter(|p| p.key == FRAMEWORK_PACKAGE_KEY).cloned());
    ordered.extend(packages.iter().filter(|p| p.key != FRAMEWORK_PACKAGE_KEY).cloned());
    ordered
}
