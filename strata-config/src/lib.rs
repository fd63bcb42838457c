//! STRATA Config - Layered Configuration Pipeline
//!
//! Builds named configuration types (`Settings`, `Caches`, `Policy`, ...)
//! from YAML files spread over an installation's packages and its root,
//! layered by application context.
//!
//! Architecture:
//! ```text
//! <Type>.yaml / <Type>.*.yaml files
//!     ↓
//! YamlSource (parse, split files)
//!     ↓
//! ConfigurationSource (layer traversal + merge rule)
//!     ↓
//! ConfigurationManager (per-type result, %env:...% placeholders, on-disk cache)
//! ```

pub mod manager;
pub mod merge;
pub mod placeholder;
pub mod source;
pub mod yaml;

pub use manager::{
    ConfigurationManager, CONFIGURATION_TYPE_CACHES, CONFIGURATION_TYPE_OBJECTS,
    CONFIGURATION_TYPE_POLICY, CONFIGURATION_TYPE_SETTINGS,
};
pub use merge::{overrule, set_value_by_path, value_by_path};
pub use placeholder::{has_placeholders, substitute_env, substitute_with};
pub use source::{
    layered_paths, AppendConfigurationSource, ClosureConfigurationSource, ConfigurationClosure,
    ConfigurationSource, MergeConfigurationSource, ObjectsConfigurationSource, Package,
    PolicyConfigurationSource, SettingsConfigurationSource, CONFIGURATION_DIRECTORY,
    CONTEXT_SETTING_PATH, FRAMEWORK_PACKAGE_KEY, TESTING_POLICY_FILE,
};
pub use yaml::YamlSource;
