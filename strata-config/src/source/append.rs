use std::path::PathBuf;

use serde_yaml::Value;
use strata_core::{ApplicationContext, ConfigResult};

use super::{process_layers, ConfigurationSource, Package};
use crate::merge::overrule;

/// Layered merge for list-valued configuration.
///
/// Top-level keys holding a sequence on both sides are concatenated, so
/// every package can contribute entries (routes, migrations, ...). Any
/// other top-level value is overruled as usual.
#[derive(Debug, Clone)]
pub struct AppendConfigurationSource {
    name: String,
    root: PathBuf,
}

impl AppendConfigurationSource {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }
}

impl ConfigurationSource for AppendConfigurationSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, packages: &[Package], context: &ApplicationContext) -> ConfigResult<Value> {
        process_layers(&self.root, packages, context, &self.name, true, append)
    }
}

fn append(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match (base.get_mut(&key), value) {
                    (Some(Value::Sequence(existing)), Value::Sequence(added)) => existing.extend(added),
                    (Some(existing), value) => {
                        let current = std::mem::replace(existing, Value::Null);
                        *existing = overrule(current, value);
                    }
                    (None, value) => {
                        base.insert(key, value);
                    }
                }
            }
            Value::Mapping(base)
        }
        (_, overlay) => overlay,
    }
}
