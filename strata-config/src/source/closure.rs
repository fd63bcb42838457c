use std::fmt;

use serde_yaml::Value;
use strata_core::{ApplicationContext, ConfigResult};

use super::{ConfigurationSource, Package};

pub type ConfigurationClosure =
    Box<dyn Fn(&[Package], &ApplicationContext) -> ConfigResult<Value> + Send + Sync>;

/// A source whose whole result comes from a function.
///
/// Used by bootstrap and test code to inject a configuration type without
/// any files.
pub struct ClosureConfigurationSource {
    name: String,
    closure: ConfigurationClosure,
}

impl ClosureConfigurationSource {
    pub fn new<F>(name: impl Into<String>, closure: F) -> Self
    where
        F: Fn(&[Package], &ApplicationContext) -> ConfigResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            closure: Box::new(closure),
        }
    }
}

impl ConfigurationSource for ClosureConfigurationSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, packages: &[Package], context: &ApplicationContext) -> ConfigResult<Value> {
        (self.closure)(packages, context)
    }
}

impl fmt::Debug for ClosureConfigurationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureConfigurationSource")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::ConfigError;

    #[test]
    fn test_closure_receives_packages_and_context() {
        let source = ClosureConfigurationSource::new("Views", |packages, context| {
            let mut mapping = serde_yaml::Mapping::new();
            mapping.insert("packages".into(), (packages.len() as u64).into());
            mapping.insert("context".into(), context.as_str().into());
            Ok(Value::Mapping(mapping))
        });

        let packages = vec![Package::new("Acme.A", "/a"), Package::new("Acme.B", "/b")];
        let value = source
            .process(&packages, &ApplicationContext::production())
            .expect("process should succeed");

        assert_eq!(source.name(), "Views");
        assert_eq!(value["packages"], Value::from(2u64));
        assert_eq!(value["context"], Value::from("Production"));
    }

    #[test]
    fn test_closure_errors_propagate() {
        let source = ClosureConfigurationSource::new("Broken", |_, _| {
            Err(ConfigError::Source {
                name: "Broken".to_string(),
                reason: "no data".to_string(),
            })
        });
        assert!(matches!(
            source.process(&[], &ApplicationContext::development()),
            Err(ConfigError::Source { .. })
        ));
    }
}
