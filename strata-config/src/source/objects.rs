use std::path::PathBuf;

use serde_yaml::{Mapping, Value};
use strata_core::{ApplicationContext, ConfigResult};

use super::{ConfigurationSource, Package, CONFIGURATION_DIRECTORY};
use crate::manager::CONFIGURATION_TYPE_OBJECTS;
use crate::merge::overrule;
use crate::yaml::{empty_mapping, YamlSource};

/// Per-package merge for `Objects`.
///
/// The result maps each package key to that package's object
/// configuration. Root files apply to every package and overrule the
/// package's own file on the same tier:
///
/// ```text
/// <package>/Configuration/Objects.yaml
/// <root>/Configuration/Objects.yaml
/// for every context, general to specific:
///     <package>/Configuration/<Context>/Objects.yaml
///     <root>/Configuration/<Context>/Objects.yaml
/// ```
#[derive(Debug, Clone)]
pub struct ObjectsConfigurationSource {
    name: String,
    root: PathBuf,
}

impl ObjectsConfigurationSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            name: CONFIGURATION_TYPE_OBJECTS.to_string(),
            root: root.into(),
        }
    }

    fn package_paths(&self, package: &Package, context: &ApplicationContext) -> Vec<PathBuf> {
        let root_configuration = self.root.join(CONFIGURATION_DIRECTORY);
        let mut paths = vec![
            package.configuration_path().join(&self.name),
            root_configuration.join(&self.name),
        ];
        for context_name in context.hierarchy() {
            paths.push(package.configuration_path().join(&context_name).join(&self.name));
            paths.push(root_configuration.join(&context_name).join(&self.name));
        }
        paths
    }
}

impl ConfigurationSource for ObjectsConfigurationSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, packages: &[Package], context: &ApplicationContext) -> ConfigResult<Value> {
        let mut objects = Mapping::new();
        for package in packages {
            let mut configuration = empty_mapping();
            for path in self.package_paths(package, context) {
                for document in YamlSource::load_documents(&path, true)? {
                    configuration = overrule(configuration, document);
                }
            }
            objects.insert(Value::from(package.key.as_str()), configuration);
        }
        tracing::debug!(
            configuration_type = %self.name,
            context = %context,
            packages = packages.len(),
            "Object configuration merged per package"
        );
        Ok(Value::Mapping(objects))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_test_utils::fixtures::ConfigTree;

    fn packages(tree: &ConfigTree) -> Vec<Package> {
        tree.packages()
            .iter()
            .map(|(key, path)| Package::new(key.as_str(), path.as_path()))
            .collect()
    }

    fn yaml(source: &str) -> Value {
        serde_yaml::from_str(source).expect("fixture should parse")
    }

    #[test]
    fn test_keyed_by_package() {
        let mut tree = ConfigTree::new();
        tree.package("Neos.Flow");
        tree.package("Acme.Site");
        tree.write_package(
            "Neos.Flow",
            None,
            "Objects.yaml",
            "Neos\\Flow\\Cache\\CacheFactory: {scope: singleton}\n",
        );

        let objects = ObjectsConfigurationSource::new(tree.root())
            .process(&packages(&tree), &ApplicationContext::development())
            .expect("process should succeed");
        assert_eq!(
            objects,
            yaml("{Neos.Flow: {'Neos\\Flow\\Cache\\CacheFactory': {scope: singleton}}, Acme.Site: {}}")
        );
    }

    #[test]
    fn test_root_and_context_files_overrule_package() {
        let mut tree = ConfigTree::new();
        tree.package("Acme.Site");
        tree.write_package("Acme.Site", None, "Objects.yaml", "Mailer: {className: Smtp, scope: singleton}\n");
        tree.write_root(None, "Objects.yaml", "Mailer: {className: Sendmail}\n");
        tree.write_package("Acme.Site", Some("Testing"), "Objects.yaml", "Mailer: {className: Null}\n");

        let source = ObjectsConfigurationSource::new(tree.root());
        let development = source
            .process(&packages(&tree), &ApplicationContext::development())
            .expect("process should succeed");
        let testing = source
            .process(&packages(&tree), &ApplicationContext::testing())
            .expect("process should succeed");

        assert_eq!(
            development["Acme.Site"],
            yaml("{Mailer: {className: Sendmail, scope: singleton}}")
        );
        assert_eq!(
            testing["Acme.Site"],
            yaml("{Mailer: {className: Null, scope: singleton}}")
        );
    }

    #[test]
    fn test_no_packages_is_empty() {
        let tree = ConfigTree::new();
        tree.write_root(None, "Objects.yaml", "Mailer: {className: Sendmail}\n");
        let objects = ObjectsConfigurationSource::new(tree.root())
            .process(&[], &ApplicationContext::development())
            .expect("process should succeed");
        assert_eq!(objects, empty_mapping());
    }
}
