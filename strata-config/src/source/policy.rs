use std::path::PathBuf;

use serde_yaml::{Mapping, Value};
use strata_core::{ApplicationContext, ConfigResult};

use super::{process_layers, ConfigurationSource, Package};
use crate::merge::overrule;
use crate::yaml::YamlSource;

/// File in the temporary directory that replaces the whole policy in
/// `Testing` contexts.
pub const TESTING_POLICY_FILE: &str = "Policy.yaml";

const ROLES: &str = "roles";
const PRIVILEGES: &str = "privileges";

/// Layered merge for security policy.
///
/// Privilege lists are additive: `roles.<role>.privileges` sequences from
/// later layers are appended to the earlier ones instead of replacing them.
/// Everything else is overruled as usual.
#[derive(Debug, Clone)]
pub struct PolicyConfigurationSource {
    name: String,
    root: PathBuf,
    temporary_directory: Option<PathBuf>,
}

impl PolicyConfigurationSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            name: "Policy".to_string(),
            root: root.into(),
            temporary_directory: None,
        }
    }

    /// Enable the `Testing` override read from
    /// `<temporary_directory>/Policy.yaml`.
    pub fn with_temporary_directory(mut self, temporary_directory: impl Into<PathBuf>) -> Self {
        self.temporary_directory = Some(temporary_directory.into());
        self
    }

    fn testing_override(&self, context: &ApplicationContext) -> ConfigResult<Option<Value>> {
        if !context.is_testing() {
            return Ok(None);
        }
        let Some(file) = self
            .temporary_directory
            .as_ref()
            .map(|directory| directory.join(TESTING_POLICY_FILE))
            .filter(|file| file.is_file())
        else {
            return Ok(None);
        };
        tracing::info!(path = %file.display(), "Using testing policy override");
        YamlSource::load_file(&file).map(Some)
    }
}

impl ConfigurationSource for PolicyConfigurationSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, packages: &[Package], context: &ApplicationContext) -> ConfigResult<Value> {
        if let Some(policy) = self.testing_override(context)? {
            return Ok(policy);
        }
        process_layers(&self.root, packages, context, &self.name, true, merge_policy)
    }
}

/// Overrule merge that concatenates each role's privilege list.
pub(crate) fn merge_policy(base: Value, overlay: Value) -> Value {
    let concatenated = concatenated_privileges(&base, &overlay);
    let mut merged = overrule(base, overlay);
    for (role, privileges) in concatenated {
        if let Some(definition) = merged
            .get_mut(ROLES)
            .and_then(|roles| roles.get_mut(&role))
            .and_then(Value::as_mapping_mut)
        {
            definition.insert(Value::from(PRIVILEGES), Value::Sequence(privileges));
        }
    }
    merged
}

fn concatenated_privileges(base: &Value, overlay: &Value) -> Vec<(Value, Vec<Value>)> {
    let (Some(base_roles), Some(overlay_roles)) = (roles(base), roles(overlay)) else {
        return Vec::new();
    };
    overlay_roles
        .iter()
        .filter_map(|(role, definition)| {
            let existing = privileges(base_roles.get(role)?)?;
            let added = privileges(definition)?;
            Some((role.clone(), existing.iter().chain(added).cloned().collect()))
        })
        .collect()
}

fn roles(policy: &Value) -> Option<&Mapping> {
    policy.get(ROLES)?.as_mapping()
}

fn privileges(role: &Value) -> Option<&Vec<Value>> {
    role.get(PRIVILEGES)?.as_sequence()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use strata_test_utils::fixtures::ConfigTree;

    fn yaml(source: &str) -> Value {
        serde_yaml::from_str(source).expect("fixture should parse")
    }

    fn packages(tree: &ConfigTree) -> Vec<Package> {
        tree.packages()
            .iter()
            .map(|(key, path)| Package::new(key.as_str(), path.as_path()))
            .collect()
    }

    #[test]
    fn test_privileges_concatenate() {
        let merged = merge_policy(
            yaml("{roles: {Admin: {privileges: [a, b]}}}"),
            yaml("{roles: {Admin: {privileges: [c]}}}"),
        );
        assert_eq!(merged, yaml("{roles: {Admin: {privileges: [a, b, c]}}}"));
    }

    #[test]
    fn test_other_keys_overrule() {
        let merged = merge_policy(
            yaml("{roles: {Admin: {abstract: true, privileges: [a]}, Editor: {privileges: [e]}}, privilegeTargets: {x: 1}}"),
            yaml("{roles: {Admin: {abstract: false}, Editor: {privileges: [f]}}, privilegeTargets: {x: 2}}"),
        );
        assert_eq!(
            merged,
            yaml("{roles: {Admin: {abstract: false, privileges: [a]}, Editor: {privileges: [e, f]}}, privilegeTargets: {x: 2}}")
        );
    }

    #[test]
    fn test_new_role_is_added() {
        let merged = merge_policy(
            yaml("{roles: {Admin: {privileges: [a]}}}"),
            yaml("{roles: {Guest: {privileges: [g]}}}"),
        );
        assert_eq!(
            merged,
            yaml("{roles: {Admin: {privileges: [a]}, Guest: {privileges: [g]}}}")
        );
    }

    #[test]
    fn test_privileges_concatenate_across_packages() {
        let mut tree = ConfigTree::new();
        tree.package("Acme.One");
        tree.package("Acme.Two");
        tree.write_package("Acme.One", None, "Policy.yaml", "roles:\n  Admin:\n    privileges: [a, b]\n");
        tree.write_package("Acme.Two", None, "Policy.yaml", "roles:\n  Admin:\n    privileges: [c]\n");

        let merged = PolicyConfigurationSource::new(tree.root())
            .process(&packages(&tree), &ApplicationContext::production())
            .expect("process should succeed");
        assert_eq!(merged, yaml("{roles: {Admin: {privileges: [a, b, c]}}}"));
    }

    #[test]
    fn test_testing_override_short_circuits() {
        let mut tree = ConfigTree::new();
        tree.package("Acme.One");
        tree.write_package("Acme.One", None, "Policy.yaml", "roles: {Admin: {privileges: [a]}}\n");
        fs::create_dir_all(tree.temporary_directory()).expect("mkdir should succeed");
        fs::write(
            tree.temporary_directory().join(TESTING_POLICY_FILE),
            "roles: {Tester: {privileges: [t]}}\n",
        )
        .expect("write should succeed");

        let source = PolicyConfigurationSource::new(tree.root())
            .with_temporary_directory(tree.temporary_directory());

        let testing = source
            .process(&packages(&tree), &ApplicationContext::testing())
            .expect("process should succeed");
        assert_eq!(testing, yaml("{roles: {Tester: {privileges: [t]}}}"));

        let production = source
            .process(&packages(&tree), &ApplicationContext::production())
            .expect("process should succeed");
        assert_eq!(production, yaml("{roles: {Admin: {privileges: [a]}}}"));
    }

    #[test]
    fn test_testing_without_override_file_merges() {
        let tree = ConfigTree::new();
        tree.write_root(None, "Policy.yaml", "roles: {Admin: {privileges: [a]}}\n");
        let merged = PolicyConfigurationSource::new(tree.root())
            .with_temporary_directory(tree.temporary_directory())
            .process(&[], &ApplicationContext::testing())
            .expect("process should succeed");
        assert_eq!(merged, yaml("{roles: {Admin: {privileges: [a]}}}"));
    }
}
