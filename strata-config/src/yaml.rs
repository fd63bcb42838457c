//! YAML file loading.
//!
//! A configuration file is addressed without its extension
//! (`Configuration/Settings`). With split files allowed, siblings named
//! `Settings.<anything>.yaml` are loaded first in file name order, then
//! `Settings.yaml` itself.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use strata_core::{ConfigError, ConfigResult};

use crate::merge::overrule;

const EXTENSION: &str = "yaml";

pub struct YamlSource;

impl YamlSource {
    /// Load and overrule-merge every document for `path_without_extension`.
    ///
    /// Missing files contribute an empty mapping.
    pub fn load(path_without_extension: &Path, allow_split: bool) -> ConfigResult<Value> {
        Ok(Self::load_documents(path_without_extension, allow_split)?
            .into_iter()
            .fold(empty_mapping(), overrule))
    }

    /// The documents `load` would merge, in merge order, unmerged.
    pub fn load_documents(path_without_extension: &Path, allow_split: bool) -> ConfigResult<Vec<Value>> {
        let mut files = Vec::new();
        if allow_split {
            files.extend(split_files(path_without_extension)?);
        }
        let canonical = path_without_extension.with_extension(EXTENSION);
        if canonical.is_file() {
            files.push(canonical);
        }

        files.iter().map(|file| Self::load_file(file)).collect()
    }

    /// Parse one file. Empty documents become an empty mapping; anything
    /// but a mapping at the top level is rejected.
    pub fn load_file(file: &Path) -> ConfigResult<Value> {
        let content = match fs::read_to_string(file) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(empty_mapping()),
            Err(e) => {
                return Err(ConfigError::Io {
                    path: file.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };
        tracing::debug!(path = %file.display(), "Loading configuration file");
        parse(file, &content)
    }
}

fn parse(file: &Path, content: &str) -> ConfigResult<Value> {
    if content.trim().is_empty() {
        return Ok(empty_mapping());
    }
    let parse_error = |reason: String| ConfigError::Parse {
        path: file.display().to_string(),
        reason,
    };
    match serde_yaml::from_str::<Value>(content).map_err(|e| parse_error(e.to_string()))? {
        Value::Null => Ok(empty_mapping()),
        mapping @ Value::Mapping(_) => Ok(mapping),
        other => Err(parse_error(format!(
            "expected a mapping at the top level, found {}",
            kind_of(&other)
        ))),
    }
}

/// `<name>.*.yaml` siblings, sorted by file name.
fn split_files(path_without_extension: &Path) -> ConfigResult<Vec<PathBuf>> {
    let (Some(directory), Some(name)) = (
        path_without_extension.parent(),
        path_without_extension.file_name().and_then(|n| n.to_str()),
    ) else {
        return Ok(Vec::new());
    };
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(ConfigError::Io {
                path: directory.display().to_string(),
                reason: e.to_string(),
            })
        }
    };

    let prefix = format!("{name}.");
    let suffix = format!(".{EXTENSION}");
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|file_name| {
                        file_name.len() > prefix.len() + suffix.len()
                            && file_name.starts_with(&prefix)
                            && file_name.ends_with(&suffix)
                    })
        })
        .collect();
    files.sort();
    Ok(files)
}

pub(crate) fn empty_mapping() -> Value {
    Value::Mapping(Mapping::new())
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).expect("write should succeed");
    }

    #[test]
    fn test_missing_file_is_empty_mapping() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let value = YamlSource::load(&temp_dir.path().join("Settings"), true).expect("load should succeed");
        assert_eq!(value, empty_mapping());
    }

    #[test]
    fn test_empty_file_is_empty_mapping() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        write(temp_dir.path(), "Settings.yaml", "# only a comment\n");
        let value = YamlSource::load(&temp_dir.path().join("Settings"), false).expect("load should succeed");
        assert_eq!(value, empty_mapping());
    }

    #[test]
    fn test_non_mapping_is_parse_error() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        write(temp_dir.path(), "Routes.yaml", "- one\n- two\n");
        let result = YamlSource::load(&temp_dir.path().join("Routes"), false);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        write(temp_dir.path(), "Settings.yaml", "a: [unclosed\n");
        let result = YamlSource::load(&temp_dir.path().join("Settings"), false);
        match result {
            Err(ConfigError::Parse { path, .. }) => assert!(path.ends_with("Settings.yaml")),
            other => panic!("Expected Parse error, got: {:?}", other),
        }
    }

    #[test]
    fn test_split_files_merge_before_canonical() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        write(temp_dir.path(), "Settings.yaml", "a: canonical\n");
        write(temp_dir.path(), "Settings.B.yaml", "a: b\nb: b\n");
        write(temp_dir.path(), "Settings.A.yaml", "a: a\nb: a\nc: a\n");
        write(temp_dir.path(), "SettingsOther.yaml", "c: unrelated\n");

        let value = YamlSource::load(&temp_dir.path().join("Settings"), true).expect("load should succeed");
        let expected: Value = serde_yaml::from_str("a: canonical\nb: b\nc: a\n").expect("fixture");
        assert_eq!(value, expected);
    }

    #[test]
    fn test_split_files_ignored_when_not_allowed() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        write(temp_dir.path(), "Settings.Extra.yaml", "extra: true\n");
        let value = YamlSource::load(&temp_dir.path().join("Settings"), false).expect("load should succeed");
        assert_eq!(value, empty_mapping());
    }

    #[test]
    fn test_load_documents_keeps_order() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        write(temp_dir.path(), "Routes.yaml", "routes: [c]\n");
        write(temp_dir.path(), "Routes.01.yaml", "routes: [a]\n");
        write(temp_dir.path(), "Routes.02.yaml", "routes: [b]\n");

        let documents = YamlSource::load_documents(&temp_dir.path().join("Routes"), true)
            .expect("load should succeed");
        let routes: Vec<&Value> = documents.iter().map(|d| &d["routes"][0]).collect();
        assert_eq!(routes, vec![&Value::from("a"), &Value::from("b"), &Value::from("c")]);
    }
}
