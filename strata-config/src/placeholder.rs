//! `%env:NAME%` substitution in processed configuration.
//!
//! A string that is exactly one placeholder takes the variable's value, or
//! null if the variable is unset. Placeholders embedded in a longer string
//! are replaced textually, unset variables by the empty string. Variable
//! names are upper case letters, digits and underscores.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_yaml::Value;

static ENV_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%env:([A-Z_0-9]+)%").expect("Invalid env placeholder regex"));

static WHOLE_ENV_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^%env:([A-Z_0-9]+)%$").expect("Invalid env placeholder regex"));

/// Replace placeholders from the process environment.
pub fn substitute_env(value: Value) -> Value {
    substitute_with(value, &|name| std::env::var(name).ok())
}

/// Replace placeholders using `lookup` for variable values.
pub fn substitute_with(value: Value, lookup: &dyn Fn(&str) -> Option<String>) -> Value {
    match value {
        Value::String(text) => substitute_string(text, lookup),
        Value::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .map(|item| substitute_with(item, lookup))
                .collect(),
        ),
        Value::Mapping(mapping) => Value::Mapping(
            mapping
                .into_iter()
                .map(|(key, item)| (key, substitute_with(item, lookup)))
                .collect(),
        ),
        other => other,
    }
}

fn substitute_string(text: String, lookup: &dyn Fn(&str) -> Option<String>) -> Value {
    if let Some(captures) = WHOLE_ENV_PLACEHOLDER.captures(&text) {
        return lookup(&captures[1]).map_or(Value::Null, Value::String);
    }
    if !ENV_PLACEHOLDER.is_match(&text) {
        return Value::String(text);
    }
    let replaced = ENV_PLACEHOLDER.replace_all(&text, |captures: &Captures| {
        lookup(&captures[1]).unwrap_or_default()
    });
    Value::String(replaced.into_owned())
}

/// Whether any string in `value` still holds a placeholder.
pub fn has_placeholders(value: &Value) -> bool {
    match value {
        Value::String(text) => ENV_PLACEHOLDER.is_match(text),
        Value::Sequence(items) => items.iter().any(has_placeholders),
        Value::Mapping(mapping) => mapping.values().any(has_placeholders),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(source: &str) -> Value {
        serde_yaml::from_str(source).expect("fixture should parse")
    }

    fn lookup(name: &str) -> Option<String> {
        match name {
            "DATABASE_HOST" => Some("db.internal".to_string()),
            "PORT" => Some("5432".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_whole_value_placeholder() {
        let value = substitute_with(Value::from("%env:DATABASE_HOST%"), &lookup);
        assert_eq!(value, Value::from("db.internal"));
    }

    #[test]
    fn test_unset_whole_value_becomes_null() {
        let value = substitute_with(Value::from("%env:MISSING%"), &lookup);
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn test_embedded_placeholders() {
        let value = substitute_with(
            Value::from("pgsql:host=%env:DATABASE_HOST%;port=%env:PORT%;user=%env:MISSING%"),
            &lookup,
        );
        assert_eq!(value, Value::from("pgsql:host=db.internal;port=5432;user="));
    }

    #[test]
    fn test_nested_values_and_non_strings() {
        let value = substitute_with(
            yaml("{a: {b: ['%env:PORT%', 3]}, c: true, '%env:PORT%': key}"),
            &lookup,
        );
        assert_eq!(value, yaml("{a: {b: ['5432', 3]}, c: true, '%env:PORT%': key}"));
    }

    #[test]
    fn test_lowercase_names_are_not_placeholders() {
        let value = substitute_with(Value::from("%env:lower%"), &lookup);
        assert_eq!(value, Value::from("%env:lower%"));
        assert!(!has_placeholders(&value));
        assert!(has_placeholders(&yaml("{a: ['x %env:PORT%']}")));
    }
}
