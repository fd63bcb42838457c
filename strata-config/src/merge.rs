//! Overrule merge and dotted-path lookup over YAML values.

use serde_yaml::Value;

/// Deep-merge `overlay` onto `base`.
///
/// Where both sides hold a mapping the merge recurses, unless the overlay
/// mapping is empty: an empty mapping replaces. Every other collision is
/// won by `overlay`, sequences included. Keys keep their first position.
pub fn overrule(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) if existing.is_mapping() && is_non_empty_mapping(&value) => {
                        let current = std::mem::replace(existing, Value::Null);
                        *existing = overrule(current, value);
                    }
                    Some(existing) => *existing = value,
                    None => {
                        base.insert(key, value);
                    }
                }
            }
            Value::Mapping(base)
        }
        (_, overlay) => overlay,
    }
}

fn is_non_empty_mapping(value: &Value) -> bool {
    value.as_mapping().is_some_and(|mapping| !mapping.is_empty())
}

/// Value at a dot separated path (`Neos.Flow.core.context`), `None` if any
/// segment is missing or a non-mapping is reached first.
pub fn value_by_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.as_mapping()?.get(segment))
}

/// Store `new` at a dot separated path, creating mappings along the way.
/// Non-mapping values in the way are replaced.
pub fn set_value_by_path(value: &mut Value, path: &str, new: Value) {
    let segments: Vec<&str> = path.split('.').filter(|segment| !segment.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        *value = new;
        return;
    };
    let mut current = value;
    for segment in parents {
        if !current.is_mapping() {
            *current = Value::Mapping(Default::default());
        }
        let Value::Mapping(mapping) = current else {
            return;
        };
        current = mapping
            .entry(Value::from(*segment))
            .or_insert_with(|| Value::Mapping(Default::default()));
    }
    if !current.is_mapping() {
        *current = Value::Mapping(Default::default());
    }
    if let Value::Mapping(mapping) = current {
        mapping.insert(Value::from(*last), new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(source: &str) -> Value {
        serde_yaml::from_str(source).expect("fixture should parse")
    }

    #[test]
    fn test_scalars_replace() {
        let merged = overrule(yaml("{foo: 1, bar: 2}"), yaml("{foo: 10}"));
        assert_eq!(merged, yaml("{foo: 10, bar: 2}"));
    }

    #[test]
    fn test_nested_mappings_recurse() {
        let merged = overrule(
            yaml("{Neos: {Flow: {a: 1, b: {c: 2}}}}"),
            yaml("{Neos: {Flow: {b: {d: 3}}}}"),
        );
        assert_eq!(merged, yaml("{Neos: {Flow: {a: 1, b: {c: 2, d: 3}}}}"));
    }

    #[test]
    fn test_sequences_replace() {
        let merged = overrule(yaml("{list: [a, b, c]}"), yaml("{list: [d]}"));
        assert_eq!(merged, yaml("{list: [d]}"));
    }

    #[test]
    fn test_empty_mapping_replaces() {
        let merged = overrule(yaml("{options: {a: 1, b: 2}}"), yaml("{options: {}}"));
        assert_eq!(merged, yaml("{options: {}}"));
    }

    #[test]
    fn test_mapping_replaces_scalar_and_back() {
        assert_eq!(overrule(yaml("{a: 1}"), yaml("{a: {b: 2}}")), yaml("{a: {b: 2}}"));
        assert_eq!(overrule(yaml("{a: {b: 2}}"), yaml("{a: ~}")), yaml("{a: ~}"));
    }

    #[test]
    fn test_key_order_is_stable() {
        let merged = overrule(yaml("{a: 1, b: 2, c: 3}"), yaml("{a: 9, d: 4}"));
        let keys: Vec<&str> = merged
            .as_mapping()
            .expect("mapping")
            .keys()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(keys, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_value_by_path() {
        let value = yaml("{Neos: {Flow: {core: {context: Production}}}}");
        assert_eq!(
            value_by_path(&value, "Neos.Flow.core.context"),
            Some(&Value::from("Production"))
        );
        assert!(value_by_path(&value, "Neos.Flow.missing").is_none());
        assert!(value_by_path(&value, "Neos.Flow.core.context.deeper").is_none());
        assert_eq!(value_by_path(&value, ""), Some(&value));
    }

    #[test]
    fn test_set_value_by_path() {
        let mut value = yaml("{Neos: {Flow: {core: {phpBinary: php}}, Media: 1}}");
        set_value_by_path(&mut value, "Neos.Flow.core.context", Value::from("Testing"));
        set_value_by_path(&mut value, "Neos.Media.thumbnails", Value::from(true));
        set_value_by_path(&mut value, "Acme.Site", Value::Mapping(Default::default()));
        assert_eq!(
            value,
            yaml("{Neos: {Flow: {core: {phpBinary: php, context: Testing}}, Media: {thumbnails: true}}, Acme: {Site: {}}}")
        );
    }
}
