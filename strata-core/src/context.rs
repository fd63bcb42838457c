//! Application context (`Production/Staging`, `Testing/Behat`, ...).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Root context names an application may run under.
pub const ROOT_CONTEXTS: [&str; 3] = ["Development", "Production", "Testing"];

/// A slash separated deployment context whose first segment is one of
/// [`ROOT_CONTEXTS`].
///
/// The hierarchy is what the configuration pipeline layers over: for
/// `Production/Staging/Server1` it yields `Production`,
/// `Production/Staging` and `Production/Staging/Server1`, general first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApplicationContext {
    name: String,
}

impl ApplicationContext {
    /// Parse and validate a context string.
    pub fn new(name: &str) -> ConfigResult<Self> {
        let invalid = |reason: &str| ConfigError::InvalidContext {
            context: name.to_string(),
            reason: reason.to_string(),
        };

        if name.split('/').any(str::is_empty) {
            return Err(invalid("context segments must not be empty"));
        }
        let root = name.split('/').next().unwrap_or_default();
        if !ROOT_CONTEXTS.contains(&root) {
            return Err(invalid(
                "the root context must be Development, Production or Testing",
            ));
        }

        Ok(Self {
            name: name.to_string(),
        })
    }

    pub fn development() -> Self {
        Self {
            name: "Development".to_string(),
        }
    }

    pub fn production() -> Self {
        Self {
            name: "Production".to_string(),
        }
    }

    pub fn testing() -> Self {
        Self {
            name: "Testing".to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// The first segment.
    pub fn root(&self) -> &str {
        self.name.split('/').next().unwrap_or(&self.name)
    }

    /// The enclosing context, `None` for a root context.
    pub fn parent(&self) -> Option<ApplicationContext> {
        self.name.rsplit_once('/').map(|(parent, _)| ApplicationContext {
            name: parent.to_string(),
        })
    }

    /// Every context from the root down to this one.
    pub fn hierarchy(&self) -> Vec<String> {
        let mut hierarchy = Vec::new();
        let mut current = String::new();
        for segment in self.name.split('/') {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            hierarchy.push(current.clone());
        }
        hierarchy
    }

    pub fn is_development(&self) -> bool {
        self.root() == "Development"
    }

    pub fn is_production(&self) -> bool {
        self.root() == "Production"
    }

    pub fn is_testing(&self) -> bool {
        self.root() == "Testing"
    }

    /// Context name with `/` replaced by `_`, safe for a single path segment.
    pub fn to_path_segment(&self) -> String {
        self.name.replace('/', "_")
    }
}

impl Default for ApplicationContext {
    fn default() -> Self {
        Self::development()
    }
}

impl fmt::Display for ApplicationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for ApplicationContext {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ApplicationContext {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<ApplicationContext> for String {
    fn from(context: ApplicationContext) -> Self {
        context.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_context() {
        let context: ApplicationContext = "Production/Staging".parse().expect("should parse");
        assert_eq!(context.root(), "Production");
        assert!(context.is_production());
        assert!(!context.is_testing());
        assert_eq!(context.to_string(), "Production/Staging");
    }

    #[test]
    fn test_hierarchy_general_to_specific() {
        let context = ApplicationContext::new("Testing/System1/Worker").expect("should parse");
        assert_eq!(
            context.hierarchy(),
            vec!["Testing", "Testing/System1", "Testing/System1/Worker"]
        );
    }

    #[test]
    fn test_parent() {
        let context = ApplicationContext::new("Production/Staging").expect("should parse");
        assert_eq!(context.parent(), Some(ApplicationContext::production()));
        assert_eq!(ApplicationContext::production().parent(), None);
    }

    #[test]
    fn test_rejects_unknown_root() {
        let err = ApplicationContext::new("Staging").expect_err("should fail");
        assert!(matches!(err, ConfigError::InvalidContext { .. }));
    }

    #[test]
    fn test_rejects_empty_segments() {
        for name in ["", "Production/", "Production//Staging", "/Production"] {
            assert!(ApplicationContext::new(name).is_err(), "{name:?} should fail");
        }
    }

    #[test]
    fn test_path_segment() {
        let context = ApplicationContext::new("Testing/Behat").expect("should parse");
        assert_eq!(context.to_path_segment(), "Testing_Behat");
    }

    #[test]
    fn test_serde_round_trip_validates() {
        let json = serde_json::to_string(&ApplicationContext::testing()).expect("serialize");
        assert_eq!(json, "\"Testing\"");
        let bad: Result<ApplicationContext, _> = serde_json::from_str("\"Nope\"");
        assert!(bad.is_err());
    }
}
