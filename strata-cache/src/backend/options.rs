//! Backend option maps.
//!
//! Options arrive as a string keyed JSON object, typically straight out of a
//! merged `Caches` configuration:
//!
//! ```yaml
//! Flow_Session_Storage:
//!   backend: PdoBackend
//!   backendOptions:
//!     dataSourceName: 'sqlite:/var/cache/session.db'
//!     defaultLifetime: 0
//! ```

use serde_json::{Map, Value};
use strata_core::{CacheError, CacheResult};

/// Typed view over a backend's option map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendOptions {
    values: Map<String, Value>,
}

impl BackendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used mostly by tests and programmatic setup.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn raw(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Reject keys the backend does not understand.
    pub fn ensure_known(&self, backend: &str, known: &[&str]) -> CacheResult<()> {
        match self.values.keys().find(|key| !known.contains(&key.as_str())) {
            Some(unknown) => Err(invalid(backend, format!("unknown option \"{unknown}\""))),
            None => Ok(()),
        }
    }

    pub fn string(&self, backend: &str, key: &str) -> CacheResult<Option<String>> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(_) => Err(invalid(backend, format!("option \"{key}\" must be a string"))),
        }
    }

    /// Non-negative integers, also accepted in string form (`"3600"`).
    pub fn u64(&self, backend: &str, key: &str) -> CacheResult<Option<u64>> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
                invalid(backend, format!("option \"{key}\" must be a non-negative integer"))
            }),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| {
                invalid(backend, format!("option \"{key}\" must be a non-negative integer"))
            }),
            Some(_) => Err(invalid(
                backend,
                format!("option \"{key}\" must be a non-negative integer"),
            )),
        }
    }

    pub fn bool(&self, backend: &str, key: &str) -> CacheResult<Option<bool>> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(invalid(backend, format!("option \"{key}\" must be a boolean"))),
        }
    }
}

impl From<Map<String, Value>> for BackendOptions {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}

impl TryFrom<Value> for BackendOptions {
    type Error = CacheError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            Value::Null => Ok(Self::default()),
            Value::Array(values) if values.is_empty() => Ok(Self::default()),
            other => Err(invalid(
                "backend",
                format!("backend options must be a mapping, got {other}"),
            )),
        }
    }
}

fn invalid(backend: &str, reason: String) -> CacheError {
    CacheError::InvalidOptions {
        backend: backend.to_string(),
        reason,
    }
}
