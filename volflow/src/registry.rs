//! Explicit string-discriminator registry.
//!
//! A [`Registry`] maps the `@type` field of a JSON description to the
//! constructor registered under that name. Names are validated when they
//! are registered, so building from a description is a plain
//! deserialize-then-dispatch step.
//!
//! ```ignore
//! let mut registry: Registry<VolumetricLayer, Ctx, LayerError> = Registry::new("layer");
//! registry.register("precomputed", build_precomputed)?;
//! let layer = registry.build(json!({"@type": "precomputed", "path": "/data/img"}), &ctx)?;
//! ```

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Key naming the constructor in a description.
pub const TYPE_KEY: &str = "@type";

/// Errors raised by registration and dispatch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("{kind} description must be a JSON object")]
    NotAnObject { kind: String },

    #[error("{kind} description has no '@type' field")]
    MissingType { kind: String },

    #[error("Unknown {kind} type '{type_name}' (known: {known})")]
    UnknownType {
        kind: String,
        type_name: String,
        known: String,
    },

    #[error("{kind} type '{type_name}' is already registered")]
    Duplicate { kind: String, type_name: String },

    #[error("Invalid type name '{0}'")]
    InvalidName(String),

    /// The parameters could not be interpreted by the constructor.
    #[error("Cannot build '{type_name}': {message}")]
    Build { type_name: String, message: String },
}

impl RegistryError {
    /// Wraps a constructor's parameter error.
    pub fn build(type_name: &str, error: impl fmt::Display) -> Self {
        Self::Build {
            type_name: type_name.to_string(),
            message: error.to_string(),
        }
    }
}

/// Builds a `T` from its parameters (the description minus `@type`).
pub type Constructor<T, C, E> = fn(Value, &C) -> Result<T, E>;

/// Map from type name to constructor for one kind of object.
pub struct Registry<T, C, E> {
    kind: String,
    constructors: BTreeMap<String, Constructor<T, C, E>>,
}

impl<T, C, E: From<RegistryError>> Registry<T, C, E> {
    /// Creates an empty registry for objects of `kind` (used in messages).
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            constructors: BTreeMap::new(),
        }
    }

    /// Registers `constructor` under `name`.
    pub fn register(
        &mut self,
        name: &str,
        constructor: Constructor<T, C, E>,
    ) -> Result<(), RegistryError> {
        if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c == '@') {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        if self.constructors.contains_key(name) {
            return Err(RegistryError::Duplicate {
                kind: self.kind.clone(),
                type_name: name.to_string(),
            });
        }
        self.constructors.insert(name.to_string(), constructor);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Builds an object from a description carrying a `@type` field.
    pub fn build(&self, description: Value, ctx: &C) -> Result<T, E> {
        let Value::Object(mut params) = description else {
            return Err(RegistryError::NotAnObject {
                kind: self.kind.clone(),
            }
            .into());
        };
        let Some(Value::String(type_name)) = params.remove(TYPE_KEY) else {
            return Err(RegistryError::MissingType {
                kind: self.kind.clone(),
            }
            .into());
        };
        let Some(constructor) = self.constructors.get(&type_name) else {
            return Err(RegistryError::UnknownType {
                kind: self.kind.clone(),
                type_name,
                known: self.names().join(", "),
            }
            .into());
        };
        constructor(Value::Object(params), ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scaled(params: Value, factor: &i64) -> Result<i64, RegistryError> {
        let value = params
            .get("value")
            .and_then(Value::as_i64)
            .ok_or_else(|| RegistryError::build("scaled", "missing 'value'"))?;
        Ok(value * factor)
    }

    fn constant(_: Value, _: &i64) -> Result<i64, RegistryError> {
        Ok(7)
    }

    fn registry() -> Registry<i64, i64, RegistryError> {
        let mut r = Registry::new("number");
        r.register("scaled", scaled).unwrap();
        r.register("constant", constant).unwrap();
        r
    }

    #[test]
    fn test_dispatch() {
        let r = registry();
        assert_eq!(r.build(json!({"@type": "scaled", "value": 3}), &10).unwrap(), 30);
        assert_eq!(r.build(json!({"@type": "constant"}), &10).unwrap(), 7);
        assert_eq!(r.names(), vec!["constant", "scaled"]);
    }

    #[test]
    fn test_registration_rules() {
        let mut r = registry();
        assert!(matches!(
            r.register("scaled", constant),
            Err(RegistryError::Duplicate { .. })
        ));
        assert!(matches!(
            r.register("bad name", constant),
            Err(RegistryError::InvalidName(_))
        ));
    }

    #[test]
    fn test_malformed_descriptions() {
        let r = registry();
        assert!(matches!(r.build(json!([1]), &1), Err(RegistryError::NotAnObject { .. })));
        assert!(matches!(
            r.build(json!({"value": 1}), &1),
            Err(RegistryError::MissingType { .. })
        ));
        let err = r.build(json!({"@type": "nope"}), &1).unwrap_err();
        assert!(err.to_string().contains("known: constant, scaled"));
        assert!(matches!(
            r.build(json!({"@type": "scaled"}), &1),
            Err(RegistryError::Build { .. })
        ));
    }
}
