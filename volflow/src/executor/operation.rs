//! Operations that tasks refer to by name.

use super::error::QueueError;
use super::task::TaskError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A named function over JSON arguments.
///
/// Operations must not keep state between runs: the same task may run more
/// than once when it fails transiently.
pub trait Operation: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, args: &Value) -> Result<Value, TaskError>;
}

/// Operation backed by a closure.
pub struct FnOperation<F> {
    name: String,
    func: F,
}

impl<F> FnOperation<F>
where
    F: Fn(&Value) -> Result<Value, TaskError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Operation for FnOperation<F>
where
    F: Fn(&Value) -> Result<Value, TaskError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, args: &Value) -> Result<Value, TaskError> {
        (self.func)(args)
    }
}

/// Operations available to a worker, by name.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    operations: BTreeMap<String, Arc<dyn Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `operation`, rejecting a second operation with the same name.
    pub fn register(&mut self, operation: Arc<dyn Operation>) -> Result<(), QueueError> {
        let name = operation.name().to_string();
        if self.operations.contains_key(&name) {
            return Err(QueueError::DuplicateOperation(name));
        }
        self.operations.insert(name, operation);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Operation>> {
        self.operations.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.operations.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_run() {
        let mut ops = OperationRegistry::new();
        ops.register(Arc::new(FnOperation::new("echo", |args: &Value| Ok(args.clone()))))
            .unwrap();
        assert_eq!(ops.names(), vec!["echo"]);
        let out = ops.get("echo").unwrap().run(&json!({"a": 1})).unwrap();
        assert_eq!(out, json!({"a": 1}));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut ops = OperationRegistry::new();
        ops.register(Arc::new(FnOperation::new("op", |_: &Value| Ok(Value::Null))))
            .unwrap();
        let err = ops
            .register(Arc::new(FnOperation::new("op", |_: &Value| Ok(Value::Null))))
            .unwrap_err();
        assert!(matches!(err, QueueError::DuplicateOperation(name) if name == "op"));
        assert_eq!(ops.len(), 1);
    }
}
