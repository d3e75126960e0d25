use std::sync::RwLock;

use crate::node::{Node, NodeError, Value};
use crate::signature::Signature;

/// A named in-memory JSON value
#[derive(Debug)]
pub struct ValueNode {
    name: String,
    value: RwLock<Option<Value>>,
}

impl ValueNode {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value: RwLock::new(Some(value)),
        }
    }

    /// A node without a value yet, typically a product
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: RwLock::new(None),
        }
    }

    /// Current value
    pub fn value(&self) -> Option<Value> {
        self.value.read().ok().and_then(|guard| guard.clone())
    }
}

impl Node for ValueNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> Option<Signature> {
        self.value().map(|value| Signature::of_json(&value))
    }

    fn load(&self, is_product: bool) -> Result<Value, NodeError> {
        match self.value() {
            Some(value) => Ok(value),
            None if is_product => Ok(Value::Null),
            None => Err(NodeError::load(&self.name, "no value")),
        }
    }

    fn save(&self, value: &Value) -> Result<(), NodeError> {
        let mut guard = self
            .value
            .write()
            .map_err(|_| NodeError::save(&self.name, "value lock poisoned"))?;
        *guard = Some(value.clone());
        Ok(())
    }
}
