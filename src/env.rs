//! The interpreter's variable environment (spec.md §3 "Environment").

use crate::capability::Capability;
use crate::error::{CamelError, CamelResult};
use crate::value::Value;
use std::collections::HashMap;

/// `name → (Value, Capability)`. Rebinding replaces both the value and the
/// capability; there is no notion of const/let distinction in the DSL.
#[derive(Debug, Default)]
pub struct Environment {
    bindings: HashMap<String, (Value, Capability)>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            bindings: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> CamelResult<&(Value, Capability)> {
        self.bindings
            .get(name)
            .ok_or_else(|| CamelError::runtime_trusted(format!("name '{name}' is not defined")))
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value, capability: Capability) {
        self.bindings.insert(name.into(), (value, capability));
    }

    /// Snapshot the current binding for `name` (or its absence), so a
    /// loop/comprehension scope can restore it afterwards (spec.md §3:
    /// "Loop variables and comprehension variables are scoped").
    pub fn snapshot(&self, name: &str) -> Option<(Value, Capability)> {
        self.bindings.get(name).cloned()
    }

    pub fn restore(&mut self, name: &str, prior: Option<(Value, Capability)>) {
        match prior {
            Some(binding) => {
                self.bindings.insert(name.to_string(), binding);
            }
            None => {
                self.bindings.remove(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_scope_restores_prior_binding() {
        let mut env = Environment::new();
        env.set("x", Value::Int(1), Capability::trusted_literal());

        let prior = env.snapshot("x");
        env.set("x", Value::Int(2), Capability::trusted_literal());
        assert_eq!(env.get("x").unwrap().0, Value::Int(2));

        env.restore("x", prior);
        assert_eq!(env.get("x").unwrap().0, Value::Int(1));
    }

    #[test]
    fn loop_scope_restores_absence() {
        let mut env = Environment::new();
        let prior = env.snapshot("loop_var");
        env.set("loop_var", Value::Int(1), Capability::trusted_literal());
        env.restore("loop_var", prior);
        assert!(env.get("loop_var").is_err());
    }

    #[test]
    fn unknown_variable_errors_are_trusted() {
        let env = Environment::new();
        let err = env.get("missing").unwrap_err();
        assert!(err.trusted());
    }
}
