//! The caller-supplied binding surface (§6.1 `BindingMap`) and qualified-
//! identifier resolution (§4.5).

use crate::error::ExecutionError;
use crate::value::{TypeRegistry, Value};
use std::collections::HashMap;

/// A mapping from dotted-path strings to values, supplied fresh per
/// `evaluate` call (§5 "per-call scratch"; §6.1).
#[derive(Clone, Debug, Default)]
pub struct BindingMap {
    entries: HashMap<String, Value>,
}

impl BindingMap {
    pub fn new() -> Self {
        BindingMap::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, value: Value) -> &mut Self {
        self.entries.insert(path.into(), value);
        self
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.entries.get(path)
    }
}

/// Per-evaluate context: the user's bindings, the optional container
/// prefix baked in at compile time, and the struct type registry used for
/// §4.8 field defaulting.
pub struct Context<'a> {
    pub bindings: &'a BindingMap,
    pub container: &'a str,
    pub registry: &'a TypeRegistry,
}

impl<'a> Context<'a> {
    pub fn new(bindings: &'a BindingMap, container: &'a str, registry: &'a TypeRegistry) -> Self {
        Context { bindings, container, registry }
    }

    /// Resolves a single unqualified identifier, trying the container
    /// prefix first then the bare name (§4.5).
    pub fn resolve_ident(&self, name: &str) -> Result<Value, ExecutionError> {
        if !self.container.is_empty() {
            let prefixed = format!("{}.{}", self.container, name);
            if let Some(v) = self.bindings.get(&prefixed) {
                return Ok(v.clone());
            }
        }
        self.bindings.get(name).cloned().ok_or_else(|| ExecutionError::NoSuchIdentifier(name.to_string()))
    }

    /// Longest-prefix-wins resolution for a dotted segment chain (§4.5):
    /// tries the full path, then each shorter prefix, selecting the
    /// remaining segments as fields off whichever prefix hits; the
    /// container namespace is tried before the bare path at every length.
    pub fn resolve_qualified(&self, segments: &[std::rc::Rc<str>]) -> Result<Value, ExecutionError> {
        for len in (1..=segments.len()).rev() {
            let bare = join(segments, len);
            let candidate = if !self.container.is_empty() {
                let prefixed = format!("{}.{}", self.container, bare);
                self.bindings.get(&prefixed).or_else(|| self.bindings.get(&bare))
            } else {
                self.bindings.get(&bare)
            };
            if let Some(base) = candidate {
                let mut value = base.clone();
                for field in &segments[len..] {
                    value = crate::value::select_field(&value, field, self.registry)?;
                }
                return Ok(value);
            }
        }
        Err(ExecutionError::NoSuchIdentifier(join(segments, segments.len())))
    }
}

fn join(segments: &[std::rc::Rc<str>], len: usize) -> String {
    segments[..len].iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let mut b = BindingMap::new();
        b.insert("a.b.c", Value::Int(1));
        b.insert("a.b", Value::Int(2));
        let registry = TypeRegistry::new();
        let ctx = Context::new(&b, "", &registry);
        let segments: Vec<std::rc::Rc<str>> = vec!["a".into(), "b".into(), "c".into()];
        assert_eq!(ctx.resolve_qualified(&segments).unwrap(), Value::Int(1));
    }

    #[test]
    fn falls_back_to_shorter_prefix_and_selects() {
        let mut b = BindingMap::new();
        let mut inner = crate::value::ValueMap::new();
        inner.insert(Value::string("c"), Value::Int(3)).unwrap();
        let mut outer = crate::value::ValueMap::new();
        outer.insert(Value::string("b"), Value::Map(inner)).unwrap();
        b.insert("a", Value::Map(outer));
        let registry = TypeRegistry::new();
        let ctx = Context::new(&b, "", &registry);
        let segments: Vec<std::rc::Rc<str>> = vec!["a".into(), "b".into(), "c".into()];
        assert_eq!(ctx.resolve_qualified(&segments).unwrap(), Value::Int(3));
    }
}
