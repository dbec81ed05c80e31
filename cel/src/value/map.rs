//! Map values (§3.1, §4.4 two-phase lookup, §3.4 invariant 4: no duplicate keys).
//!
//! Valid map keys are int, uint, bool, or string (§3.1). int and uint keys
//! that are mathematically equal are the same key, per §4.2's numeric
//! equality — `{1: "a", 1u: "b"}` is a duplicate-key construction error, not
//! two entries. We fold that rule into the hash itself (`KeyNorm::Num` uses
//! an i128 wide enough to hold every i64/u64 value without collision)
//! instead of the direct-lookup-then-linear-scan two-phase strategy the
//! specification describes as one valid strategy among others.

use super::{TypeRegistry, Value};
use crate::error::ExecutionError;
use hashbrown::HashMap;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum KeyNorm {
    Num(i128),
    Bool(bool),
    Str(std::rc::Rc<str>),
}

impl KeyNorm {
    fn of(v: &Value) -> Option<KeyNorm> {
        match v {
            Value::Int(i) => Some(KeyNorm::Num(*i as i128)),
            Value::UInt(u) => Some(KeyNorm::Num(*u as i128)),
            Value::Bool(b) => Some(KeyNorm::Bool(*b)),
            Value::String(s) => Some(KeyNorm::Str(s.clone())),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ValueMap {
    entries: Vec<(Value, Value)>,
    index: HashMap<KeyNorm, usize>,
}

impl ValueMap {
    pub fn new() -> Self {
        ValueMap { entries: Vec::new(), index: HashMap::new() }
    }

    /// Builds a map from entries, rejecting invalid key types, float/null
    /// keys, and duplicates (§3.1, §3.4 invariant 4).
    pub fn try_from_pairs(pairs: Vec<(Value, Value)>) -> Result<Self, ExecutionError> {
        let mut map = ValueMap::new();
        for (k, v) in pairs {
            map.insert(k, v)?;
        }
        Ok(map)
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), ExecutionError> {
        let norm = KeyNorm::of(&key).ok_or_else(|| {
            ExecutionError::custom(format!("invalid map key type: {}", key.type_name()))
        })?;
        if self.index.contains_key(&norm) {
            return Err(ExecutionError::DuplicateKey(format!("{key:?}")));
        }
        let idx = self.entries.len();
        self.entries.push((key, value));
        self.index.insert(norm, idx);
        Ok(())
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        let norm = KeyNorm::of(key)?;
        let idx = *self.index.get(&norm)?;
        Some(&self.entries[idx].1)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        KeyNorm::of(key).map(|n| self.index.contains_key(&n)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }
}

impl PartialEq for ValueMap {
    fn eq(&self, other: &Self) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        // No registry available to a trait method; struct-valued entries
        // fall back to the explicit-field-only comparison (see
        // `StructValue`'s own `PartialEq`). `equals` below is what CEL's
        // `==` operator actually uses.
        let registry = TypeRegistry::default();
        self.entries.iter().all(|(k, v)| {
            other.get(k).map(|ov| super::cel_equal(v, ov, &registry) == Some(true)).unwrap_or(false)
        })
    }
}

impl ValueMap {
    /// CEL map equality (§4.2) with a real registry, so that struct-valued
    /// entries get proper field-default resolution (see
    /// [`super::struct_::StructValue::equals`]).
    pub fn equals(&self, other: &Self, registry: &TypeRegistry) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        self.entries.iter().all(|(k, v)| {
            other.get(k).map(|ov| super::cel_equal(v, ov, registry) == Some(true)).unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_and_uint_collide_as_duplicate_keys() {
        let err = ValueMap::try_from_pairs(vec![
            (Value::Int(1), Value::String("a".into())),
            (Value::UInt(1), Value::String("b".into())),
        ]);
        assert!(matches!(err, Err(ExecutionError::DuplicateKey(_))));
    }

    #[test]
    fn lookup_round_trips() {
        let m = ValueMap::try_from_pairs(vec![(Value::String("k".into()), Value::Int(42))]).unwrap();
        assert_eq!(m.get(&Value::String("k".into())), Some(&Value::Int(42)));
        assert_eq!(m.get(&Value::String("missing".into())), None);
    }
}
