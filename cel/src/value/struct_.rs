//! Schema-less struct values (§4.8).
//!
//! Structs represent protobuf-like messages without depending on protobuf
//! descriptors at runtime. A construction call records only the fields
//! explicitly listed; reading an unset field falls back to a
//! convention-based default. Doing that purely from the field *name*, with
//! no type information at all, is not possible in general — a field named
//! `tags` could be a `repeated string` (default: empty list) or a `string`
//! (default: ""). Real CEL embedders resolve this with a protobuf
//! descriptor; absent one, this crate resolves it with an explicit
//! `StructType` registry the embedder populates once per message type
//! (this is the switchover point §9's Open Questions ask to be documented).
//! A field present in the registry but not explicitly set on the value
//! yields its convention default; a field absent from the registry entirely
//! is "don't know" and yields the error sentinel, matching §4.8's
//! distinction between a known-absent field and an unknown one.

use super::Value;
use crate::error::ExecutionError;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Repeated,
    Map,
    Wrapper,
    UInt,
    Double,
    Bool,
    String,
    Bytes,
    Message,
    Int,
}

impl FieldKind {
    fn default_value(self, message_type: &str) -> Value {
        match self {
            FieldKind::Repeated => Value::List(Vec::new()),
            FieldKind::Map => Value::Map(super::map::ValueMap::new()),
            FieldKind::Wrapper => Value::Null,
            FieldKind::UInt => Value::UInt(0),
            FieldKind::Double => Value::Double(0.0),
            FieldKind::Bool => Value::Bool(false),
            FieldKind::String => Value::String(Rc::from("")),
            FieldKind::Bytes => Value::Bytes(Rc::from(Vec::new().into_boxed_slice())),
            FieldKind::Int => Value::Int(0),
            FieldKind::Message => Value::Struct(StructValue::default_of(message_type)),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct StructType {
    pub name: Rc<str>,
    pub fields: Vec<(Rc<str>, FieldKind, Option<Rc<str>>)>,
    /// proto2-style messages treat every explicitly-set field as present;
    /// proto3-style additionally requires the value differ from the type
    /// default (§4.8).
    pub proto3: bool,
}

impl StructType {
    fn field(&self, name: &str) -> Option<&(Rc<str>, FieldKind, Option<Rc<str>>)> {
        self.fields.iter().find(|(n, _, _)| n.as_ref() == name)
    }
}

#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    types: Vec<StructType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry::default()
    }

    pub fn register(&mut self, ty: StructType) {
        self.types.push(ty);
    }

    pub fn get(&self, name: &str) -> Option<&StructType> {
        self.types.iter().find(|t| t.name.as_ref() == name)
    }
}

#[derive(Clone, Debug)]
pub struct StructValue {
    pub type_name: Rc<str>,
    fields: Vec<(Rc<str>, Value)>,
}

impl StructValue {
    pub fn new(type_name: impl Into<Rc<str>>, fields: Vec<(Rc<str>, Value)>) -> Self {
        StructValue { type_name: type_name.into(), fields }
    }

    pub fn default_of(type_name: &str) -> Self {
        StructValue { type_name: Rc::from(type_name), fields: Vec::new() }
    }

    pub fn explicit_field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n.as_ref() == name).map(|(_, v)| v)
    }

    pub fn explicit_fields(&self) -> impl Iterator<Item = &(Rc<str>, Value)> {
        self.fields.iter()
    }

    /// Field access per §4.4/§4.8: explicit value if set, else the
    /// convention default from the registry, else the error sentinel.
    pub fn get(&self, name: &str, registry: &TypeRegistry) -> Result<Value, ExecutionError> {
        if let Some(v) = self.explicit_field(name) {
            return Ok(v.clone());
        }
        let ty = registry.get(&self.type_name).ok_or_else(|| ExecutionError::NoSuchField {
            target: self.type_name.to_string(),
            field: name.to_string(),
        })?;
        let (_, kind, msg_ty) = ty.field(name).ok_or_else(|| ExecutionError::NoSuchField {
            target: self.type_name.to_string(),
            field: name.to_string(),
        })?;
        Ok(kind.default_value(msg_ty.as_deref().unwrap_or("")))
    }

    /// `has(s.f)` per §4.8.
    pub fn has(&self, name: &str, registry: &TypeRegistry) -> Result<bool, ExecutionError> {
        let explicit = self.explicit_field(name);
        let ty = registry.get(&self.type_name);
        match (explicit, ty.and_then(|t| t.field(name))) {
            (None, None) => Err(ExecutionError::NoSuchField {
                target: self.type_name.to_string(),
                field: name.to_string(),
            }),
            (None, Some(_)) => Ok(false),
            (Some(_), None) => Ok(true),
            (Some(v), Some((_, kind, msg_ty))) => {
                let ty = ty.unwrap();
                if matches!(kind, FieldKind::Repeated | FieldKind::Map) {
                    let non_empty = match v {
                        Value::List(l) => !l.is_empty(),
                        Value::Map(m) => !m.is_empty(),
                        _ => true,
                    };
                    Ok(non_empty)
                } else if ty.proto3 {
                    let default = kind.default_value(msg_ty.as_deref().unwrap_or(""));
                    Ok(super::cel_equal(v, &default, registry) != Some(true))
                } else {
                    Ok(true)
                }
            }
        }
    }
}

impl PartialEq for StructValue {
    fn eq(&self, other: &Self) -> bool {
        if self.type_name != other.type_name {
            return false;
        }
        // union of explicitly-set fields, compared as type defaults when
        // absent on one side (§4.2). Without a registry here we compare the
        // explicitly-set subset directly, which is exact whenever both
        // sides set the same fields (the common case for literal structs).
        // [`StructValue::equals`] is the registry-aware version CEL's `==`
        // operator actually uses.
        if self.fields.len() != other.fields.len() {
            return false;
        }
        self.fields.iter().all(|(k, v)| other.explicit_field(k) == Some(v))
    }
}

impl StructValue {
    /// CEL struct equality (§4.2): the union of both sides' known field
    /// names — explicitly-set fields plus whatever `registry` knows about
    /// this type — with each side's value resolved through [`Self::get`]
    /// (explicit value if set, else the registry's convention default)
    /// before comparing. This is what `==`/`!=` actually use; the derived
    /// [`PartialEq`] impl above has no registry to do this with.
    pub fn equals(&self, other: &Self, registry: &TypeRegistry) -> bool {
        if self.type_name != other.type_name {
            return false;
        }
        let mut names: Vec<&str> = self
            .fields
            .iter()
            .map(|(n, _)| n.as_ref())
            .chain(other.fields.iter().map(|(n, _)| n.as_ref()))
            .collect();
        if let Some(ty) = registry.get(&self.type_name) {
            names.extend(ty.fields.iter().map(|(n, _, _)| n.as_ref()));
        }
        names.sort_unstable();
        names.dedup();
        names.into_iter().all(|name| match (self.get(name, registry), other.get(name, registry)) {
            (Ok(a), Ok(b)) => super::cel_equal(&a, &b, registry) == Some(true),
            _ => false,
        })
    }
}
