//! Tagged-pointer value boxing so a [`Value`] can cross the Cranelift FFI
//! boundary as a single `u64`. Mirrors the teacher's
//! `cel-jit::runtime::value::BoxedValue`: the low 3 bits are a type tag,
//! letting null/bool/small-int values travel inline with no heap traffic at
//! all, while everything else is a pointer to a leaked `Box<Value>`.

use super::super::value::Value;

const TAG_MASK: u64 = 0b111;
const TAG_PTR: u64 = 0b000;
const TAG_SMALL_INT: u64 = 0b001;
const TAG_BOOL: u64 = 0b010;
const TAG_NULL: u64 = 0b011;

const SMALL_INT_MAX: i64 = 1 << 60;
const SMALL_INT_MIN: i64 = -(1 << 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoxedValue(pub u64);

impl BoxedValue {
    pub fn null() -> BoxedValue {
        BoxedValue(TAG_NULL)
    }

    pub fn bool(b: bool) -> BoxedValue {
        BoxedValue(((b as u64) << 3) | TAG_BOOL)
    }

    pub fn small_int(i: i64) -> Option<BoxedValue> {
        if (SMALL_INT_MIN..=SMALL_INT_MAX).contains(&i) {
            Some(BoxedValue((((i as u64) << 3) & !TAG_MASK) | TAG_SMALL_INT))
        } else {
            None
        }
    }

    pub fn tag(self) -> u64 {
        self.0 & TAG_MASK
    }

    pub fn is_null(self) -> bool {
        self.tag() == TAG_NULL
    }

    pub fn is_ptr(self) -> bool {
        self.tag() == TAG_PTR
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> BoxedValue {
        BoxedValue(raw)
    }

    /// Boxes a value, inlining null/bool/small-int.
    pub fn from_value(v: Value) -> BoxedValue {
        match v.peel() {
            Value::Null => return BoxedValue::null(),
            Value::Bool(b) => return BoxedValue::bool(*b),
            Value::Int(i) => {
                if let Some(b) = BoxedValue::small_int(*i) {
                    return b;
                }
            }
            _ => {}
        }
        let boxed = Box::new(v.into_peeled());
        BoxedValue((Box::into_raw(boxed) as u64) | TAG_PTR)
    }

    /// Clones the value out without consuming the box (the Cranelift side
    /// may read the same slot more than once before it's freed).
    pub fn to_value(self) -> Value {
        match self.tag() {
            TAG_NULL => Value::Null,
            TAG_BOOL => Value::Bool((self.0 >> 3) & 1 == 1),
            TAG_SMALL_INT => Value::Int((self.0 as i64) >> 3),
            TAG_PTR => {
                let ptr = self.0 as *const Value;
                unsafe { (*ptr).clone() }
            }
            _ => unreachable!("invalid tag"),
        }
    }

    /// Consumes the box, taking ownership of the heap allocation if any.
    ///
    /// # Safety
    /// Must only be called once per heap-tagged raw value; calling it twice
    /// on the same pointer double-frees.
    pub unsafe fn into_value(self) -> Value {
        match self.tag() {
            TAG_NULL => Value::Null,
            TAG_BOOL => Value::Bool((self.0 >> 3) & 1 == 1),
            TAG_SMALL_INT => Value::Int((self.0 as i64) >> 3),
            TAG_PTR => {
                let ptr = self.0 as *mut Value;
                *Box::from_raw(ptr)
            }
            _ => unreachable!("invalid tag"),
        }
    }

    /// Frees the heap allocation behind a pointer-tagged raw value without
    /// returning it. No-op for inline tags.
    ///
    /// # Safety
    /// Must only be called once per heap-tagged raw value.
    pub unsafe fn free(self) {
        if self.is_ptr() && self.0 != 0 {
            drop(Box::from_raw(self.0 as *mut Value));
        }
    }
}

impl From<Value> for BoxedValue {
    fn from(v: Value) -> Self {
        BoxedValue::from_value(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_roundtrip() {
        let b = BoxedValue::from_value(Value::Null);
        assert_eq!(b.to_value(), Value::Null);
    }

    #[test]
    fn bool_roundtrip() {
        let b = BoxedValue::from_value(Value::Bool(true));
        assert_eq!(b.to_value(), Value::Bool(true));
    }

    #[test]
    fn small_int_roundtrip() {
        let b = BoxedValue::from_value(Value::Int(-42));
        assert!(!b.is_ptr());
        assert_eq!(b.to_value(), Value::Int(-42));
    }

    #[test]
    fn large_int_is_heap_boxed() {
        let b = BoxedValue::from_value(Value::Int(i64::MAX));
        assert!(b.is_ptr());
        assert_eq!(b.to_value(), Value::Int(i64::MAX));
        unsafe { b.free() };
    }

    #[test]
    fn string_round_trip_through_heap() {
        let b = BoxedValue::from_value(Value::string("hello"));
        assert_eq!(b.to_value(), Value::string("hello"));
        unsafe {
            assert_eq!(b.into_value(), Value::string("hello"));
        }
    }
}
