//! The tagged scalar that flows through every stack, data slot and ABI
//! boundary in the runtime.

use crate::error::InternalError;

/// Tag identifying which variant of [`Value`] is inhabited, and which
/// per-type operand stack a command selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Integer,
    Float,
    /// Type-agnostic opcodes (jumps, exit, calls) select no stack of their
    /// own; they dispatch through the service executor instead.
    Service,
}

/// A tagged scalar with variants `{Integer, Float}` plus a distinguished
/// "no type" used only on uninitialised slots.
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(clippy::derive_partial_eq_without_eq)] // `f64` forbids a derived `Eq`
pub enum Value {
    None,
    Integer(i64),
    Float(f64),
}

impl Value {
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::None => None,
            Value::Integer(_) => Some(ValueType::Integer),
            Value::Float(_) => Some(ValueType::Float),
        }
    }

    /// Project this value onto a fixed-width ABI word, losslessly for
    /// whichever variant is currently inhabited.
    ///
    /// `Integer` is bit-identical to its `i64` payload; `Float` is
    /// reinterpreted through its bit pattern so the word survives a trip
    /// through a native register untouched.
    pub fn to_abi_word(self) -> Result<i64, InternalError> {
        match self {
            Value::Integer(v) => Ok(v),
            Value::Float(v) => Ok(v.to_bits() as i64),
            Value::None => Err(InternalError::UninitializedValue),
        }
    }

    /// Load an ABI word back into a typed `Value`, given the type tag the
    /// caller promises the word was produced under.
    pub fn from_abi_word(word: i64, ty: ValueType) -> Result<Value, InternalError> {
        match ty {
            ValueType::Integer => Ok(Value::Integer(word)),
            ValueType::Float => Ok(Value::Float(f64::from_bits(word as u64))),
            ValueType::Service => Err(InternalError::ServiceTypeHasNoValue),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_roundtrips_through_abi_word() {
        let v = Value::Integer(-42);
        let w = v.to_abi_word().unwrap();
        assert_eq!(Value::from_abi_word(w, ValueType::Integer).unwrap(), v);
    }

    #[test]
    fn float_roundtrips_through_abi_word() {
        let v = Value::Float(3.5);
        let w = v.to_abi_word().unwrap();
        assert_eq!(Value::from_abi_word(w, ValueType::Float).unwrap(), v);
    }

    #[test]
    fn none_cannot_project_to_abi_word() {
        assert!(Value::None.to_abi_word().is_err());
    }
}
