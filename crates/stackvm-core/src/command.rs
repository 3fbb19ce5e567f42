//! Decoded instruction records.

use crate::reference::Reference;
use crate::value::{Value, ValueType};

/// Which executor owns a cached dispatch handle, and the handle itself.
pub type CachedDispatch = (ValueType, u64);

/// The shape of a [`Command`]'s operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    None,
    Reference(Reference),
    ImmediateValue(Value),
    ImmediateIndex(u64),
}

/// A decoded instruction: an opcode, the value type selecting its operand
/// stack, and its argument. `cached_handle` is filled in by the
/// interpreter the first time a command executes, to skip the command
/// set lookup on subsequent visits (loops); it is never part of equality.
#[derive(Debug, Clone)]
pub struct Command {
    pub opcode_id: u32,
    pub value_type: ValueType,
    pub arg: Argument,
    pub cached_handle: Option<CachedDispatch>,
}

impl Command {
    pub fn new(opcode_id: u32, value_type: ValueType, arg: Argument) -> Self {
        Command {
            opcode_id,
            value_type,
            arg,
            cached_handle: None,
        }
    }
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.opcode_id == other.opcode_id
            && self.value_type == other.value_type
            && self.arg == other.arg
    }
}
