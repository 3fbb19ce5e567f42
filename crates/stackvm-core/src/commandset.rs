//! Opcode registry: mnemonic <-> opcode id, and (opcode, executor) ->
//! dispatch handle.

use indexmap::IndexMap;

use crate::error::{InternalError, InternalResult};
use crate::value::ValueType;

/// Which kind of operand a given opcode expects, for the textual
/// assembler and for diagnostics. Does not affect dispatch; dispatch goes
/// through [`crate::command::Argument`] at the `Command` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentKind {
    None,
    Reference,
    ImmediateValue,
    ImmediateIndex,
}

/// Static traits of a decoded opcode, independent of the value type it is
/// invoked with.
#[derive(Debug, Clone)]
pub struct CommandTraits {
    pub mnemonic: &'static str,
    pub is_service_command: bool,
    pub argument_kind: ArgumentKind,
}

struct Entry {
    traits: CommandTraits,
    /// Handles keyed by the executor requesting dispatch for this opcode.
    /// `None` means that executor does not implement this opcode. The
    /// service slot (index 0) is tried before the value-typed slots.
    service_handle: Option<u64>,
    integer_handle: Option<u64>,
    float_handle: Option<u64>,
}

/// Maps mnemonic -> opcode id and (opcode, executor) -> execution handle.
pub struct CommandSet {
    by_mnemonic: IndexMap<&'static str, u32>,
    entries: Vec<Entry>,
}

impl Default for CommandSet {
    fn default() -> Self {
        CommandSet::new()
    }
}

impl CommandSet {
    pub fn new() -> Self {
        CommandSet {
            by_mnemonic: IndexMap::new(),
            entries: Vec::new(),
        }
    }

    /// Register an opcode. `service_handle` is tried first by
    /// [`CommandSet::get_execution_handle`]; at least one of
    /// `service_handle` or the two value-typed handles must be `Some` per
    /// the contract in §4.2.
    pub fn register(
        &mut self,
        mnemonic: &'static str,
        argument_kind: ArgumentKind,
        service_handle: Option<u64>,
        integer_handle: Option<u64>,
        float_handle: Option<u64>,
    ) -> u32 {
        let opcode_id = self.entries.len() as u32;
        let is_service_command = service_handle.is_some();
        self.entries.push(Entry {
            traits: CommandTraits {
                mnemonic,
                is_service_command,
                argument_kind,
            },
            service_handle,
            integer_handle,
            float_handle,
        });
        self.by_mnemonic.insert(mnemonic, opcode_id);
        opcode_id
    }

    pub fn decode(&self, opcode_id: u32) -> InternalResult<&CommandTraits> {
        self.entries
            .get(opcode_id as usize)
            .map(|e| &e.traits)
            .ok_or(InternalError::UnknownOpcode(opcode_id))
    }

    /// Return an opaque handle the named executor will use to dispatch
    /// this opcode, along with which executor kind owns that handle.
    /// `Service` is tried first, mirroring the original resolution order
    /// ("service slot first"); a `None` return means no executor claiming
    /// `stack_type` implements this opcode.
    pub fn get_execution_handle(
        &self,
        opcode_id: u32,
        stack_type: ValueType,
    ) -> InternalResult<Option<(ValueType, u64)>> {
        let entry = self
            .entries
            .get(opcode_id as usize)
            .ok_or(InternalError::UnknownOpcode(opcode_id))?;
        if let Some(h) = entry.service_handle {
            return Ok(Some((ValueType::Service, h)));
        }
        Ok(match stack_type {
            ValueType::Service => None,
            ValueType::Integer => entry.integer_handle.map(|h| (ValueType::Integer, h)),
            ValueType::Float => entry.float_handle.map(|h| (ValueType::Float, h)),
        })
    }

    pub fn mnemonic_of(&self, opcode_id: u32) -> InternalResult<&'static str> {
        Ok(self.decode(opcode_id)?.mnemonic)
    }

    pub fn opcode_of(&self, mnemonic: &str) -> Option<u32> {
        self.by_mnemonic.get(mnemonic).copied()
    }

    pub fn reset(&mut self) {
        self.by_mnemonic.clear();
        self.entries.clear();
    }
}

/// The fixed opcode table every `Runtime` registers by default: value-typed
/// stack/arithmetic/comparison ops served identically by the integer and
/// float executors, plus the type-agnostic service ops.
pub fn standard() -> CommandSet {
    use crate::executor::{float::handle as f, integer::handle as i, service::handle as s};

    let mut set = CommandSet::new();
    set.register("push_imm", ArgumentKind::ImmediateValue, None, Some(i::PUSH_IMM), Some(f::PUSH_IMM));
    set.register("push_ref", ArgumentKind::Reference, None, Some(i::PUSH_REF), Some(f::PUSH_REF));
    set.register("pop", ArgumentKind::None, None, Some(i::POP), Some(f::POP));
    set.register("dup", ArgumentKind::None, None, Some(i::DUP), Some(f::DUP));
    set.register("add", ArgumentKind::None, None, Some(i::ADD), Some(f::ADD));
    set.register("sub", ArgumentKind::None, None, Some(i::SUB), Some(f::SUB));
    set.register("mul", ArgumentKind::None, None, Some(i::MUL), Some(f::MUL));
    set.register("div", ArgumentKind::None, None, Some(i::DIV), Some(f::DIV));
    set.register("cmp", ArgumentKind::None, None, Some(i::CMP), Some(f::CMP));
    set.register("jmp", ArgumentKind::Reference, Some(s::JMP), None, None);
    set.register("jmp_if_zero", ArgumentKind::Reference, Some(s::JMP_IF_ZERO), None, None);
    set.register("jmp_if_not_zero", ArgumentKind::Reference, Some(s::JMP_IF_NOT_ZERO), None, None);
    set.register("call", ArgumentKind::ImmediateIndex, Some(s::CALL), None, None);
    set.register("exit", ArgumentKind::None, Some(s::EXIT), None, None);
    set
}

#[cfg(test)]
mod standard_tests {
    use super::*;

    #[test]
    fn standard_table_round_trips_every_mnemonic() {
        let set = standard();
        for mnemonic in [
            "push_imm", "push_ref", "pop", "dup", "add", "sub", "mul", "div", "cmp", "jmp",
            "jmp_if_zero", "jmp_if_not_zero", "call", "exit",
        ] {
            let id = set.opcode_of(mnemonic).unwrap_or_else(|| panic!("missing {mnemonic}"));
            assert_eq!(set.mnemonic_of(id).unwrap(), mnemonic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonic_and_opcode_round_trip() {
        let mut set = CommandSet::new();
        let id = set.register("add", ArgumentKind::None, None, Some(1), Some(1));
        assert_eq!(set.mnemonic_of(id).unwrap(), "add");
        assert_eq!(set.opcode_of("add"), Some(id));
    }

    #[test]
    fn service_slot_is_tried_first() {
        let mut set = CommandSet::new();
        let id = set.register("exit", ArgumentKind::None, Some(9), None, None);
        assert_eq!(
            set.get_execution_handle(id, ValueType::Integer).unwrap(),
            Some((ValueType::Service, 9))
        );
    }

    #[test]
    fn unknown_opcode_is_an_internal_error() {
        let set = CommandSet::new();
        assert!(set.decode(0).is_err());
    }
}
