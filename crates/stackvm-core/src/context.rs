//! A self-contained execution frame: code, data, stacks, symbols, ip and
//! flags.

use bitflags::bitflags;

use crate::command::Command;
use crate::symbol::SymbolMap;
use crate::value::Value;

bitflags! {
    /// Per-context flag bits. `EXIT` requests that the interpreter pop this
    /// context; `NO_FLAGS` is the initial state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContextFlags: u32 {
        const NO_FLAGS = 0;
        const EXIT = 1 << 0;
    }
}

/// The two independent operand stacks a [`Context`] owns, one per
/// value-bearing [`crate::value::ValueType`].
#[derive(Debug, Clone, Default)]
pub struct Stacks {
    pub integer: Vec<Value>,
    pub float: Vec<Value>,
}

impl Stacks {
    fn clear(&mut self) {
        self.integer.clear();
        self.float.clear();
    }
}

/// `{id, ip, flags, code, data, stacks, symbols}` as specified in §3.
#[derive(Debug, Clone)]
pub struct Context {
    pub id: usize,
    pub ip: usize,
    pub flags: ContextFlags,
    pub code: Vec<Command>,
    pub data: Vec<Value>,
    pub stacks: Stacks,
    pub symbols: SymbolMap,
}

impl Context {
    pub fn new(id: usize) -> Self {
        Context {
            id,
            ip: 0,
            flags: ContextFlags::NO_FLAGS,
            code: Vec::new(),
            data: Vec::new(),
            stacks: Stacks::default(),
            symbols: SymbolMap::default(),
        }
    }

    /// Reset ip, flags and operand stacks; preserve code, data and
    /// symbols. Used by `clear_context` and by `Load`'s streaming mode
    /// (after `save_context` duplicates the header).
    pub(crate) fn clear_volatile(&mut self) {
        self.ip = 0;
        self.flags = ContextFlags::NO_FLAGS;
        self.stacks.clear();
    }

    /// Drop code, data and symbols; keep the slot (id, ip, flags as they
    /// stood) allocated.
    pub(crate) fn reset_buffers(&mut self) {
        self.code.clear();
        self.data.clear();
        self.symbols.clear();
    }
}
