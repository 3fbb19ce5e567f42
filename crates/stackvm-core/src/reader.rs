//! Collaborator interfaces consumed by `Load`: the reader reads a
//! section-framed external representation; decoded non-uniform elements
//! flow back through [`DecodeResult`]. Concrete implementations
//! (textual assembler, binary image codec) live in `stackvm-asm` and
//! `stackvm-image`; this crate only specifies the contract they satisfy.

use crate::command::Command;
use crate::error::InputResult;
use crate::symbol::SymbolMap;
use crate::value::Value;

/// Section kinds a persisted program is framed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionType {
    CodeImage,
    DataImage,
    StackImage,
    SymbolMap,
    NonUniform,
}

/// One decoded element of a `NonUniform` section: either a `Command` or a
/// data value, paired with the symbols mentioned while producing it.
#[derive(Debug, Clone)]
pub enum DecodeElement {
    Command(Command),
    Data(Value),
    /// Signals a clean end of the decodable stream (not an error).
    Nothing,
}

#[derive(Debug, Clone, Default)]
pub struct DecodeResult {
    pub element: Option<DecodeElement>,
    pub mentioned_symbols: SymbolMap,
    /// Symbol names referenced (not necessarily defined) while producing
    /// this element. Diagnostic-only: never consulted by the linker, kept
    /// so a runtime "undefined symbol" error can name the symbol instead
    /// of just its hash.
    pub referenced_names: Vec<(u64, String)>,
}

/// Opaque per-stream bookkeeping a reader hands back from `setup` and
/// expects again on every subsequent call, mirroring the source's
/// `FileProperties`. Readers are free to put whatever they need in here.
pub trait FileProperties {}

/// Reads a section-framed external representation. `setup`/`reset` bracket
/// the stream's lifetime; callers must invoke `reset` on every exit path
/// (the default CLI/facade wiring does this with a guard, not manual
/// balancing, since Rust has `Drop`).
pub trait Reader {
    /// Advance past the next section header; `Ok(None)` at end of stream.
    fn next_section(&mut self) -> InputResult<Option<(SectionType, usize, usize)>>;

    /// Read a uniform section's raw bytes (`byte_count` long) and decode
    /// them into the buffer appropriate for `SectionType`. Returns the
    /// number of elements actually read.
    fn read_code_image(&mut self, byte_count: usize) -> InputResult<Vec<Command>>;
    fn read_data_image(&mut self, byte_count: usize) -> InputResult<Vec<Value>>;
    fn read_stack_image(&mut self, byte_count: usize) -> InputResult<Vec<Value>>;
    fn read_symbol_map(&mut self, byte_count: usize) -> InputResult<SymbolMap>;

    /// Read one element of a `NonUniform` section.
    fn read_stream(&mut self) -> InputResult<DecodeResult>;
}

/// Serializes a context to an external representation.
pub trait Writer {
    fn write_code_image(&mut self, code: &[Command]) -> InputResult<()>;
    fn write_data_image(&mut self, data: &[Value]) -> InputResult<()>;
    fn write_stack_image(&mut self, stack: &[Value]) -> InputResult<()>;
    fn write_symbol_map(&mut self, symbols: &SymbolMap) -> InputResult<()>;
}
