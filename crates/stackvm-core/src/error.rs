//! The typed error taxonomy of §7: internal-invariant violations, input
//! errors, and recoverable backend errors. `anyhow` is reserved for the
//! CLI boundary (see `stackvm-cli`); everything below this line threads
//! typed errors through `?`.

use thiserror::Error;

/// Category 1: a contract breach. Always fatal — it means a component
/// violated an invariant another component relies on.
#[derive(Debug, Error)]
pub enum InternalError {
    #[error("instruction pointer {ip} is past end of code buffer (len {len})")]
    IpOutOfRange { ip: usize, len: usize },

    #[error("no command set/executor binding for opcode {opcode_id} (value type {value_type:?})")]
    MissingExecutor { opcode_id: u32, value_type: crate::value::ValueType },

    #[error("unknown opcode id {0}")]
    UnknownOpcode(u32),

    #[error("duplicate section specified while resolving a reference")]
    DuplicateSection,

    #[error("no section specified to resolve an indirect address")]
    MissingIndirectionSection,

    #[error("wrong section on resolved reference: {0:?}")]
    WrongResultSection(crate::section::Section),

    #[error("reference has an unplaced (Definition) base at execution time")]
    UnplacedReference,

    #[error("operand stack underflow on the selected stack")]
    StackUnderflow,

    #[error("stack top type mismatch: expected {expected:?}, found {found:?}")]
    StackTypeMismatch { expected: crate::value::ValueType, found: crate::value::ValueType },

    #[error("attempted to restore the context stack below its floor")]
    ContextStackUnderflow,

    #[error("context id {0} does not exist")]
    NoSuchContext(usize),

    #[error("symbol hash {0:x} not found")]
    NoSuchSymbol(u64),

    #[error("cannot project an uninitialised (None) value to an ABI word")]
    UninitializedValue,

    #[error("the service value type carries no Value")]
    ServiceTypeHasNoValue,

    #[error("definition of a label in section {0:?} cannot be auto-assigned")]
    NonAllocatableSectionDefinition(crate::section::Section),

    #[error("opcode expected a {expected} argument, found {found}")]
    WrongArgumentShape { expected: &'static str, found: &'static str },

    #[error("no nested loader attached for a call-style opcode")]
    NoNestedLoader,
}

/// Category 2: a malformed stream, an undefined symbol, or a streaming-mode
/// protocol violation. Fatal for the `Load` in progress; the context
/// allocated for that `Load` is dropped.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("undefined symbol requested at runtime: \"{0}\"")]
    UndefinedSymbol(String),

    #[error("symbol redefinition: \"{name}\" (hash {hash:x})")]
    SymbolRedefinition { name: String, hash: u64 },

    #[error("symbol \"{0}\" left unplaced (Definition) at commit time")]
    UnplacedSymbolAtCommit(String),

    #[error("symbols are not allowed while streaming-executing a nested load")]
    SymbolInStreamingMode,

    #[error("non-command element decoded while streaming-executing a nested load")]
    NonCommandInStreamingMode,

    #[error("malformed section header: {0}")]
    MalformedSection(String),

    #[error("premature end of stream while reading a uniform section")]
    PrematureEof,

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error(transparent)]
    Internal(#[from] InternalError),
}

/// Category 3: a JIT compile/runtime failure. Always recoverable — the
/// facade catches it, marks the image not-OK, and falls back to the
/// interpreter.
#[derive(Debug, Error)]
pub enum JitError {
    #[error("opcode {0} has no x86-64 lowering")]
    Unsupported(u32),

    #[error("JIT execution faulted: {0}")]
    Fault(String),
}

pub type InternalResult<T> = Result<T, InternalError>;
pub type InputResult<T> = Result<T, InputError>;
pub type JitResult<T> = Result<T, JitError>;
