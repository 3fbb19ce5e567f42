//! The virtual-machine core: value/reference/symbol model, the MMU and
//! its context stack, the linker, the command set and its executors, the
//! interpreter, the JIT seam, and the facade that wires them together.
//!
//! Concrete collaborators (textual assembler, binary image codec, x86-64
//! JIT backend, CLI) live in sibling crates; this crate only specifies
//! and consumes their interfaces.

pub mod command;
pub mod commandset;
pub mod context;
pub mod error;
pub mod executor;
pub mod facade;
pub mod interpreter;
pub mod jit;
pub mod linker;
pub mod mmu;
pub mod reader;
pub mod reference;
pub mod section;
pub mod symbol;
pub mod value;

pub use command::{Argument, Command};
pub use commandset::{standard as standard_command_set, ArgumentKind, CommandSet, CommandTraits};
pub use context::{Context, ContextFlags, Stacks};
pub use error::{InputError, InputResult, InternalError, InternalResult, JitError, JitResult};
pub use executor::{ExecContext, Executor, ExecutorSet, NestedLoader};
pub use facade::{NestedPrograms, Runtime};
pub use interpreter::Interpreter;
pub use jit::{CompiledImage, JitBackend, JitCache};
pub use linker::{Linker, Offsets};
pub use mmu::Mmu;
pub use reader::{DecodeElement, DecodeResult, FileProperties, Reader, SectionType, Writer};
pub use reference::{Base, Component, DirectReference, Reference};
pub use section::Section;
pub use symbol::{hash_name, Symbol, SymbolMap};
pub use value::{Value, ValueType};
