//! Polymorphic opcode implementations, one per value type plus the
//! type-agnostic "service" executor.

pub(crate) mod float;
pub(crate) mod integer;
pub(crate) mod service;

pub use float::FloatExecutor;
pub use integer::IntegerExecutor;
pub use service::{NestedLoader, ServiceExecutor};

use crate::command::Argument;
use crate::error::{InputError, InternalResult};
use crate::linker::Linker;
use crate::mmu::Mmu;
use crate::value::ValueType;

/// Everything an opcode implementation is allowed to touch: the MMU
/// (through which it reads/writes the selected stack and its own ip and
/// flags) and the linker (to resolve `Reference` arguments). A nested
/// loader is attached only when a `call`-style opcode needs to
/// stream-execute another program, mirroring the facade's own
/// `Load(execute_stream = true)` path.
pub struct ExecContext<'a> {
    pub mmu: &'a mut Mmu,
    pub linker: &'a Linker,
    pub loader: Option<&'a dyn NestedLoader>,
    /// Lets the service executor recurse into `stream_execute` for a
    /// `call` opcode without the executor owning an interpreter itself.
    pub interpreter: &'a crate::interpreter::Interpreter,
}

/// One executor per value type, plus one `Service` executor for
/// type-agnostic opcodes. Executors are stateless between calls; all
/// mutable state lives in the MMU.
pub trait Executor {
    fn supported_type(&self) -> ValueType;
    fn execute(&self, cx: &mut ExecContext<'_>, handle: u64, arg: &Argument) -> Result<(), InputError>;
}

/// The three executor implementations, keyed by the value type they
/// claim. Replaces the source's opaque-handle indirection: dispatch is a
/// `ValueType`-keyed lookup into this table, as proposed in the design
/// notes (§9).
pub struct ExecutorSet {
    pub integer: IntegerExecutor,
    pub float: FloatExecutor,
    pub service: ServiceExecutor,
}

impl Default for ExecutorSet {
    fn default() -> Self {
        ExecutorSet {
            integer: IntegerExecutor,
            float: FloatExecutor,
            service: ServiceExecutor,
        }
    }
}

impl ExecutorSet {
    pub fn dispatch(
        &self,
        kind: ValueType,
        cx: &mut ExecContext<'_>,
        handle: u64,
        arg: &Argument,
    ) -> Result<(), InputError> {
        match kind {
            ValueType::Integer => self.integer.execute(cx, handle, arg),
            ValueType::Float => self.float.execute(cx, handle, arg),
            ValueType::Service => self.service.execute(cx, handle, arg),
        }
    }
}

pub(crate) fn expect_reference(arg: &Argument) -> InternalResult<&crate::reference::Reference> {
    match arg {
        Argument::Reference(r) => Ok(r),
        other => Err(crate::error::InternalError::WrongArgumentShape {
            expected: "Reference",
            found: argument_kind_name(other),
        }),
    }
}

fn argument_kind_name(arg: &Argument) -> &'static str {
    match arg {
        Argument::None => "None",
        Argument::Reference(_) => "Reference",
        Argument::ImmediateValue(_) => "ImmediateValue",
        Argument::ImmediateIndex(_) => "ImmediateIndex",
    }
}
