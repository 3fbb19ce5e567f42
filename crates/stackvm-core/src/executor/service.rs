//! Type-agnostic control-flow opcodes: conditional/unconditional jump,
//! exit, and `call` (stream-execute a nested program against the
//! current context's stacks).

use super::{expect_reference, ExecContext, Executor};
use crate::command::Argument;
use crate::context::ContextFlags;
use crate::error::{InputError, InputResult, InternalError};
use crate::reader::DecodeResult;
use crate::value::{Value, ValueType};

pub mod handle {
    pub const JMP: u64 = 0;
    pub const JMP_IF_ZERO: u64 = 1;
    pub const JMP_IF_NOT_ZERO: u64 = 2;
    pub const CALL: u64 = 3;
    pub const EXIT: u64 = 4;
}

/// Supplies the fully-decoded element stream of a nested program named
/// by a `call` opcode's `ImmediateIndex`. Implemented by the facade,
/// which owns the registry of loaded nested programs (see
/// `Facade::register_nested`).
pub trait NestedLoader {
    fn decode_all(&self, index: u64) -> InputResult<Vec<DecodeResult>>;
}

pub struct ServiceExecutor;

impl Executor for ServiceExecutor {
    fn supported_type(&self) -> ValueType {
        ValueType::Service
    }

    fn execute(&self, cx: &mut ExecContext<'_>, handle: u64, arg: &Argument) -> Result<(), InputError> {
        match handle {
            handle::EXIT => {
                let ctx = cx.mmu.get_context_mut()?;
                ctx.flags |= ContextFlags::EXIT;
            }
            handle::JMP => {
                let target = resolve_code_address(cx, arg)?;
                cx.mmu.get_context_mut()?.ip = target;
                return Ok(()); // the interpreter's normal ip += 1 must be skipped by the caller
            }
            handle::JMP_IF_ZERO | handle::JMP_IF_NOT_ZERO => {
                let top = as_predicate(cx.mmu.stack_pop()?)?;
                let take_branch = (handle == handle::JMP_IF_ZERO) == (top == 0.0);
                if take_branch {
                    let target = resolve_code_address(cx, arg)?;
                    cx.mmu.get_context_mut()?.ip = target;
                    return Ok(());
                }
            }
            handle::CALL => {
                let index = match arg {
                    Argument::ImmediateIndex(i) => *i,
                    other => {
                        return Err(InternalError::WrongArgumentShape {
                            expected: "ImmediateIndex",
                            found: argument_kind(other),
                        }
                        .into())
                    }
                };
                let loader = cx.loader.ok_or(InternalError::NoNestedLoader)?;
                let stream = loader.decode_all(index)?;
                let interpreter = cx.interpreter;
                crate::interpreter::stream_execute(cx, interpreter, &stream)?;
            }
            other => return Err(InternalError::UnknownOpcode(other as u32).into()),
        }
        Ok(())
    }
}

/// `JMP`/`JMP_IF_*` targets are required to be simple `Code`-section
/// references resolved to a concrete address, never indirected through
/// a data load.
fn resolve_code_address(cx: &mut ExecContext<'_>, arg: &Argument) -> Result<usize, InputError> {
    let reference = expect_reference(arg)?;
    let resolved = crate::linker::resolve_or_undefined(cx.linker, cx.mmu, reference, false)?;
    if resolved.section != crate::section::Section::Code {
        return Err(InternalError::WrongResultSection(resolved.section).into());
    }
    usize::try_from(resolved.address)
        .map_err(|_| InternalError::WrongResultSection(resolved.section).into())
}

fn as_predicate(v: Value) -> Result<f64, InternalError> {
    match v {
        Value::Integer(i) => Ok(i as f64),
        Value::Float(f) => Ok(f),
        Value::None => Err(InternalError::UninitializedValue),
    }
}

fn argument_kind(arg: &Argument) -> &'static str {
    match arg {
        Argument::None => "None",
        Argument::Reference(_) => "Reference",
        Argument::ImmediateValue(_) => "ImmediateValue",
        Argument::ImmediateIndex(_) => "ImmediateIndex",
    }
}
