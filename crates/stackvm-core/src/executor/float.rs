//! Float-typed opcodes: push/pop/dup, arithmetic, comparison.

use super::{expect_reference, ExecContext, Executor};
use crate::command::Argument;
use crate::error::InputError;
use crate::value::{Value, ValueType};

pub mod handle {
    pub const PUSH_IMM: u64 = 0;
    pub const PUSH_REF: u64 = 1;
    pub const POP: u64 = 2;
    pub const DUP: u64 = 3;
    pub const ADD: u64 = 4;
    pub const SUB: u64 = 5;
    pub const MUL: u64 = 6;
    pub const DIV: u64 = 7;
    pub const CMP: u64 = 8;
}

pub struct FloatExecutor;

impl Executor for FloatExecutor {
    fn supported_type(&self) -> ValueType {
        ValueType::Float
    }

    fn execute(&self, cx: &mut ExecContext<'_>, handle: u64, arg: &Argument) -> Result<(), InputError> {
        match handle {
            handle::PUSH_IMM => {
                let v = match arg {
                    Argument::ImmediateValue(v) => *v,
                    other => {
                        return Err(crate::error::InternalError::WrongArgumentShape {
                            expected: "ImmediateValue",
                            found: arg_kind(other),
                        }
                        .into())
                    }
                };
                cx.mmu.stack_push(v)?;
            }
            handle::PUSH_REF => {
                let reference = expect_reference(arg)?;
                let resolved = crate::linker::resolve_or_undefined(cx.linker, cx.mmu, reference, false)?;
                let value = cx.linker.read_resolved(cx.mmu, resolved)?;
                cx.mmu.stack_push(value)?;
            }
            handle::POP => {
                cx.mmu.stack_pop()?;
            }
            handle::DUP => {
                let top = cx
                    .mmu
                    .get_stack_top()?
                    .ok_or(crate::error::InternalError::StackUnderflow)?;
                cx.mmu.stack_push(top)?;
            }
            handle::ADD | handle::SUB | handle::MUL | handle::DIV => {
                let rhs = as_f64(cx.mmu.stack_pop()?)?;
                let lhs = as_f64(cx.mmu.stack_pop()?)?;
                let result = match handle {
                    handle::ADD => lhs + rhs,
                    handle::SUB => lhs - rhs,
                    handle::MUL => lhs * rhs,
                    handle::DIV => lhs / rhs,
                    _ => unreachable!(),
                };
                cx.mmu.stack_push(Value::Float(result))?;
            }
            handle::CMP => {
                let rhs = as_f64(cx.mmu.stack_pop()?)?;
                let lhs = as_f64(cx.mmu.stack_pop()?)?;
                let result = if lhs < rhs {
                    -1.0
                } else if lhs > rhs {
                    1.0
                } else {
                    0.0
                };
                cx.mmu.stack_push(Value::Float(result))?;
            }
            other => return Err(crate::error::InternalError::UnknownOpcode(other as u32).into()),
        }
        Ok(())
    }
}

fn as_f64(v: Value) -> Result<f64, crate::error::InternalError> {
    match v {
        Value::Float(f) => Ok(f),
        Value::Integer(_) => Err(crate::error::InternalError::StackTypeMismatch {
            expected: ValueType::Float,
            found: ValueType::Integer,
        }),
        Value::None => Err(crate::error::InternalError::UninitializedValue),
    }
}

fn arg_kind(arg: &Argument) -> &'static str {
    match arg {
        Argument::None => "None",
        Argument::Reference(_) => "Reference",
        Argument::ImmediateValue(_) => "ImmediateValue",
        Argument::ImmediateIndex(_) => "ImmediateIndex",
    }
}
