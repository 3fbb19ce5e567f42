//! Integer-typed opcodes: push/pop/dup, arithmetic, comparison.

use super::{expect_reference, ExecContext, Executor};
use crate::command::Argument;
use crate::error::InputError;
use crate::value::{Value, ValueType};

/// Handles this executor understands. Opaque to the command set; it only
/// ever echoes back whatever was registered for a given opcode.
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

pub struct IntegerExecutor;

impl Executor for IntegerExecutor {
    fn supported_type(&self) -> ValueType {
        ValueType::Integer
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
                let rhs = as_i64(cx.mmu.stack_pop()?)?;
                let lhs = as_i64(cx.mmu.stack_pop()?)?;
                let result = match handle {
                    handle::ADD => lhs.wrapping_add(rhs),
                    handle::SUB => lhs.wrapping_sub(rhs),
                    handle::MUL => lhs.wrapping_mul(rhs),
                    handle::DIV => lhs
                        .checked_div(rhs)
                        .ok_or_else(|| InputError::Parse {
                            line: 0,
                            message: "integer division by zero".to_string(),
                        })?,
                    _ => unreachable!(),
                };
                cx.mmu.stack_push(Value::Integer(result))?;
            }
            handle::CMP => {
                let rhs = as_i64(cx.mmu.stack_pop()?)?;
                let lhs = as_i64(cx.mmu.stack_pop()?)?;
                let result = match lhs.cmp(&rhs) {
                    std::cmp::Ordering::Less => -1,
                    std::cmp::Ordering::Equal => 0,
                    std::cmp::Ordering::Greater => 1,
                };
                cx.mmu.stack_push(Value::Integer(result))?;
            }
            other => return Err(crate::error::InternalError::UnknownOpcode(other as u32).into()),
        }
        Ok(())
    }
}

fn as_i64(v: Value) -> Result<i64, crate::error::InternalError> {
    match v {
        Value::Integer(i) => Ok(i),
        Value::Float(_) => Err(crate::error::InternalError::StackTypeMismatch {
            expected: ValueType::Integer,
            found: ValueType::Float,
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
