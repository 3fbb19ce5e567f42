//! The fetch-execute loop. Dispatches one `Command` at a time through the
//! command set and the matching executor, mutating the MMU's current
//! context until it raises `EXIT` or its code runs out.
//!
//! Also implements shared-stack nested execution for the `call` opcode
//! (`stream_execute`): unlike the facade's top-level `Load(execute_stream
//! = true)`, which isolates the nested program in its own saved/cleared
//! context, a `call` runs the nested stream directly against the
//! *current* context so its pushed results land on the caller's stack.

use crate::command::Command;
use crate::commandset::CommandSet;
use crate::context::ContextFlags;
use crate::error::{InputResult, InternalError};
use crate::executor::{ExecContext, ExecutorSet, NestedLoader};
use crate::linker::Linker;
use crate::mmu::Mmu;
use crate::reader::{DecodeElement, DecodeResult};

/// Owns the opcode registry and the three typed executors. Stateless
/// beyond that; one instance is shared across every `Load` that runs
/// under the interpreter rather than the JIT.
pub struct Interpreter {
    pub commands: CommandSet,
    pub executors: ExecutorSet,
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter {
            commands: crate::commandset::standard(),
            executors: ExecutorSet::default(),
        }
    }
}

impl Interpreter {
    pub fn new(commands: CommandSet, executors: ExecutorSet) -> Self {
        Interpreter { commands, executors }
    }

    /// Run the current context from its current ip until `EXIT` is
    /// raised or ip runs past the end of code.
    pub fn run(&self, mmu: &mut Mmu, linker: &Linker, loader: Option<&dyn NestedLoader>) -> InputResult<()> {
        loop {
            let ctx = mmu.get_context()?;
            if ctx.flags.contains(ContextFlags::EXIT) || ctx.ip >= ctx.code.len() {
                return Ok(());
            }
            self.step(mmu, linker, loader)?;
        }
    }

    /// Fetch, decode and dispatch exactly one command at the current ip;
    /// advance ip by one unless the opcode itself repositioned it.
    fn step(&self, mmu: &mut Mmu, linker: &Linker, loader: Option<&dyn NestedLoader>) -> InputResult<()> {
        let ip_before = mmu.get_context()?.ip;
        let cmd = mmu.a_command(Some(ip_before))?.clone();
        self.dispatch_one(mmu, linker, loader, &cmd, ip_before)
    }

    fn dispatch_one(
        &self,
        mmu: &mut Mmu,
        linker: &Linker,
        loader: Option<&dyn NestedLoader>,
        cmd: &Command,
        ip_before: usize,
    ) -> InputResult<()> {
        self.commands.decode(cmd.opcode_id)?;
        let (executor_kind, handle) = match cmd.cached_handle {
            Some(cached) => cached,
            None => {
                let resolved = self
                    .commands
                    .get_execution_handle(cmd.opcode_id, cmd.value_type)?
                    .ok_or(InternalError::MissingExecutor {
                        opcode_id: cmd.opcode_id,
                        value_type: cmd.value_type,
                    })?;
                if let Ok(slot) = mmu.a_command_mut(Some(ip_before)) {
                    slot.cached_handle = Some(resolved);
                }
                resolved
            }
        };

        mmu.select_stack(cmd.value_type);
        let mut cx = ExecContext {
            mmu,
            linker,
            loader,
            interpreter: self,
        };
        self.executors.dispatch(executor_kind, &mut cx, handle, &cmd.arg)?;

        let ip_after = mmu.get_context()?.ip;
        if ip_after == ip_before {
            mmu.get_context_mut()?.ip = ip_before + 1;
        }
        Ok(())
    }
}

/// Run a fully-decoded nested stream against the *current* context,
/// sharing its operand stacks with the caller, without pushing or
/// clearing a context. Used by the `call` opcode; the top-level
/// `Load(execute_stream = true)` entry point instead calls
/// `save_context`/`clear_context` around a normal `Interpreter::run`.
///
/// Data elements in the stream are appended to the current context's
/// data section before the code runs, so `push_ref` arguments that point
/// at them resolve correctly; a bare command set with the nested
/// program's code is installed temporarily and the original code/ip
/// restored afterwards regardless of outcome.
pub fn stream_execute(
    cx: &mut ExecContext<'_>,
    interpreter: &Interpreter,
    stream: &[DecodeResult],
) -> InputResult<()> {
    let mut nested_code = Vec::with_capacity(stream.len());
    for decoded in stream {
        match &decoded.element {
            Some(DecodeElement::Command(cmd)) => nested_code.push(cmd.clone()),
            Some(DecodeElement::Data(value)) => {
                cx.mmu.insert_data(*value)?;
            }
            Some(DecodeElement::Nothing) | None => {}
        }
    }

    let (saved_code, saved_ip, saved_flags) = {
        let ctx = cx.mmu.get_context_mut()?;
        let saved_code = std::mem::replace(&mut ctx.code, nested_code);
        let saved_ip = std::mem::replace(&mut ctx.ip, 0);
        let saved_flags = ctx.flags;
        ctx.flags = ContextFlags::NO_FLAGS;
        (saved_code, saved_ip, saved_flags)
    };

    let result = interpreter.run(&mut *cx.mmu, cx.linker, cx.loader);

    let ctx = cx.mmu.get_context_mut()?;
    ctx.code = saved_code;
    ctx.ip = saved_ip;
    ctx.flags = saved_flags;

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Argument;
    use crate::commandset::ArgumentKind;
    use crate::executor::integer::handle as int_handle;
    use crate::value::{Value, ValueType};

    fn basic_interpreter() -> Interpreter {
        let mut commands = CommandSet::new();
        commands.register("push", ArgumentKind::ImmediateValue, None, Some(int_handle::PUSH_IMM), None);
        commands.register("add", ArgumentKind::None, None, Some(int_handle::ADD), None);
        Interpreter::new(commands, ExecutorSet::default())
    }

    #[test]
    fn runs_push_push_add_to_completion() {
        let interpreter = basic_interpreter();
        let mut mmu = Mmu::new();
        let linker = Linker::new();

        let push_id = interpreter.commands.opcode_of("push").unwrap();
        let add_id = interpreter.commands.opcode_of("add").unwrap();
        mmu.insert_text(Command::new(push_id, ValueType::Integer, Argument::ImmediateValue(Value::Integer(2))))
            .unwrap();
        mmu.insert_text(Command::new(push_id, ValueType::Integer, Argument::ImmediateValue(Value::Integer(3))))
            .unwrap();
        mmu.insert_text(Command::new(add_id, ValueType::Integer, Argument::None)).unwrap();

        mmu.select_stack(ValueType::Integer);
        interpreter.run(&mut mmu, &linker, None).unwrap();

        assert_eq!(mmu.get_stack_top().unwrap(), Some(Value::Integer(5)));
    }
}
