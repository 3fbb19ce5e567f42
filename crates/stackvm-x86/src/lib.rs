//! A JIT backend lowering a context's integer-stack code to native
//! x86-64, behind the `stackvm_core::jit::{JitBackend, CompiledImage}`
//! seam. Grounded on `original_source/backend_x86/Insn.h`'s instruction
//! builder ([`insn`]) and compiled in a two-pass layout/emit scheme
//! ([`codegen`]) that exploits the fact that every VM jump target is a
//! `Vec<Command>` index, never a byte offset.
//!
//! Scope: the integer stack only. `div` (a hardware `idiv`-by-zero traps
//! rather than raising the VM's own graceful error), `push_ref` and
//! `call` (need linker/nested-loader access `JitBackend::compile` isn't
//! given), and anything on the float stack all bail with
//! `JitError::Unsupported`; the facade's `exec` falls back to the
//! interpreter whenever that happens, per §4.6.

mod codegen;
mod insn;

use std::ffi::c_void;

use rustix::mm::{mmap_anonymous, mprotect, MapFlags, MprotectFlags, ProtFlags};

use stackvm_core::commandset::CommandSet;
use stackvm_core::context::ContextFlags;
use stackvm_core::error::JitError;
use stackvm_core::jit::{CompiledImage, JitBackend};
use stackvm_core::mmu::Mmu;
use stackvm_core::value::{Value, ValueType};
use stackvm_core::JitResult;

use codegen::{compile_program, CompiledProgram, Opcodes};

/// A handful of fixed i64 slots the JIT runs a context's integer stack
/// in. A real backend would grow this on overflow or fall back to the
/// interpreter; this one simply refuses to compile a context whose
/// current stack already exceeds it, which `JitError::Fault` turns into
/// an interpreter fallback per the facade's contract.
const STACK_SLOTS: usize = 64 * 1024;

/// The fields the compiled function body reads and writes through `rdi`.
/// Field order fixes the displacement constants baked into every
/// `codegen` emission site (`0`, `8`, `16`) — changing it without
/// updating `codegen.rs` silently corrupts every compiled image.
#[repr(C)]
struct NativeState {
    stack_ptr: *mut i64,
    final_ip: i64,
    exit_flag: i64,
}

/// An executable anonymous mapping holding one compiled function body.
/// Written with `PROT_READ | PROT_WRITE`, then switched to
/// `PROT_READ | PROT_EXEC` once the bytes are in place — never
/// simultaneously writable and executable.
struct ExecutableBuffer {
    ptr: *mut c_void,
    len: usize,
}

impl ExecutableBuffer {
    fn from_bytes(bytes: &[u8]) -> JitResult<Self> {
        let len = bytes.len().max(1);
        let ptr = unsafe {
            mmap_anonymous(std::ptr::null_mut(), len, ProtFlags::READ | ProtFlags::WRITE, MapFlags::PRIVATE)
        }
        .map_err(|e| JitError::Fault(format!("mmap of {len} bytes failed: {e}")))?;

        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
            mprotect(ptr, len, MprotectFlags::READ | MprotectFlags::EXEC)
        }
        .map_err(|e| JitError::Fault(format!("mprotect of {len} bytes failed: {e}")))?;

        Ok(ExecutableBuffer { ptr, len })
    }

    fn addr(&self) -> usize {
        self.ptr as usize
    }
}

impl Drop for ExecutableBuffer {
    fn drop(&mut self) {
        unsafe {
            let _ = rustix::mm::munmap(self.ptr, self.len);
        }
    }
}

/// One compiled context: the executable mapping plus the VM-ip ->
/// native-byte-offset table `invoke` uses to resume at the context's
/// current `ip` rather than always at instruction zero.
pub struct X86Image {
    mem: ExecutableBuffer,
    entry_offsets: Vec<usize>,
}

impl CompiledImage for X86Image {
    fn invoke(&self, mmu: &mut Mmu) -> JitResult<()> {
        let ctx = mmu.get_context().map_err(|e| JitError::Fault(e.to_string()))?;
        let ip = ctx.ip;
        let entry_offset = *self
            .entry_offsets
            .get(ip)
            .ok_or_else(|| JitError::Fault(format!("ip {ip} out of range for compiled image")))?;
        let existing_len = ctx.stacks.integer.len();
        if existing_len > STACK_SLOTS {
            return Err(JitError::Fault("operand stack exceeds the x86 backend's fixed buffer".into()));
        }

        let mut stack_buf = vec![0i64; STACK_SLOTS];
        for (slot, value) in stack_buf.iter_mut().zip(ctx.stacks.integer.iter()) {
            *slot = value.to_abi_word().map_err(|e| JitError::Fault(e.to_string()))?;
        }

        let mut state = NativeState {
            stack_ptr: unsafe { stack_buf.as_mut_ptr().add(existing_len) },
            final_ip: 0,
            exit_flag: 0,
        };

        let entry_addr = self.mem.addr() + entry_offset;
        // SAFETY: `self.mem` holds an executable mapping produced by
        // `compile_program`/`ExecutableBuffer::from_bytes` for exactly
        // this function signature; `entry_addr` is one of its own
        // recorded instruction-start offsets.
        let func: extern "C" fn(*mut NativeState, usize) -> i64 = unsafe { std::mem::transmute(self.mem.addr()) };
        func(&mut state, entry_addr);

        let final_sp = unsafe { state.stack_ptr.offset_from(stack_buf.as_ptr()) };
        if final_sp < 0 || final_sp as usize > STACK_SLOTS {
            return Err(JitError::Fault("native stack pointer left its buffer".into()));
        }
        let final_len = final_sp as usize;
        let mut rebuilt = Vec::with_capacity(final_len);
        for word in &stack_buf[..final_len] {
            rebuilt.push(Value::from_abi_word(*word, ValueType::Integer).map_err(|e| JitError::Fault(e.to_string()))?);
        }

        let final_ip = usize::try_from(state.final_ip).map_err(|_| JitError::Fault("final ip overflow".into()))?;
        let ctx = mmu.get_context_mut().map_err(|e| JitError::Fault(e.to_string()))?;
        ctx.stacks.integer = rebuilt;
        ctx.ip = final_ip;
        if state.exit_flag != 0 {
            ctx.flags |= ContextFlags::EXIT;
        }
        Ok(())
    }
}

/// Compiles a context's integer-stack code to x86-64, one
/// [`X86Image`] per `Mmu::checksum_state`, via [`codegen::compile_program`].
pub struct X86Backend {
    opcodes: Opcodes,
}

impl X86Backend {
    pub fn new(commands: &CommandSet) -> Self {
        X86Backend { opcodes: Opcodes::capture(commands) }
    }
}

impl JitBackend for X86Backend {
    fn compile(&self, mmu: &Mmu) -> JitResult<Box<dyn CompiledImage>> {
        let program: CompiledProgram = compile_program(mmu, &self.opcodes)?;
        tracing::debug!(bytes = program.code.len(), instructions = program.entry_offsets.len() - 1, "compiled x86-64 image");
        let mem = ExecutableBuffer::from_bytes(&program.code)?;
        Ok(Box::new(X86Image { mem, entry_offsets: program.entry_offsets }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackvm_core::command::{Argument, Command};
    use stackvm_core::commandset::standard;
    use stackvm_core::mmu::Mmu;
    use stackvm_core::value::ValueType;

    #[test]
    fn compiles_and_runs_a_straight_line_program() {
        let commands = standard();
        let push_id = commands.opcode_of("push_imm").unwrap();
        let add_id = commands.opcode_of("add").unwrap();
        let exit_id = commands.opcode_of("exit").unwrap();

        let mut mmu = Mmu::new();
        mmu.insert_text(Command::new(push_id, ValueType::Integer, Argument::ImmediateValue(Value::Integer(2))))
            .unwrap();
        mmu.insert_text(Command::new(push_id, ValueType::Integer, Argument::ImmediateValue(Value::Integer(3))))
            .unwrap();
        mmu.insert_text(Command::new(add_id, ValueType::Integer, Argument::None)).unwrap();
        mmu.insert_text(Command::new(exit_id, ValueType::Integer, Argument::None)).unwrap();
        mmu.select_stack(ValueType::Integer);

        let backend = X86Backend::new(&commands);
        let image = backend.compile(&mmu).unwrap();
        image.invoke(&mut mmu).unwrap();

        assert_eq!(mmu.get_stack_top().unwrap(), Some(Value::Integer(5)));
        assert!(mmu.get_context().unwrap().flags.contains(ContextFlags::EXIT));
    }

    #[test]
    fn div_falls_back_with_an_unsupported_error() {
        let commands = standard();
        let div_id = commands.opcode_of("div").unwrap();
        let mut mmu = Mmu::new();
        mmu.insert_text(Command::new(div_id, ValueType::Integer, Argument::None)).unwrap();

        let backend = X86Backend::new(&commands);
        assert!(matches!(backend.compile(&mmu), Err(JitError::Unsupported(_))));
    }
}
