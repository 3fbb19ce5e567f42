//! Lowers a context's code section to a single flat x86-64 function body.
//!
//! Every VM instruction index is also the address the linker hands out
//! for `Section::Code` (see `stackvm_core::linker`'s `Offsets::code`, a
//! running count of `insert_text` calls) — there are no byte offsets in
//! the VM's own address space. This backend therefore runs two passes
//! over a context's code: the first emits into a throwaway buffer purely
//! to learn each instruction's native byte offset, the second re-emits
//! for real, now able to compute the `rel32` displacement of every
//! `jmp`/`jmp_if_zero`/`jmp_if_not_zero`/`exit` against the offsets the
//! first pass recorded. Everything else (arithmetic, `cmp`'s branchy
//! `-1`/`0`/`1`, `push_imm`, `pop`, `dup`) is local to one instruction and
//! needs no cross-pass bookkeeping.

use stackvm_core::command::{Argument, Command};
use stackvm_core::commandset::CommandSet;
use stackvm_core::error::JitError;
use stackvm_core::linker::Linker;
use stackvm_core::mmu::Mmu;
use stackvm_core::section::Section;
use stackvm_core::value::{Value, ValueType};

use crate::insn::{self, cc, reg};

type Result<T> = std::result::Result<T, JitError>;

/// Opcode ids for the mnemonics this backend knows how to lower, captured
/// once from the `CommandSet` the runtime was built with. A mnemonic
/// absent from that set is given a sentinel id that no real `Command`
/// will ever carry, so it simply never matches in [`classify`].
pub(crate) struct Opcodes {
    push_imm: u32,
    pop: u32,
    dup: u32,
    add: u32,
    sub: u32,
    mul: u32,
    cmp: u32,
    jmp: u32,
    jmp_if_zero: u32,
    jmp_if_not_zero: u32,
    exit: u32,
}

const NEVER: u32 = u32::MAX;

impl Opcodes {
    pub(crate) fn capture(commands: &CommandSet) -> Self {
        let get = |mnemonic: &str| commands.opcode_of(mnemonic).unwrap_or(NEVER);
        Opcodes {
            push_imm: get("push_imm"),
            pop: get("pop"),
            dup: get("dup"),
            add: get("add"),
            sub: get("sub"),
            mul: get("mul"),
            cmp: get("cmp"),
            jmp: get("jmp"),
            jmp_if_zero: get("jmp_if_zero"),
            jmp_if_not_zero: get("jmp_if_not_zero"),
            exit: get("exit"),
        }
    }
}

/// One lowered VM instruction, already stripped of everything the
/// encoder doesn't need (opcode ids, argument shapes): just the native
/// operation and its resolved operands.
enum Op {
    PushImm(i64),
    Pop,
    Dup,
    Add,
    Sub,
    Mul,
    Cmp,
    Jmp(usize),
    JmpIfZero(usize),
    JmpIfNotZero(usize),
    Exit,
}

/// Map a `Command` to the native operation it lowers to, or bail with
/// `JitError::Unsupported`. Scoped out entirely: `div` (a hardware
/// `idiv`-by-zero traps the process; the VM's own `DIV` reports a
/// graceful `InputError` instead, which this backend cannot replicate
/// without a guard this minimal encoder doesn't have), `push_ref` and
/// `call` (need linker/nested-loader access `JitBackend::compile` isn't
/// given), and anything on the float stack (`ValueType::Float` stays
/// interpreter-only).
fn classify(mmu: &Mmu, cmd: &Command, ops: &Opcodes) -> Result<Op> {
    if cmd.value_type != ValueType::Integer {
        return Err(JitError::Unsupported(cmd.opcode_id));
    }
    let id = cmd.opcode_id;
    if id == ops.push_imm {
        return match &cmd.arg {
            Argument::ImmediateValue(Value::Integer(v)) => Ok(Op::PushImm(*v)),
            _ => Err(JitError::Unsupported(id)),
        };
    }
    if id == ops.pop {
        return Ok(Op::Pop);
    }
    if id == ops.dup {
        return Ok(Op::Dup);
    }
    if id == ops.add {
        return Ok(Op::Add);
    }
    if id == ops.sub {
        return Ok(Op::Sub);
    }
    if id == ops.mul {
        return Ok(Op::Mul);
    }
    if id == ops.cmp {
        return Ok(Op::Cmp);
    }
    if id == ops.jmp {
        return Ok(Op::Jmp(resolve_code_target(mmu, &cmd.arg)?));
    }
    if id == ops.jmp_if_zero {
        return Ok(Op::JmpIfZero(resolve_code_target(mmu, &cmd.arg)?));
    }
    if id == ops.jmp_if_not_zero {
        return Ok(Op::JmpIfNotZero(resolve_code_target(mmu, &cmd.arg)?));
    }
    if id == ops.exit {
        return Ok(Op::Exit);
    }
    Err(JitError::Unsupported(id))
}

/// Resolve a `jmp`-family argument to a VM instruction index. A fresh
/// `Linker` is sufficient here: `Linker::resolve` only reads already
/// committed symbols off `mmu` (see `linker.rs::lookup`), never the
/// in-session working map, so it needs no state of its own.
fn resolve_code_target(mmu: &Mmu, arg: &Argument) -> Result<usize> {
    let Argument::Reference(reference) = arg else {
        return Err(JitError::Fault("jump argument is not a reference".into()));
    };
    let linker = Linker::new();
    let resolved = linker.resolve(mmu, reference, false).map_err(|e| JitError::Fault(e.to_string()))?;
    if resolved.section != Section::Code {
        return Err(JitError::Fault(format!("jump target resolved in {:?}, not Code", resolved.section)));
    }
    usize::try_from(resolved.address).map_err(|_| JitError::Fault("jump target address overflow".into()))
}

/// Where a jump instruction's `rel32` ultimately points: another VM
/// instruction (or one-past-the-end, meaning "fall off the end of
/// code"), or the shared epilogue (`exit`'s target, never a VM address).
enum JumpTarget {
    Code(usize),
    Epilogue,
}

/// Resolves a [`JumpTarget`] to an absolute byte offset within the
/// function body. `None` in either table means "pass one": any constant
/// placeholder is fine since every `rel32` field is a fixed four bytes
/// regardless of its value.
struct Targets<'a> {
    code_offsets: Option<&'a [usize]>,
    epilogue_offset: Option<usize>,
}

impl Targets<'_> {
    fn resolve(&self, target: JumpTarget) -> i64 {
        match (target, self.code_offsets, self.epilogue_offset) {
            (JumpTarget::Code(ip), Some(offsets), _) => offsets[ip] as i64,
            (JumpTarget::Epilogue, _, Some(off)) => off as i64,
            _ => 0,
        }
    }
}

/// The native calling convention this backend compiles to:
/// `extern "C" fn(state: *mut NativeState, entry_addr: usize) -> i64`,
/// `NativeState` being `lib.rs`'s `#[repr(C)]` struct (`stack_ptr` at
/// disp 0, `final_ip` at disp 8, `exit_flag` at disp 16 — the
/// displacement constants baked into `emit_fallthrough_prep` and every
/// `Op::Exit` emission below). `rdi` (state) and the function's own base
/// address are the only things that persist unexamined across the whole
/// call; `entry_addr` (passed in `rsi`) is an absolute address within
/// this same buffer that the real prologue jumps to immediately, letting
/// `invoke` resume a context at any instruction rather than always at
/// instruction zero.

/// `push rbx`, then `mov rbx, [rdi]`, then `jmp rsi`: save the caller's
/// `rbx` (System V callee-saved; this body uses it as the live
/// stack-top pointer for the whole call), load the live stack-top
/// pointer, then dispatch to the resolved entry address. `rdi`/`rsi` are
/// never touched again until the epilogue reads `rdi` back.
fn emit_prologue(buf: &mut Vec<u8>) {
    insn::push_reg(buf, reg::RBX);
    insn::mov_load(buf, reg::RBX, reg::RDI, None);
    insn::jmp_indirect(buf, reg::RSI);
}

/// Reached only by falling off the last instruction: record the natural
/// end-of-code ip and a clear exit flag, then fall through into the
/// shared epilogue.
fn emit_fallthrough_prep(buf: &mut Vec<u8>, code_len: usize) {
    insn::mov_mem_disp_imm32(buf, reg::RDI, 8, code_len as i32);
    insn::mov_mem_disp_imm32(buf, reg::RDI, 16, 0);
}

/// Write the final stack pointer back into `NativeState`, restore the
/// caller's `rbx` (balancing the prologue's `push rbx`), and return.
fn emit_epilogue_core(buf: &mut Vec<u8>) {
    insn::mov_store(buf, reg::RDI, None, reg::RBX);
    insn::pop_reg(buf, reg::RBX);
    insn::xor_reg32(buf, reg::RAX);
    insn::ret(buf);
}

fn emit_op(buf: &mut Vec<u8>, op: &Op, idx: usize, targets: &Targets<'_>) {
    match op {
        Op::PushImm(v) => {
            insn::movabs(buf, reg::RAX, *v);
            insn::mov_store(buf, reg::RBX, None, reg::RAX);
            insn::add_imm8(buf, reg::RBX, 8);
        }
        Op::Pop => insn::sub_imm8(buf, reg::RBX, 8),
        Op::Dup => {
            insn::mov_load(buf, reg::RAX, reg::RBX, Some(-8));
            insn::mov_store(buf, reg::RBX, None, reg::RAX);
            insn::add_imm8(buf, reg::RBX, 8);
        }
        Op::Add | Op::Sub | Op::Mul => {
            insn::sub_imm8(buf, reg::RBX, 8);
            insn::mov_load(buf, reg::RCX, reg::RBX, None);
            insn::sub_imm8(buf, reg::RBX, 8);
            insn::mov_load(buf, reg::RAX, reg::RBX, None);
            match op {
                Op::Add => insn::add_reg(buf, reg::RAX, reg::RCX),
                Op::Sub => insn::sub_reg(buf, reg::RAX, reg::RCX),
                Op::Mul => insn::imul_reg(buf, reg::RAX, reg::RCX),
                _ => unreachable!(),
            }
            insn::mov_store(buf, reg::RBX, None, reg::RAX);
            insn::add_imm8(buf, reg::RBX, 8);
        }
        Op::Cmp => emit_cmp(buf),
        Op::Jmp(target) => {
            let rel_pos_base = buf.len();
            let dest = targets.resolve(JumpTarget::Code(*target));
            insn::jmp_rel32(buf, rel32(dest, rel_pos_base + 5));
        }
        Op::JmpIfZero(target) | Op::JmpIfNotZero(target) => {
            insn::sub_imm8(buf, reg::RBX, 8);
            insn::mov_load(buf, reg::RAX, reg::RBX, None);
            insn::test_reg(buf, reg::RAX);
            let condition = if matches!(op, Op::JmpIfZero(_)) { cc::ZERO } else { cc::NOT_ZERO };
            let rel_pos_base = buf.len();
            let dest = targets.resolve(JumpTarget::Code(*target));
            insn::jcc_rel32(buf, condition, rel32(dest, rel_pos_base + 6));
        }
        Op::Exit => {
            insn::mov_mem_disp_imm32(buf, reg::RDI, 8, (idx + 1) as i32);
            insn::mov_mem_disp_imm32(buf, reg::RDI, 16, 1);
            let rel_pos_base = buf.len();
            let dest = targets.resolve(JumpTarget::Epilogue);
            insn::jmp_rel32(buf, rel32(dest, rel_pos_base + 5));
        }
    }
}

/// `rel32` is relative to the address of the *next* instruction, which
/// for every jump this backend emits is exactly `instruction_start +
/// its own fixed length` — passed in as `end_of_instr`.
fn rel32(dest: i64, end_of_instr: usize) -> i32 {
    (dest - end_of_instr as i64) as i32
}

/// `cmp`'s VM semantics (`lhs.cmp(&rhs)` as `-1`/`0`/`1`) need a small
/// branch the interpreter gets from `Ordering` for free. The three
/// internal labels are local to this one VM instruction, so they're
/// patched against this function's own growing buffer rather than the
/// whole-program offsets table.
fn emit_cmp(buf: &mut Vec<u8>) {
    insn::sub_imm8(buf, reg::RBX, 8);
    insn::mov_load(buf, reg::RCX, reg::RBX, None); // rcx = rhs
    insn::sub_imm8(buf, reg::RBX, 8);
    insn::mov_load(buf, reg::RAX, reg::RBX, None); // rax = lhs
    insn::cmp_reg(buf, reg::RAX, reg::RCX);

    let less_patch = reserve_jcc(buf, cc::LESS);
    let greater_patch = reserve_jcc(buf, cc::GREATER);

    // equal
    insn::xor_reg32(buf, reg::RAX);
    let store_patch_eq = reserve_jmp(buf);

    let less_label = buf.len();
    insn::mov_imm32_sext(buf, reg::RAX, -1);
    let store_patch_less = reserve_jmp(buf);

    let greater_label = buf.len();
    insn::mov_imm32_sext(buf, reg::RAX, 1);

    let store_label = buf.len();
    insn::mov_store(buf, reg::RBX, None, reg::RAX);
    insn::add_imm8(buf, reg::RBX, 8);

    patch_rel32(buf, less_patch, less_label);
    patch_rel32(buf, greater_patch, greater_label);
    patch_rel32(buf, store_patch_eq, store_label);
    patch_rel32(buf, store_patch_less, store_label);
}

/// Emit a placeholder `jcc rel32` and return the byte position of its
/// four-byte immediate field, for a later [`patch_rel32`].
fn reserve_jcc(buf: &mut Vec<u8>, condition: u8) -> usize {
    insn::jcc_rel32(buf, condition, 0);
    buf.len() - 4
}

fn reserve_jmp(buf: &mut Vec<u8>) -> usize {
    insn::jmp_rel32(buf, 0);
    buf.len() - 4
}

fn patch_rel32(buf: &mut [u8], imm_field_pos: usize, target_pos: usize) {
    let rel = rel32(target_pos as i64, imm_field_pos + 4);
    buf[imm_field_pos..imm_field_pos + 4].copy_from_slice(&rel.to_le_bytes());
}

/// A compiled function body plus the table `invoke` uses to resume at an
/// arbitrary ip: `entry_offsets[ip]` is the byte offset of VM
/// instruction `ip`; `entry_offsets[code_len]` is the offset of the
/// shared epilogue, used both for a context that starts already at the
/// end of its code and for `jmp`/`jmp_if_*` targets that point there.
pub(crate) struct CompiledProgram {
    pub(crate) code: Vec<u8>,
    pub(crate) entry_offsets: Vec<usize>,
}

pub(crate) fn compile_program(mmu: &Mmu, ops: &Opcodes) -> Result<CompiledProgram> {
    let ctx = mmu.get_context().map_err(|e| JitError::Fault(e.to_string()))?;
    let code_len = ctx.code.len();
    let lowered: Vec<Op> = ctx
        .code
        .iter()
        .map(|cmd| classify(mmu, cmd, ops))
        .collect::<Result<_>>()?;

    for op in &lowered {
        let target = match op {
            Op::Jmp(t) | Op::JmpIfZero(t) | Op::JmpIfNotZero(t) => Some(*t),
            _ => None,
        };
        if let Some(t) = target {
            if t > code_len {
                return Err(JitError::Fault(format!("jump target {t} past end of code (len {code_len})")));
            }
        }
    }

    let fallthrough_prep_len = {
        let mut scratch = Vec::new();
        emit_fallthrough_prep(&mut scratch, 0);
        scratch.len()
    };

    // Pass one: sizing only. `rel32` values are discarded, so an
    // all-`None` `Targets` (every resolution a dummy zero) is fine —
    // only instruction *lengths* matter here, and those never depend on
    // a jump's actual displacement.
    let pass_one_targets = Targets { code_offsets: None, epilogue_offset: None };
    let mut scratch = Vec::new();
    emit_prologue(&mut scratch);
    let mut entry_offsets = Vec::with_capacity(code_len + 1);
    for (idx, op) in lowered.iter().enumerate() {
        entry_offsets.push(scratch.len());
        emit_op(&mut scratch, op, idx, &pass_one_targets);
    }
    let tail_offset = scratch.len();
    entry_offsets.push(tail_offset);
    let epilogue_offset = tail_offset + fallthrough_prep_len;

    // Pass two: real emission, now that every instruction's offset (and
    // the epilogue's) is known.
    let targets = Targets { code_offsets: Some(&entry_offsets), epilogue_offset: Some(epilogue_offset) };
    let mut code = Vec::with_capacity(scratch.len());
    emit_prologue(&mut code);
    for (idx, op) in lowered.iter().enumerate() {
        debug_assert_eq!(code.len(), entry_offsets[idx]);
        emit_op(&mut code, op, idx, &targets);
    }
    debug_assert_eq!(code.len(), tail_offset);
    emit_fallthrough_prep(&mut code, code_len);
    debug_assert_eq!(code.len(), epilogue_offset);
    emit_epilogue_core(&mut code);

    Ok(CompiledProgram { code, entry_offsets })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackvm_core::command::Argument;
    use stackvm_core::commandset::{standard, CommandSet};
    use stackvm_core::mmu::Mmu;
    use stackvm_core::value::ValueType;

    fn push(mmu: &mut Mmu, opcode: u32, v: i64) {
        mmu.insert_text(Command::new(opcode, ValueType::Integer, Argument::ImmediateValue(Value::Integer(v))))
            .unwrap();
    }

    #[test]
    fn straight_line_program_compiles_to_a_nonempty_buffer() {
        let commands: CommandSet = standard();
        let ops = Opcodes::capture(&commands);
        let mut mmu = Mmu::new();
        let push_id = commands.opcode_of("push_imm").unwrap();
        let add_id = commands.opcode_of("add").unwrap();
        push(&mut mmu, push_id, 2);
        push(&mut mmu, push_id, 3);
        mmu.insert_text(Command::new(add_id, ValueType::Integer, Argument::None)).unwrap();

        let program = compile_program(&mmu, &ops).unwrap();
        assert!(!program.code.is_empty());
        assert_eq!(program.entry_offsets.len(), 4);
    }

    #[test]
    fn div_is_unsupported() {
        let commands: CommandSet = standard();
        let ops = Opcodes::capture(&commands);
        let mut mmu = Mmu::new();
        let div_id = commands.opcode_of("div").unwrap();
        mmu.insert_text(Command::new(div_id, ValueType::Integer, Argument::None)).unwrap();

        assert!(matches!(compile_program(&mmu, &ops), Err(JitError::Unsupported(_))));
    }
}
