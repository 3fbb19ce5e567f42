//! Ties every collaborator together and drives `Load -> Compile -> Exec`.
//! The CLI binary is a thin shell around this type; integration tests
//! drive it directly.

use tracing::{info, warn};

use crate::error::{InputError, InputResult, InternalError, JitError};
use crate::executor::{ExecContext, ExecutorSet, NestedLoader};
use crate::interpreter::Interpreter;
use crate::jit::{JitBackend, JitCache};
use crate::linker::{Linker, Offsets};
use crate::mmu::Mmu;
use crate::reader::{DecodeElement, Reader, SectionType, Writer};
use crate::value::Value;

/// Programs registered as `call` targets, indexed by the `ImmediateIndex`
/// a `call` opcode names them with. Populated before `Exec` by whoever
/// assembles the running program (the CLI, or a test harness); the
/// facade implements [`NestedLoader`] by looking them up here.
#[derive(Default)]
pub struct NestedPrograms {
    entries: Vec<Vec<crate::reader::DecodeResult>>,
}

impl NestedPrograms {
    pub fn register(&mut self, stream: Vec<crate::reader::DecodeResult>) -> u64 {
        self.entries.push(stream);
        (self.entries.len() - 1) as u64
    }
}

impl NestedLoader for NestedPrograms {
    fn decode_all(&self, index: u64) -> InputResult<Vec<crate::reader::DecodeResult>> {
        self.entries
            .get(index as usize)
            .cloned()
            .ok_or(InputError::Internal(InternalError::NoNestedLoader))
    }
}

/// The facade of §4.7: MMU, linker, interpreter, optional JIT cache, and
/// the registry of nested programs `call` can target.
pub struct Runtime {
    pub mmu: Mmu,
    pub linker: Linker,
    pub interpreter: Interpreter,
    pub nested: NestedPrograms,
    jit: Option<Box<dyn JitBackend>>,
    jit_cache: JitCache,
}

impl Runtime {
    pub fn new(interpreter: Interpreter) -> Self {
        Runtime {
            mmu: Mmu::new(),
            linker: Linker::new(),
            interpreter,
            nested: NestedPrograms::default(),
            jit: None,
            jit_cache: JitCache::new(),
        }
    }

    pub fn with_jit(mut self, backend: Box<dyn JitBackend>) -> Self {
        self.jit = Some(backend);
        self
    }

    /// Reset everything: drop all contexts, start fresh, invalidate any
    /// compiled image.
    pub fn flush(&mut self) {
        info!(target: "vm::lifecycle", "flush");
        self.mmu.reset_everything();
        self.jit_cache.invalidate();
    }

    /// Clear the current context: reset ip, flags, and operand stacks;
    /// keep code, data, symbols.
    pub fn reset(&mut self) -> InputResult<()> {
        self.mmu.clear_context().map_err(InputError::from)
    }

    /// Drop code, data, symbols of the current context; keep the slot.
    pub fn clear(&mut self) -> InputResult<()> {
        let id = self.mmu.current_context_id().map_err(InputError::from)?;
        self.mmu.reset_buffers(id).map_err(InputError::from)
    }

    /// Pop the current context.
    pub fn delete(&mut self) -> InputResult<()> {
        self.mmu.restore_context().map(|_| ()).map_err(InputError::from)
    }

    /// Drive `reader` through its sections, routing each to the MMU, the
    /// linker, or (when `execute_stream` is set) directly to the
    /// executors. Uniform sections are bulk-loaded; `NonUniform` sections
    /// are decoded element by element.
    pub fn load<R: Reader>(&mut self, reader: &mut R, execute_stream: bool) -> InputResult<()> {
        self.linker.init_session(&mut self.mmu)?;

        if execute_stream {
            self.mmu.save_context()?;
            self.mmu.clear_context()?;
        }

        let result = self.load_sections(reader, execute_stream);

        if result.is_err() {
            if let Ok(id) = self.mmu.current_context_id() {
                let _ = self.mmu.reset_buffers(id);
            }
        }
        result?;

        if !execute_stream {
            self.linker.commit(&mut self.mmu)?;
        }
        Ok(())
    }

    fn load_sections<R: Reader>(&mut self, reader: &mut R, execute_stream: bool) -> InputResult<()> {
        while let Some((section_type, element_count, byte_count)) = reader.next_section()? {
            match section_type {
                SectionType::CodeImage => {
                    let code = reader.read_code_image(byte_count)?;
                    debug_assert_eq!(code.len(), element_count);
                    for cmd in code {
                        self.mmu.insert_text(cmd)?;
                    }
                }
                SectionType::DataImage => {
                    let data = reader.read_data_image(byte_count)?;
                    debug_assert_eq!(data.len(), element_count);
                    for value in data {
                        self.mmu.insert_data(value)?;
                    }
                }
                SectionType::StackImage => {
                    let stack = reader.read_stack_image(byte_count)?;
                    self.mmu.read_stack(stack)?;
                }
                SectionType::SymbolMap => {
                    let symbols = reader.read_symbol_map(byte_count)?;
                    self.linker.merge_add(symbols);
                }
                SectionType::NonUniform => {
                    self.load_non_uniform(reader, execute_stream)?;
                }
            }
        }
        Ok(())
    }

    fn load_non_uniform<R: Reader>(&mut self, reader: &mut R, execute_stream: bool) -> InputResult<()> {
        loop {
            let decoded = reader.read_stream()?;
            for (hash, name) in &decoded.referenced_names {
                self.mmu.remember_symbol_name(*hash, name);
            }

            if execute_stream && !decoded.mentioned_symbols.is_empty() {
                return Err(InputError::SymbolInStreamingMode);
            }

            match decoded.element {
                None | Some(DecodeElement::Nothing) => return Ok(()),
                Some(DecodeElement::Command(cmd)) => {
                    if execute_stream {
                        self.run_one_streaming(&cmd)?;
                        if self.mmu.get_context()?.flags.contains(crate::context::ContextFlags::EXIT) {
                            return Ok(());
                        }
                    } else {
                        let offsets = Offsets {
                            code: self.mmu.code_len()? as u64,
                            data: self.mmu.data_len()? as u64,
                            bytepool: 0,
                        };
                        self.linker.add(decoded.mentioned_symbols, offsets)?;
                        self.mmu.insert_text(cmd)?;
                    }
                }
                Some(DecodeElement::Data(value)) => {
                    if execute_stream {
                        return Err(InputError::NonCommandInStreamingMode);
                    }
                    let offsets = Offsets {
                        code: self.mmu.code_len()? as u64,
                        data: self.mmu.data_len()? as u64,
                        bytepool: 0,
                    };
                    self.linker.add(decoded.mentioned_symbols, offsets)?;
                    self.mmu.insert_data(value)?;
                }
            }
        }
    }

    /// Dispatch a single decoded command directly against the current
    /// (streaming) context, without the ip-based jump-detection the
    /// normal interpreter loop performs — there is no code buffer to
    /// jump within.
    fn run_one_streaming(&mut self, cmd: &crate::command::Command) -> InputResult<()> {
        let (executor_kind, handle) = self
            .interpreter
            .commands
            .get_execution_handle(cmd.opcode_id, cmd.value_type)?
            .ok_or(InternalError::MissingExecutor {
                opcode_id: cmd.opcode_id,
                value_type: cmd.value_type,
            })?;
        self.mmu.select_stack(cmd.value_type);
        let mut cx = ExecContext {
            mmu: &mut self.mmu,
            linker: &self.linker,
            loader: Some(&self.nested),
            interpreter: &self.interpreter,
        };
        self.interpreter.executors.dispatch(executor_kind, &mut cx, handle, &cmd.arg)
    }

    /// Serialize the current context through `writer`.
    pub fn dump<W: Writer>(&self, writer: &mut W) -> InputResult<()> {
        let ctx = self.mmu.get_context().map_err(InputError::from)?;
        writer.write_code_image(&ctx.code)?;
        writer.write_data_image(&ctx.data)?;
        writer.write_stack_image(match self.mmu.selected_stack() {
            crate::value::ValueType::Float => &ctx.stacks.float,
            _ => &ctx.stacks.integer,
        })?;
        writer.write_symbol_map(&ctx.symbols)
    }

    /// Compile the current context under the attached JIT backend, if
    /// any. A compile failure is logged and the context simply keeps
    /// running interpreted; it is not propagated.
    pub fn compile(&mut self) {
        let Some(backend) = self.jit.as_deref() else {
            return;
        };
        match backend.compile(&self.mmu) {
            Ok(image) => {
                if let Ok(checksum) = self.mmu.checksum_state() {
                    self.jit_cache.install(checksum, image);
                }
            }
            Err(JitError::Unsupported(opcode)) => {
                warn!(target: "vm::exception", opcode, "opcode has no JIT lowering, interpreter will be used");
            }
            Err(JitError::Fault(message)) => {
                warn!(target: "vm::exception", %message, "JIT compile faulted, interpreter will be used");
            }
        }
    }

    /// Run a JIT image if one matches the current checksum, otherwise
    /// fall back to the interpreter. A JIT runtime fault also falls back,
    /// per §7 category 3.
    pub fn exec(&mut self) -> InputResult<Value> {
        if let Some(backend) = self.jit.as_deref() {
            match self.jit_cache.run(&mut self.mmu, backend) {
                Ok(()) => return self.final_value(),
                Err(JitError::Unsupported(opcode)) => {
                    warn!(target: "vm::exception", opcode, "falling back to interpreter");
                }
                Err(JitError::Fault(message)) => {
                    warn!(target: "vm::exception", %message, "JIT faulted, falling back to interpreter");
                }
            }
        }

        self.interpreter
            .run(&mut self.mmu, &self.linker, Some(&self.nested))?;
        self.final_value()
    }

    fn final_value(&self) -> InputResult<Value> {
        Ok(self.mmu.get_stack_top().map_err(InputError::from)?.unwrap_or_default())
    }
}
