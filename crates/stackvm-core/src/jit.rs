//! The JIT backend seam. `stackvm-x86` provides the concrete
//! implementation; this crate only specifies the contract and the
//! checksum-keyed cache that decides whether a compiled image is still
//! valid for the current context.

use crate::error::JitResult;
use crate::mmu::Mmu;

/// One compiled, directly-callable image of a context's code section, plus
/// the checksum it was compiled against. A JIT backend hands these back
/// opaquely; the facade never looks inside.
pub trait CompiledImage {
    /// Run the compiled image against the current context's stacks and
    /// ip; returns normally when the context raises `EXIT` or its code
    /// runs out, exactly like `Interpreter::run`.
    fn invoke(&self, mmu: &mut Mmu) -> JitResult<()>;
}

/// Lowers the current context's code section to native code. Backends are
/// free to compile lazily, eagerly, or not at all (returning
/// `JitError::Unsupported` for anything they can't lower); the facade
/// always has the interpreter as a fallback.
pub trait JitBackend {
    fn compile(&self, mmu: &Mmu) -> JitResult<Box<dyn CompiledImage>>;
}

/// Caches a single compiled image keyed by `Mmu::checksum_state`. A cache
/// miss (code/data/symbols changed since compilation, or no image yet)
/// triggers recompilation; a cache hit skips straight to `invoke`.
#[derive(Default)]
pub struct JitCache {
    entry: Option<(u64, Box<dyn CompiledImage>)>,
}

impl JitCache {
    pub fn new() -> Self {
        JitCache { entry: None }
    }

    /// Compile (or reuse) and run the current context under `backend`.
    /// Any `JitError` is returned to the caller uncompiled; the facade is
    /// responsible for falling back to the interpreter on failure, per
    /// the contract in §4.6.
    pub fn run(&mut self, mmu: &mut Mmu, backend: &dyn JitBackend) -> JitResult<()> {
        let checksum = mmu
            .checksum_state()
            .map_err(|e| crate::error::JitError::Fault(e.to_string()))?;

        let needs_compile = match &self.entry {
            Some((cached_checksum, _)) => *cached_checksum != checksum,
            None => true,
        };

        if needs_compile {
            let image = backend.compile(mmu)?;
            self.entry = Some((checksum, image));
        }

        let (_, image) = self.entry.as_ref().expect("just populated above");
        image.invoke(mmu)
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    /// Install an already-compiled image under a checksum, bypassing
    /// `run`'s own compile step. Used by callers (the facade's
    /// `Compile` operation) that want to compile eagerly, ahead of the
    /// first `Exec`.
    pub fn install(&mut self, checksum: u64, image: Box<dyn CompiledImage>) {
        self.entry = Some((checksum, image));
    }
}
