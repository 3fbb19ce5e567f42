//! The six concrete scenarios and the round-trip laws named in the
//! testable-properties section: arithmetic, a jump-once loop, nested
//! streaming execute, a bicomponent data reference, an undefined symbol,
//! and JIT-image invalidation on a checksum change. All driven through
//! `stackvm_core::facade::Runtime` with `stackvm_asm::AsmReader` as the
//! program loader, exactly as the CLI binary uses them.

use stackvm_asm::AsmReader;
use stackvm_core::commandset;
use stackvm_core::context::ContextFlags;
use stackvm_core::error::{InputError, JitError};
use stackvm_core::executor::ExecutorSet;
use stackvm_core::facade::Runtime;
use stackvm_core::interpreter::Interpreter;
use stackvm_core::jit::{CompiledImage, JitBackend};
use stackvm_core::mmu::Mmu;
use stackvm_core::value::{Value, ValueType};
use stackvm_core::JitResult;

fn new_runtime() -> Runtime {
    let commands = commandset::standard();
    Runtime::new(Interpreter::new(commands, ExecutorSet::default()))
}

fn load_asm(runtime: &mut Runtime, source: &str) {
    let mut reader = AsmReader::new(source, &runtime.interpreter.commands);
    runtime.load(&mut reader, false).expect("program should load");
}

#[test]
fn scenario_1_arithmetic() {
    let mut runtime = new_runtime();
    load_asm(&mut runtime, "push_imm 2\npush_imm 3\nadd\nexit\n");
    let result = runtime.exec().unwrap();
    assert_eq!(result, Value::Integer(5));
}

#[test]
fn scenario_2_jump_once_loop() {
    // `start` is defined at code offset 0 (the label immediately
    // precedes `dup`). The top-of-stack counter decrements each pass;
    // `jmp_if_zero done` is false on the first pass (counter is 1) and
    // true on the second, so `jmp start` fires exactly once.
    let source = "\
push_imm 1
start:
    dup
    jmp_if_zero done
    push_imm 1
    sub
    jmp start
done:
    exit
";
    let mut runtime = new_runtime();
    load_asm(&mut runtime, source);
    let result = runtime.exec().unwrap();
    assert_eq!(result, Value::Integer(0));
    assert!(runtime.mmu.get_context().unwrap().flags.contains(ContextFlags::EXIT));
}

#[test]
fn scenario_3_nested_streaming_execute_then_outer_continues() {
    let mut runtime = new_runtime();

    // The nested stream runs in its own saved-and-cleared context (per
    // `Runtime::load`'s `execute_stream` branch) and leaves Float(1.5) on
    // top of its float stack.
    let nested_source = "push_imm.f 1.5\nexit\n";
    let mut nested_reader = AsmReader::new(nested_source, &runtime.interpreter.commands);
    runtime.mmu.select_stack(ValueType::Float);
    runtime.load(&mut nested_reader, true).unwrap();
    let nested_result = runtime.mmu.get_stack_top().unwrap().unwrap();
    assert_eq!(nested_result, Value::Float(1.5));

    // Pop the streaming frame and hand its result to the outer context's
    // stack, which is where the outer program picks up.
    runtime.delete().unwrap();
    runtime.mmu.select_stack(ValueType::Float);
    runtime.mmu.stack_push(nested_result).unwrap();

    load_asm(&mut runtime, "push_imm.f 2.0\nmul.f\nexit.f\n");
    let result = runtime.exec().unwrap();
    assert_eq!(result, Value::Float(3.0));
}

#[test]
fn scenario_4_bicomponent_data_reference() {
    let source = "\
push_ref data:(base + 4)
exit
data:
.data 10
.data 20
.data 30
.data 40
.data 42
";
    let mut runtime = new_runtime();
    load_asm(&mut runtime, source);
    let result = runtime.exec().unwrap();
    assert_eq!(result, Value::Integer(42));
}

#[test]
fn scenario_5_undefined_symbol_is_fatal() {
    let mut runtime = new_runtime();
    load_asm(&mut runtime, "push_ref foo\nexit\n");
    let err = runtime.exec().unwrap_err();
    match err {
        InputError::UndefinedSymbol(name) => assert_eq!(name, "foo"),
        other => panic!("expected an undefined-symbol failure naming \"foo\", got {other:?}"),
    }
}

/// A fake backend whose every compile call is observable, standing in
/// for `stackvm_x86::X86Backend` to exercise `JitCache`'s
/// checksum-keyed invalidation without crossing the crate boundary.
/// Shares its counter with the test via `Rc` since the backend itself
/// is moved into the `Runtime` as a `Box<dyn JitBackend>`.
struct CountingBackend {
    compiles: std::rc::Rc<std::cell::Cell<u32>>,
}

struct NoopImage;

impl CompiledImage for NoopImage {
    fn invoke(&self, mmu: &mut Mmu) -> JitResult<()> {
        let ctx = mmu.get_context_mut().map_err(|e| JitError::Fault(e.to_string()))?;
        ctx.flags |= ContextFlags::EXIT;
        Ok(())
    }
}

impl JitBackend for CountingBackend {
    fn compile(&self, _mmu: &Mmu) -> JitResult<Box<dyn CompiledImage>> {
        self.compiles.set(self.compiles.get() + 1);
        Ok(Box::new(NoopImage))
    }
}

#[test]
fn scenario_6_jit_image_invalidates_on_data_mutation() {
    let mut runtime = new_runtime();
    load_asm(&mut runtime, "push_imm 2\npush_imm 3\nadd\nexit\n");
    let compiles = std::rc::Rc::new(std::cell::Cell::new(0));
    runtime = runtime.with_jit(Box::new(CountingBackend { compiles: compiles.clone() }));

    runtime.compile();
    runtime.exec().unwrap();
    runtime.mmu.clear_context().unwrap();
    runtime.exec().unwrap();
    // Same code/data/symbols as the `compile()` call above: the cached
    // image is reused across both `exec`s, so only one compile happened.
    assert_eq!(compiles.get(), 1);

    runtime.mmu.insert_data(Value::Integer(99)).unwrap();
    runtime.mmu.clear_context().unwrap();
    runtime.exec().unwrap();
    // Mutating the data buffer changes `checksum_state`, forcing a
    // second, fresh compile before this `exec` can run.
    assert_eq!(compiles.get(), 2);
}

#[test]
fn round_trip_save_clear_restore_is_a_no_op() {
    let mut runtime = new_runtime();
    load_asm(&mut runtime, "push_imm 1\nexit\n");
    let before = runtime.mmu.context_count();
    runtime.mmu.save_context().unwrap();
    runtime.mmu.clear_context().unwrap();
    runtime.delete().unwrap();
    assert_eq!(runtime.mmu.context_count(), before);
}

#[test]
fn round_trip_alloc_delete_is_stack_neutral() {
    let mut runtime = new_runtime();
    let before = runtime.mmu.context_count();
    runtime.mmu.alloc_context();
    runtime.delete().unwrap();
    assert_eq!(runtime.mmu.context_count(), before);
}

#[test]
fn round_trip_dump_then_load_preserves_stack_top() {
    let mut runtime = new_runtime();
    load_asm(&mut runtime, "push_imm 7\npush_imm 35\nadd\nexit\n");
    runtime.exec().unwrap();

    let mut writer = stackvm_image::ImageWriter::new();
    runtime.dump(&mut writer).unwrap();

    let mut fresh = new_runtime();
    let mut reader = stackvm_image::ImageReader::new(&writer.bytes);
    fresh.load(&mut reader, false).unwrap();
    // The dumped stack image is restored as-is; re-running the dumped
    // code from a fresh `ip` is a separate concern this law doesn't cover.
    assert_eq!(fresh.mmu.get_stack_top().unwrap(), Some(Value::Integer(42)));
}
