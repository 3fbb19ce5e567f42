//! CLI entry point: load a program (textual assembly or a binary image),
//! compile it under the x86-64 backend if requested, run it, and print
//! the value left on top of the stack. A thin shell around
//! [`stackvm_core::facade::Runtime`]; see that module for the actual
//! `Load -> Compile -> Exec` pipeline.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use stackvm_asm::AsmReader;
use stackvm_core::commandset;
use stackvm_core::executor::ExecutorSet;
use stackvm_core::facade::Runtime;
use stackvm_core::interpreter::Interpreter;
use stackvm_image::{ImageReader, ImageWriter};
use stackvm_x86::X86Backend;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    /// The textual assembly syntax read by `stackvm_asm::AsmReader`.
    Asm,
    /// The section-framed binary codec read/written by `stackvm_image`.
    Image,
}

#[derive(Parser)]
#[command(author, version, about = "Runs a stack-VM program", long_about = None)]
struct Args {
    /// Program to load and run.
    input: PathBuf,

    /// Input encoding. Defaults to a guess from the input's extension
    /// (`.img`/`.bin` => image, anything else => assembly).
    #[arg(long, value_enum)]
    format: Option<Format>,

    /// Run the loaded context purely interpreted, skipping the x86-64
    /// JIT backend entirely.
    #[arg(long)]
    no_jit: bool,

    /// After running, serialize the final context as a binary image to
    /// this path.
    #[arg(long)]
    dump: Option<PathBuf>,

    /// Increase log verbosity; repeatable (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn guess_format(path: &PathBuf) -> Format {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("img" | "bin") => Format::Image,
        _ => Format::Asm,
    }
}

fn init_logging(verbose: u8) {
    let default_directive = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let bytes = fs::read(&args.input).with_context(|| format!("reading {}", args.input.display()))?;
    let format = args.format.unwrap_or_else(|| guess_format(&args.input));

    let commands = commandset::standard();
    let interpreter = Interpreter::new(commands, ExecutorSet::default());
    let mut runtime = Runtime::new(interpreter);
    if !args.no_jit {
        let backend = X86Backend::new(&runtime.interpreter.commands);
        runtime = runtime.with_jit(Box::new(backend));
    }

    match format {
        Format::Asm => {
            let source = String::from_utf8(bytes).context("assembly input is not valid UTF-8")?;
            let mut reader = AsmReader::new(&source, &runtime.interpreter.commands);
            runtime.load(&mut reader, false).context("loading assembly program")?;
        }
        Format::Image => {
            let mut reader = ImageReader::new(&bytes);
            runtime.load(&mut reader, false).context("loading binary image")?;
        }
    }

    runtime.compile();
    let result = runtime.exec().context("running program")?;
    println!("{result:?}");

    if let Some(dump_path) = args.dump {
        let mut writer = ImageWriter::new();
        runtime.dump(&mut writer).context("serializing final context")?;
        fs::write(&dump_path, &writer.bytes).with_context(|| format!("writing {}", dump_path.display()))?;
    }

    Ok(())
}
