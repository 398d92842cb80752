use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use littlelang::bytecode::compile::{CompileOptions, compile_source};
use littlelang::bytecode::disasm::{print_program, print_stats};
use littlelang::bytecode::program::{Program, SymbolMap};
use littlelang::frontend::lexer::Lexer;
use littlelang::frontend::token_dumper::TokenDumper;
use littlelang::logging::init_logging;
use littlelang::runtime::vm::{Vm, VmConfig};

#[derive(Parser, Debug)]
#[command(name = "littlelang")]
#[command(about = "Compile and run littlelang programs on the bytecode VM")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a source file to bytecode
    Compile {
        source: PathBuf,
        output: PathBuf,

        /// Pad so every literal operand starts on a 4-byte boundary
        #[arg(long)]
        align: bool,
    },

    /// Execute a bytecode file
    Run {
        bytecode: PathBuf,

        /// Dump machine state before every instruction
        #[arg(long)]
        debug: bool,

        #[arg(long = "max-steps")]
        max_steps: Option<usize>,

        #[arg(long = "max-call-depth")]
        max_call_depth: Option<usize>,

        #[arg(long = "max-stack")]
        max_stack: Option<usize>,
    },

    /// Print a bytecode listing
    Disasm {
        bytecode: PathBuf,

        /// Also print opcode frequencies
        #[arg(long)]
        stats: bool,
    },

    /// Print the token stream of a source file
    Tokens {
        source: PathBuf,

        #[arg(long = "no-color")]
        no_color: bool,

        #[arg(long)]
        pretty: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let debug = matches!(cli.command, Commands::Run { debug: true, .. });
    init_logging(debug);

    let result = match cli.command {
        Commands::Compile {
            source,
            output,
            align,
        } => compile(&source, &output, align),
        Commands::Run {
            bytecode,
            debug,
            max_steps,
            max_call_depth,
            max_stack,
        } => {
            let mut config = if debug {
                VmConfig::debug()
            } else {
                VmConfig::default()
            };
            config.max_steps = max_steps;
            if let Some(depth) = max_call_depth {
                config.max_call_depth = depth;
            }
            if let Some(size) = max_stack {
                config.max_stack_size = size;
            }
            run(&bytecode, config)
        }
        Commands::Disasm { bytecode, stats } => disasm(&bytecode, stats),
        Commands::Tokens {
            source,
            no_color,
            pretty,
        } => dump_tokens(&source, no_color, pretty),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn read_source(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("failed to read '{}': {}", path.display(), e))
}

fn read_bytecode(path: &Path) -> Result<Program, String> {
    fs::read(path)
        .map(Program::from_bytes)
        .map_err(|e| format!("failed to read '{}': {}", path.display(), e))
}

fn sidecar_path(bytecode: &Path) -> PathBuf {
    let mut name = bytecode.as_os_str().to_owned();
    name.push(".sym");
    PathBuf::from(name)
}

/// Symbol map next to `bytecode`, if there is a readable one.
fn load_symbols(bytecode: &Path) -> Option<SymbolMap> {
    let path = sidecar_path(bytecode);
    let bytes = fs::read(&path).ok()?;
    match SymbolMap::from_bytes(&bytes) {
        Ok(map) => Some(map),
        Err(e) => {
            warn!("ignoring unreadable symbol map {}: {}", path.display(), e);
            None
        }
    }
}

fn compile(source: &Path, output: &Path, align: bool) -> Result<(), String> {
    let text = read_source(source)?;
    let options = CompileOptions {
        align_operands: align,
    };

    let compiled = compile_source(&text, options).map_err(|e| {
        let mut message = format!("{}: {}", source.display(), e);
        if let Some(hint) = e.hint() {
            message.push_str(&format!("\n  hint: {}", hint));
        }
        message
    })?;

    fs::write(output, compiled.program.as_bytes())
        .map_err(|e| format!("failed to write '{}': {}", output.display(), e))?;

    let sym_path = sidecar_path(output);
    let sym_bytes = compiled
        .symbols
        .to_bytes()
        .map_err(|e| format!("failed to encode symbol map: {}", e))?;
    fs::write(&sym_path, sym_bytes)
        .map_err(|e| format!("failed to write '{}': {}", sym_path.display(), e))?;

    info!(
        bytes = compiled.program.len(),
        "wrote {} and {}",
        output.display(),
        sym_path.display()
    );
    Ok(())
}

fn run(bytecode: &Path, config: VmConfig) -> Result<(), String> {
    let program = read_bytecode(bytecode)?;

    if config.trace {
        if let Some(symbols) = load_symbols(bytecode) {
            for (name, address) in &symbols.functions {
                info!("function {} at {:04}", name, address);
            }
        }
    }

    let mut vm = Vm::with_config(program, config);
    let result = vm.run();
    debug!(steps = vm.steps(), "run finished");
    match result {
        Ok(ret) => {
            println!("VM STATUS: {}", vm.status());
            println!("RETURN VALUE: {}", ret);
            Ok(())
        }
        Err(e) => {
            println!("VM STATUS: {}", vm.status());
            Err(e.to_string())
        }
    }
}

fn disasm(bytecode: &Path, stats: bool) -> Result<(), String> {
    let program = read_bytecode(bytecode)?;
    let symbols = load_symbols(bytecode);

    print_program(program.as_bytes(), symbols.as_ref());
    if stats {
        println!();
        print_stats(program.as_bytes());
    }
    Ok(())
}

fn dump_tokens(source: &Path, no_color: bool, pretty: bool) -> Result<(), String> {
    let text = read_source(source)?;
    let tokens = Lexer::new(&text)
        .tokenize()
        .map_err(|e| format!("lexer error: {}", e))?;

    let mut dumper = TokenDumper::new();
    if no_color {
        dumper = dumper.no_color();
    }
    if pretty {
        dumper = dumper.pretty();
    }

    dumper.dump(&tokens);
    Ok(())
}
