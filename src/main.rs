//! Vesper CLI: compile and run a script file.

use std::env;
use std::process;

use colored::Colorize;

use vesperlang::error::VesperError;
use vesperlang::runtime::{Value, Vm};
use vesperlang::span::Span;
use vesperlang::{compiler, parser};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let mut args = env::args().skip(1);
    let mut file: Option<String> = None;
    let mut debug = false;
    let mut script_args: Vec<String> = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-version" | "--version" => {
                println!("vesper {}", VERSION);
                return;
            }
            "-help" | "--help" => {
                print_usage();
                return;
            }
            "-debug" | "--debug" => debug = true,
            _ => {
                file = Some(arg);
                // Everything after the script path belongs to the script.
                script_args.extend(args.by_ref());
            }
        }
    }

    let Some(file) = file else {
        print_usage();
        process::exit(64);
    };

    if let Err(err) = run_file(&file, debug, &script_args) {
        report_error(&err);
        process::exit(70);
    }
}

fn run_file(path: &str, debug: bool, script_args: &[String]) -> Result<(), VesperError> {
    let source = std::fs::read_to_string(path)?;

    let program = parser::parse_source(&source)?;
    let module_name = compiler::compiler_stmts::module_stem(path);
    let compiled = compiler::compile_module(&module_name, &program)?;

    if debug {
        eprintln!(
            "{} {} constant(s), {} attribute(s), {} initializer instruction(s)",
            "[debug]".dimmed(),
            compiled.constants.len(),
            compiled.attributes.len(),
            compiled.initializer.body.len()
        );
    }

    let mut vm = Vm::new();
    vm.run_module(&compiled, path)?;

    // A `main` entry point receives the remaining CLI arguments as a list
    // of strings.
    let entry = vm
        .modules
        .get(path)
        .and_then(|module| module.borrow().get_attribute("main"));
    if let Some(entry) = entry {
        let args_list = Value::list(
            script_args
                .iter()
                .map(|arg| Value::string(arg.clone()))
                .collect(),
        );
        let _ = vm.call_value(entry, vec![args_list], Span::default())?;
    }

    Ok(())
}

fn print_usage() {
    println!("Usage: vesper [options] <script> [args...]");
    println!();
    println!("Options:");
    println!("  -version   Print the interpreter version");
    println!("  -help      Show this help");
    println!("  -debug     Print compilation statistics before running");
}

fn report_error(err: &VesperError) {
    match err {
        VesperError::Compile(errors) => {
            eprintln!("{}", format!("{}", errors).red());
        }
        VesperError::Runtime(err) => {
            eprintln!("{}", format!("{}", err).red());
        }
        VesperError::Io(err) => {
            eprintln!("{} {}", "error:".red().bold(), err);
        }
    }
}
