//! Vesper: a dynamically-typed, class-based scripting language with a
//! bytecode compiler and a stack virtual machine.
//!
//! The pipeline is source → lexer → parser → bytecode compiler → VM. The
//! object model is delegation-based: every object is an attribute
//! dictionary with an optional per-instance ancestor, and modules share the
//! same contract.

#![allow(clippy::module_inception)]
#![allow(clippy::result_large_err)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_many_arguments)]

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod span;

use error::VesperError;
use runtime::{Value, Vm};

/// Parse source code into an AST without executing.
pub fn parse(source: &str) -> Result<ast::Program, VesperError> {
    let program = parser::parse_source(source)?;
    Ok(program)
}

/// Compile source code to a module without executing.
pub fn compile(source: &str, module_name: &str) -> Result<bytecode::CompiledModule, VesperError> {
    let program = parser::parse_source(source)?;
    let module = compiler::compile_module(module_name, &program)?;
    Ok(module)
}

/// Compile and run a program, returning the value its top level left
/// behind.
pub fn run(source: &str) -> Result<Value, VesperError> {
    let mut vm = Vm::new();
    run_with_vm(source, &mut vm, "main")
}

/// Compile and run a program on an existing VM (embedders keep globals and
/// module caches across runs this way).
pub fn run_with_vm(source: &str, vm: &mut Vm, path: &str) -> Result<Value, VesperError> {
    let module = compile(source, &compiler::compiler_stmts::module_stem(path))?;
    let value = vm.run_module(&module, path)?;
    Ok(value)
}
