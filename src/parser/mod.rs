//! Recursive-descent parser: tokens to AST.

pub mod core;
pub mod expressions;
pub mod statements;

#[cfg(test)]
mod tests;

pub use self::core::{ParseResult, Parser};

use crate::ast::Program;
use crate::error::{CompileErrors, Diagnostic};
use crate::lexer::Scanner;

/// Lex and parse source text, collecting diagnostics from both phases.
/// Any diagnostic at all means no usable program.
pub fn parse_source(source: &str) -> Result<Program, CompileErrors> {
    let (tokens, mut diagnostics) = Scanner::new(source).scan_tokens();
    let (program, parse_errors) = Parser::new(tokens).parse();
    diagnostics.extend(parse_errors);

    if diagnostics.is_empty() {
        Ok(program)
    } else {
        Err(CompileErrors::new(diagnostics))
    }
}

/// Like `parse_source` but returns partial results alongside diagnostics.
pub fn parse_source_partial(source: &str) -> (Program, Vec<Diagnostic>) {
    let (tokens, mut diagnostics) = Scanner::new(source).scan_tokens();
    let (program, parse_errors) = Parser::new(tokens).parse();
    diagnostics.extend(parse_errors);
    (program, diagnostics)
}
