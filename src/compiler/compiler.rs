//! AST-to-bytecode compiler core: the builder stack, label resolution, and
//! the module- and function-level passes.
//!
//! Two cooperating passes share one contract: expressions leave exactly one
//! value on the operand stack, statements leave the depth unchanged. The
//! module-level pass registers functions, classes, and enums as module
//! attributes and emits all other top-level statements into the module
//! initializer; the function-level pass compiles everything inside a
//! function or lambda body.

use std::rc::Rc;

use crate::ast::{Parameter, Program, StmtKind};
use crate::bytecode::instruction::{Instruction, OpCode};
use crate::bytecode::method::{CompiledModule, Constant, Method};
use crate::bytecode::optimizer;
use crate::error::{CompileErrors, Diagnostic};
use crate::span::Span;

use super::symbols::SymbolTable;

/// Compiler knobs.
#[derive(Debug, Clone, Copy)]
pub struct CompilerOptions {
    /// Run dead-code elimination on every finalized method body.
    pub optimize: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self { optimize: true }
    }
}

/// A loop's break target plus the try-region depth at loop entry, so a
/// break crossing try regions knows how many handlers to pop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BreakContext {
    pub(crate) label: usize,
    pub(crate) try_depth: usize,
}

/// Builds one method body: instructions plus the label table used for
/// forward jumps. Jump operands hold label ids until `finalize_labels`
/// rewrites them to absolute instruction addresses.
pub(crate) struct MethodBuilder {
    pub(crate) method: Method,
    labels: Vec<Option<usize>>,
    pub(crate) break_labels: Vec<BreakContext>,
    /// Number of enclosing try regions in this method at the point being
    /// compiled. Return and break must pop that many handlers on the way
    /// out so the handler stack keeps mirroring the lexical nesting.
    pub(crate) try_depth: usize,
}

impl MethodBuilder {
    pub(crate) fn new(name: impl Into<String>, variadic: bool, is_instance: bool) -> Self {
        let mut method = Method::new(name);
        method.variadic = variadic;
        method.is_instance = is_instance;
        Self {
            method,
            labels: Vec::new(),
            break_labels: Vec::new(),
            try_depth: 0,
        }
    }

    pub(crate) fn emit(&mut self, op: OpCode, operand: i32, span: Span) -> usize {
        let index = self.method.body.len();
        self.method.body.push(Instruction::new(op, operand, span));
        index
    }

    /// Allocate an unbound label.
    pub(crate) fn create_label(&mut self) -> usize {
        self.labels.push(None);
        self.labels.len() - 1
    }

    /// Bind a label to the current instruction count.
    pub(crate) fn mark_label(&mut self, label: usize) {
        self.labels[label] = Some(self.method.body.len());
    }

    /// Rewrite every jump operand from a label id to the label's bound
    /// absolute address. Returns the labels that were never bound.
    pub(crate) fn finalize_labels(&mut self) -> Vec<usize> {
        let mut unbound = Vec::new();
        for instr in &mut self.method.body {
            if instr.op.is_jump() {
                let label = instr.operand as usize;
                match self.labels.get(label).copied().flatten() {
                    Some(address) => instr.operand = address as i32,
                    None => unbound.push(label),
                }
            }
        }
        unbound
    }
}

/// The compiler: transforms a parsed program into a compiled module.
pub struct Compiler {
    pub(crate) module_name: String,
    pub(crate) constants: Vec<Constant>,
    pub(crate) attributes: Vec<(String, Constant)>,
    pub(crate) imports: Vec<String>,
    pub(crate) symbols: SymbolTable,
    pub(crate) builders: Vec<MethodBuilder>,
    pub(crate) errors: Vec<Diagnostic>,
    /// Names of classes currently being compiled; non-empty inside methods.
    pub(crate) class_stack: Vec<String>,
    options: CompilerOptions,
}

/// Compile a program into a module with default options.
pub fn compile_module(name: &str, program: &Program) -> Result<CompiledModule, CompileErrors> {
    compile_module_with(name, program, CompilerOptions::default())
}

/// Compile a program into a module.
pub fn compile_module_with(
    name: &str,
    program: &Program,
    options: CompilerOptions,
) -> Result<CompiledModule, CompileErrors> {
    let mut compiler = Compiler {
        module_name: name.to_string(),
        constants: Vec::new(),
        attributes: Vec::new(),
        imports: Vec::new(),
        symbols: SymbolTable::new(),
        builders: vec![MethodBuilder::new("<init>", false, false)],
        errors: Vec::new(),
        class_stack: Vec::new(),
        options,
    };

    for stmt in &program.statements {
        match &stmt.kind {
            StmtKind::Function(decl) => compiler.register_function(decl),
            StmtKind::Class(decl) => compiler.register_class(decl),
            StmtKind::Enum(decl) => compiler.register_enum(decl),
            _ => compiler.compile_stmt(stmt),
        }
    }

    // Implicit null result for the initializer.
    let null_idx = compiler.add_constant(Constant::Null);
    compiler.emit(OpCode::LoadConst, null_idx, Span::default());
    compiler.emit(OpCode::Return, 0, Span::default());

    let mut initializer = compiler.finish_builder(Span::default());
    initializer.local_count = compiler.symbols.local_high_water();

    if compiler.errors.is_empty() {
        Ok(CompiledModule {
            name: compiler.module_name,
            constants: compiler.constants,
            initializer: Rc::new(initializer),
            attributes: compiler.attributes,
            imports: compiler.imports,
        })
    } else {
        Err(CompileErrors::new(compiler.errors))
    }
}

impl Compiler {
    // --- Emission helpers ---

    pub(crate) fn builder(&mut self) -> &mut MethodBuilder {
        self.builders.last_mut().expect("builder stack is never empty")
    }

    pub(crate) fn emit(&mut self, op: OpCode, operand: i32, span: Span) -> usize {
        self.builder().emit(op, operand, span)
    }

    /// Add a constant to the module pool, reusing existing string and name
    /// entries. The pool itself is append-only.
    pub(crate) fn add_constant(&mut self, constant: Constant) -> i32 {
        if matches!(constant, Constant::Str(_) | Constant::Name(_) | Constant::Null) {
            for (i, existing) in self.constants.iter().enumerate() {
                if *existing == constant {
                    return i as i32;
                }
            }
        }
        self.constants.push(constant);
        (self.constants.len() - 1) as i32
    }

    pub(crate) fn name_constant(&mut self, name: &str) -> i32 {
        self.add_constant(Constant::Name(name.to_string()))
    }

    pub(crate) fn error(&mut self, span: Span, message: impl Into<String>) {
        self.errors.push(Diagnostic::semantic(span, message));
    }

    // --- Label helpers ---

    pub(crate) fn create_label(&mut self) -> usize {
        self.builder().create_label()
    }

    pub(crate) fn mark_label(&mut self, label: usize) {
        self.builder().mark_label(label)
    }

    // --- Function-level pass ---

    /// Compile a function body into a finished method. Lambdas and nested
    /// functions enter a child scope of wherever they appear, so their slot
    /// numbering continues the enclosing function's and closure captures
    /// line up with the enclosing locals array.
    pub(crate) fn compile_function(
        &mut self,
        name: &str,
        params: &[Parameter],
        variadic: bool,
        body: &[crate::ast::Stmt],
        is_instance: bool,
        span: Span,
    ) -> Rc<Method> {
        self.symbols.enter_scope();
        let locals_start = self.symbols.local_count();
        self.builders
            .push(MethodBuilder::new(name, variadic, is_instance));

        for param in params {
            let symbol = self.symbols.add_symbol(&param.name);
            self.builder()
                .method
                .params
                .push((param.name.clone(), symbol.index));
        }

        for stmt in body {
            self.compile_stmt(stmt);
        }

        // Implicit null return; unreachable when the body already returned,
        // and dropped by the optimizer in that case.
        let null_idx = self.add_constant(Constant::Null);
        self.emit(OpCode::LoadConst, null_idx, span);
        self.emit(OpCode::Return, 0, span);

        let mut method = self.finish_builder(span);
        method.local_count = self.symbols.local_count() - locals_start;
        self.symbols.exit_scope();
        Rc::new(method)
    }

    /// Finalize labels, optionally optimize, and pop the builder.
    pub(crate) fn finish_builder(&mut self, span: Span) -> Method {
        let mut builder = self.builders.pop().expect("builder stack is never empty");

        let unbound = builder.finalize_labels();
        for label in unbound {
            self.errors.push(Diagnostic::semantic(
                span,
                format!("jump label {} was never bound", label),
            ));
        }

        if self.options.optimize && self.errors.is_empty() {
            optimizer::eliminate_dead_code(&mut builder.method.body);
        }

        builder.method
    }
}
