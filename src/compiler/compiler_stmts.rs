//! Statement compilation. Every statement leaves the operand stack depth
//! exactly where it found it.

use crate::ast::{ExceptClause, Expr, ImportDecl, ImportItems, Stmt, StmtKind};
use crate::bytecode::instruction::OpCode;
use crate::bytecode::method::Constant;
use crate::span::Span;

use super::compiler::{BreakContext, Compiler};

impl Compiler {
    pub(crate) fn compile_stmt(&mut self, stmt: &Stmt) {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::Expression(expr) => {
                self.compile_expr(expr);
                self.emit(OpCode::Pop, 0, span);
            }
            StmtKind::If {
                condition,
                then_branch,
                elif_branches,
                else_branch,
            } => {
                self.compile_if(condition, then_branch, elif_branches, else_branch.as_deref(), span);
            }
            StmtKind::While { condition, body } => {
                self.compile_while(condition, body, span);
            }
            StmtKind::For {
                variable,
                iterable,
                body,
            } => {
                self.compile_for(variable, iterable, body, span);
            }
            StmtKind::Break => {
                match self.builder().break_labels.last().copied() {
                    Some(ctx) => {
                        // Leaving any try regions between here and the loop
                        // unregisters their handlers.
                        let pops = self.builder().try_depth - ctx.try_depth;
                        for _ in 0..pops {
                            self.emit(OpCode::PopExceptionHandler, 0, span);
                        }
                        self.emit(OpCode::Jump, ctx.label as i32, span);
                    }
                    None => self.error(span, "'break' outside of a loop"),
                }
            }
            StmtKind::Return(value) => {
                match value {
                    Some(expr) => self.compile_expr(expr),
                    None => {
                        let idx = self.add_constant(Constant::Null);
                        self.emit(OpCode::LoadConst, idx, span);
                    }
                }
                // Returning out of try regions unregisters their handlers;
                // the return value is computed first, still guarded.
                let pops = self.builder().try_depth;
                for _ in 0..pops {
                    self.emit(OpCode::PopExceptionHandler, 0, span);
                }
                self.emit(OpCode::Return, 0, span);
            }
            StmtKind::Raise(expr) => {
                self.compile_expr(expr);
                self.emit(OpCode::Raise, 0, span);
            }
            StmtKind::Try { body, clauses } => {
                self.compile_try(body, clauses, span);
            }
            StmtKind::Function(decl) => {
                // A declaration below module level becomes a closure bound
                // to a local, so it can capture the enclosing frame.
                if self.symbols.at_global_scope() {
                    // Reached only for declarations the module pass did not
                    // intercept; register it like the module pass would.
                    self.register_function(decl);
                    return;
                }
                // The name is bound before the body compiles so the function
                // can call itself through its own slot.
                let symbol = self.symbols.add_symbol(&decl.name);
                let method = self.compile_function(
                    &decl.name,
                    &decl.params,
                    decl.variadic,
                    &decl.body,
                    false,
                    decl.span,
                );
                let idx = self.add_constant(Constant::Method(method));
                self.emit(OpCode::BuildClosure, idx, span);
                self.emit(OpCode::StoreLocal, symbol.index as i32, span);
            }
            StmtKind::Class(decl) => {
                self.error(
                    decl.span,
                    "class declarations are only allowed at module level",
                );
            }
            StmtKind::Enum(decl) => {
                self.error(
                    decl.span,
                    "enum declarations are only allowed at module level",
                );
            }
            StmtKind::Import(decl) => {
                self.compile_import(decl, span);
            }
        }
    }

    fn compile_if(
        &mut self,
        condition: &Expr,
        then_branch: &[Stmt],
        elif_branches: &[(Expr, Vec<Stmt>)],
        else_branch: Option<&[Stmt]>,
        span: Span,
    ) {
        let end_label = self.create_label();

        let mut arms: Vec<(&Expr, &[Stmt])> = vec![(condition, then_branch)];
        for (cond, body) in elif_branches {
            arms.push((cond, body.as_slice()));
        }

        for (cond, body) in arms {
            let next_label = self.create_label();
            self.compile_expr(cond);
            self.emit(OpCode::JumpIfFalse, next_label as i32, span);
            self.compile_block(body);
            self.emit(OpCode::Jump, end_label as i32, span);
            self.mark_label(next_label);
        }

        if let Some(body) = else_branch {
            self.compile_block(body);
        }
        self.mark_label(end_label);
    }

    fn compile_while(&mut self, condition: &Expr, body: &[Stmt], span: Span) {
        let top_label = self.create_label();
        let break_label = self.create_label();

        self.mark_label(top_label);
        self.compile_expr(condition);
        self.emit(OpCode::JumpIfFalse, break_label as i32, span);

        let ctx = BreakContext {
            label: break_label,
            try_depth: self.builder().try_depth,
        };
        self.builder().break_labels.push(ctx);
        self.compile_block(body);
        self.builder().break_labels.pop();

        self.emit(OpCode::Jump, top_label as i32, span);
        self.mark_label(break_label);
    }

    /// for-in lowers to the iterator protocol. The iterator value stays on
    /// the operand stack for the duration of the loop and is popped after
    /// the break label, so break still leaves the statement balanced.
    fn compile_for(&mut self, variable: &str, iterable: &Expr, body: &[Stmt], span: Span) {
        self.symbols.enter_scope();
        let symbol = self.symbols.add_symbol(variable);

        self.compile_expr(iterable);
        self.emit(OpCode::IterReset, 0, span);

        let top_label = self.create_label();
        let break_label = self.create_label();

        self.mark_label(top_label);
        self.emit(OpCode::IterMoveNext, 0, span);
        self.emit(OpCode::JumpIfFalse, break_label as i32, span);
        self.emit(OpCode::IterGetNext, 0, span);
        self.emit(OpCode::StoreLocal, symbol.index as i32, span);

        let ctx = BreakContext {
            label: break_label,
            try_depth: self.builder().try_depth,
        };
        self.builder().break_labels.push(ctx);
        self.compile_block(body);
        self.builder().break_labels.pop();

        self.emit(OpCode::Jump, top_label as i32, span);
        self.mark_label(break_label);
        self.emit(OpCode::Pop, 0, span);

        self.symbols.exit_scope();
    }

    /// try/except lowering. The handler registration brackets the guarded
    /// body exactly; clause filters are tested against the caught exception
    /// with InstanceOf and an unmatched exception is re-raised.
    fn compile_try(&mut self, body: &[Stmt], clauses: &[ExceptClause], span: Span) {
        let except_label = self.create_label();
        let end_label = self.create_label();

        self.emit(OpCode::PushExceptionHandler, except_label as i32, span);
        self.builder().try_depth += 1;
        self.compile_block(body);
        self.builder().try_depth -= 1;
        self.emit(OpCode::PopExceptionHandler, 0, span);
        self.emit(OpCode::Jump, end_label as i32, span);

        self.mark_label(except_label);
        self.emit(OpCode::BeginExcept, 0, span);

        let mut all_filtered = true;
        for clause in clauses {
            let next_label = self.create_label();

            if let Some(filter) = &clause.filter {
                self.emit(OpCode::LoadException, 0, clause.span);
                self.compile_expr(filter);
                self.emit(OpCode::InstanceOf, 0, clause.span);
                self.emit(OpCode::JumpIfFalse, next_label as i32, clause.span);
            } else {
                all_filtered = false;
            }

            self.symbols.enter_scope();
            let symbol = self.symbols.add_symbol(&clause.variable);
            self.emit(OpCode::LoadException, 0, clause.span);
            self.emit(OpCode::StoreLocal, symbol.index as i32, clause.span);
            self.compile_block(&clause.body);
            self.symbols.exit_scope();

            self.emit(OpCode::Jump, end_label as i32, clause.span);
            self.mark_label(next_label);

            if clause.filter.is_none() {
                // An unfiltered clause catches everything; later clauses
                // are unreachable and the optimizer drops them.
                break;
            }
        }

        if all_filtered {
            // No clause matched: propagate to the next enclosing handler.
            self.emit(OpCode::LoadException, 0, span);
            self.emit(OpCode::Raise, 0, span);
        }

        self.mark_label(end_label);
    }

    fn compile_import(&mut self, decl: &ImportDecl, span: Span) {
        if self.builders.len() > 1 || !self.symbols.at_global_scope() {
            self.error(span, "imports are only allowed at module level");
            return;
        }

        self.imports.push(decl.path.clone());
        let path_idx = self.add_constant(Constant::Str(decl.path.clone()));

        match &decl.items {
            ImportItems::Module => {
                self.emit(OpCode::Import, path_idx, span);
                let stem = module_stem(&decl.path);
                self.symbols.add_symbol(&stem);
                let name_idx = self.name_constant(&stem);
                self.emit(OpCode::StoreGlobal, name_idx, span);
            }
            ImportItems::Names(names) => {
                self.emit(OpCode::Import, path_idx, span);
                for name in names {
                    let name_idx = self.name_constant(name);
                    self.emit(OpCode::Dup, 0, span);
                    self.emit(OpCode::ImportFrom, name_idx, span);
                }
                self.emit(OpCode::Pop, 0, span);
            }
            ImportItems::All => {
                self.emit(OpCode::Import, path_idx, span);
                self.emit(OpCode::ImportAll, 0, span);
            }
        }
    }

    pub(crate) fn compile_block(&mut self, body: &[Stmt]) {
        self.symbols.enter_scope();
        for stmt in body {
            self.compile_stmt(stmt);
        }
        self.symbols.exit_scope();
    }
}

/// The name an `import "path"` statement binds the module under: the last
/// path segment without its extension.
pub fn module_stem(path: &str) -> String {
    let segment = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match segment.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => segment.to_string(),
    }
}
