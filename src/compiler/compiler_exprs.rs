//! Expression compilation. Every expression leaves exactly one value on the
//! operand stack.

use crate::ast::{BinaryOp, Expr, ExprKind, LogicalOp, UnaryOp};
use crate::bytecode::instruction::{BinaryOpKind, OpCode, UnaryOpKind};
use crate::bytecode::method::Constant;
use crate::compiler::symbols::SymbolKind;
use crate::span::Span;

use super::compiler::Compiler;

impl Compiler {
    pub(crate) fn compile_expr(&mut self, expr: &Expr) {
        let span = expr.span;
        match &expr.kind {
            ExprKind::IntLiteral(n) => {
                let idx = self.add_constant(Constant::Int(*n));
                self.emit(OpCode::LoadConst, idx, span);
            }
            ExprKind::FloatLiteral(n) => {
                let idx = self.add_constant(Constant::Float(*n));
                self.emit(OpCode::LoadConst, idx, span);
            }
            ExprKind::StringLiteral(s) => {
                let idx = self.add_constant(Constant::Str(s.clone()));
                self.emit(OpCode::LoadConst, idx, span);
            }
            ExprKind::BoolLiteral(b) => {
                let idx = self.add_constant(Constant::Bool(*b));
                self.emit(OpCode::LoadConst, idx, span);
            }
            ExprKind::Null => {
                let idx = self.add_constant(Constant::Null);
                self.emit(OpCode::LoadConst, idx, span);
            }
            ExprKind::Variable(name) => {
                self.compile_variable_load(name, span);
            }
            ExprKind::Binary {
                left,
                operator,
                right,
            } => {
                self.compile_expr(left);
                self.compile_expr(right);
                let kind = binary_kind(*operator);
                self.emit(OpCode::BinOp, kind as i32, span);
            }
            ExprKind::Logical {
                left,
                operator,
                right,
            } => {
                // Short-circuit: keep the left value as the result when it
                // decides the outcome.
                self.compile_expr(left);
                let end_label = self.create_label();
                let jump = match operator {
                    LogicalOp::And => OpCode::JumpIfFalse,
                    LogicalOp::Or => OpCode::JumpIfTrue,
                };
                self.emit(OpCode::Dup, 0, span);
                self.emit(jump, end_label as i32, span);
                self.emit(OpCode::Pop, 0, span);
                self.compile_expr(right);
                self.mark_label(end_label);
            }
            ExprKind::Unary { operator, operand } => {
                self.compile_expr(operand);
                let kind = match operator {
                    UnaryOp::Negate => UnaryOpKind::Negate,
                    UnaryOp::Not => UnaryOpKind::Not,
                };
                self.emit(OpCode::UnaryOp, kind as i32, span);
            }
            ExprKind::Call { callee, arguments } => {
                self.compile_expr(callee);
                for arg in arguments {
                    self.compile_expr(arg);
                }
                self.emit(OpCode::Invoke, arguments.len() as i32, span);
            }
            ExprKind::SuperCall { arguments } => {
                if self.class_stack.is_empty() {
                    self.error(span, "'super' outside of a class method");
                }
                for arg in arguments {
                    self.compile_expr(arg);
                }
                self.emit(OpCode::InvokeSuper, arguments.len() as i32, span);
            }
            ExprKind::Attribute { object, name } => {
                self.compile_expr(object);
                let idx = self.name_constant(name);
                self.emit(OpCode::LoadAttribute, idx, span);
            }
            ExprKind::Index { object, index } => {
                self.compile_expr(object);
                self.compile_expr(index);
                self.emit(OpCode::LoadIndex, 0, span);
            }
            ExprKind::This => {
                self.emit(OpCode::LoadSelf, 0, span);
            }
            ExprKind::List(elements) => {
                for element in elements {
                    self.compile_expr(element);
                }
                self.emit(OpCode::BuildList, elements.len() as i32, span);
            }
            ExprKind::Tuple(elements) => {
                for element in elements {
                    self.compile_expr(element);
                }
                self.emit(OpCode::BuildTuple, elements.len() as i32, span);
            }
            ExprKind::Assign { target, value } => {
                self.compile_assign(target, value, span);
            }
            ExprKind::Lambda {
                params,
                variadic,
                body,
            } => {
                let method =
                    self.compile_function("<lambda>", params, *variadic, body, false, span);
                let idx = self.add_constant(Constant::Method(method));
                self.emit(OpCode::BuildClosure, idx, span);
            }
        }
    }

    fn compile_variable_load(&mut self, name: &str, span: Span) {
        match self.symbols.symbol_index(name) {
            Some(symbol) if symbol.kind == SymbolKind::Local => {
                self.emit(OpCode::LoadLocal, symbol.index as i32, span);
            }
            // A global binding, or no binding at all: either way the lookup
            // is deferred to runtime. Reading an unresolved name is not a
            // compile error.
            _ => {
                let idx = self.name_constant(name);
                self.emit(OpCode::LoadGlobal, idx, span);
            }
        }
    }

    /// Assignment is an expression: each lowering stores and then reloads so
    /// the assigned value is left on the stack.
    fn compile_assign(&mut self, target: &Expr, value: &Expr, span: Span) {
        self.compile_expr(value);

        match &target.kind {
            ExprKind::Variable(name) => {
                let symbol = match self.symbols.symbol_index(name) {
                    Some(symbol) => symbol,
                    // Assignment to an unresolved name implicitly declares
                    // it in the currently active scope.
                    None => self.symbols.add_symbol(name),
                };
                match symbol.kind {
                    SymbolKind::Local => {
                        self.emit(OpCode::StoreLocal, symbol.index as i32, span);
                        self.emit(OpCode::LoadLocal, symbol.index as i32, span);
                    }
                    SymbolKind::Global => {
                        let idx = self.name_constant(name);
                        self.emit(OpCode::StoreGlobal, idx, span);
                        self.emit(OpCode::LoadGlobal, idx, span);
                    }
                }
            }
            ExprKind::Attribute { object, name } => {
                let idx = self.name_constant(name);
                self.compile_expr(object);
                self.emit(OpCode::StoreAttribute, idx, span);
                self.compile_expr(object);
                self.emit(OpCode::LoadAttribute, idx, span);
            }
            ExprKind::Index { object, index } => {
                self.compile_expr(object);
                self.compile_expr(index);
                self.emit(OpCode::StoreIndex, 0, span);
                self.compile_expr(object);
                self.compile_expr(index);
                self.emit(OpCode::LoadIndex, 0, span);
            }
            _ => self.error(target.span, "invalid assignment target"),
        }
    }
}

fn binary_kind(op: BinaryOp) -> BinaryOpKind {
    match op {
        BinaryOp::Add => BinaryOpKind::Add,
        BinaryOp::Subtract => BinaryOpKind::Subtract,
        BinaryOp::Multiply => BinaryOpKind::Multiply,
        BinaryOp::Divide => BinaryOpKind::Divide,
        BinaryOp::Modulo => BinaryOpKind::Modulo,
        BinaryOp::Equal => BinaryOpKind::Equal,
        BinaryOp::NotEqual => BinaryOpKind::NotEqual,
        BinaryOp::Less => BinaryOpKind::Less,
        BinaryOp::LessEqual => BinaryOpKind::LessEqual,
        BinaryOp::Greater => BinaryOpKind::Greater,
        BinaryOp::GreaterEqual => BinaryOpKind::GreaterEqual,
    }
}
