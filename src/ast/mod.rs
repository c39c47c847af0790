//! Abstract Syntax Tree for Vesper.

pub mod expr;
pub mod stmt;

pub use expr::{BinaryOp, Expr, ExprKind, LogicalOp, UnaryOp};
pub use stmt::{
    ClassDecl, EnumDecl, ExceptClause, FunctionDecl, ImportDecl, ImportItems, Parameter, Program,
    Stmt, StmtKind,
};
