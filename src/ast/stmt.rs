//! Statement and declaration AST nodes.

use crate::ast::expr::Expr;
use crate::span::Span;

/// A complete parsed program (one module's worth of statements).
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }
}

/// A statement in the AST.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// All statement variants.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Expression statement: its value is discarded.
    Expression(Expr),

    /// if (cond) { ... } elif (cond) { ... } else { ... }
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        elif_branches: Vec<(Expr, Vec<Stmt>)>,
        else_branch: Option<Vec<Stmt>>,
    },

    /// while (cond) { ... }
    While { condition: Expr, body: Vec<Stmt> },

    /// for (x in iterable) { ... }
    For {
        variable: String,
        iterable: Expr,
        body: Vec<Stmt>,
    },

    /// break out of the innermost enclosing loop
    Break,

    /// return [expr]
    Return(Option<Expr>),

    /// raise expr
    Raise(Expr),

    /// try { ... } except (e) { ... }
    Try {
        body: Vec<Stmt>,
        clauses: Vec<ExceptClause>,
    },

    /// function name(params) { ... }
    Function(FunctionDecl),

    /// class Name : Base { methods }
    Class(ClassDecl),

    /// enum Name { A, B, C }
    Enum(EnumDecl),

    /// import "path"; / from "path" import a, b; / from "path" import *;
    Import(ImportDecl),
}

/// One except clause of a try statement. A clause with a filter only handles
/// exceptions that are instances of the filter class; the exception is bound
/// to `variable` inside the clause body.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptClause {
    pub variable: String,
    pub filter: Option<Expr>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// A function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub span: Span,
}

/// A named function declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Parameter>,
    /// Trailing `rest...` parameter collects extra arguments into a list.
    pub variadic: bool,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// A class declaration. Methods are ordinary function declarations compiled
/// as instance methods; `init` is the constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub base: Option<String>,
    pub methods: Vec<FunctionDecl>,
    pub span: Span,
}

/// An enum declaration: members are bound to consecutive integers from 0.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name: String,
    pub members: Vec<String>,
    pub span: Span,
}

/// What an import statement brings into the importing module.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportItems {
    /// import "path"; — binds the module object under its stem name.
    Module,
    /// from "path" import a, b; — merges the named attributes.
    Names(Vec<String>),
    /// from "path" import *; — merges every attribute.
    All,
}

/// An import declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub path: String,
    pub items: ImportItems,
    pub span: Span,
}
