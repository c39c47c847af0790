//! Error types for all compilation phases and the runtime.

use crate::span::Span;
use std::fmt;
use thiserror::Error;

/// Lexer errors.
#[derive(Debug, Error)]
pub enum LexerError {
    #[error("Unexpected character '{0}' at {1}")]
    UnexpectedChar(char, Span),

    #[error("Unterminated string at {0}")]
    UnterminatedString(Span),

    #[error("Invalid escape sequence '\\{0}' at {1}")]
    InvalidEscape(char, Span),

    #[error("Invalid number '{0}' at {1}")]
    InvalidNumber(String, Span),
}

impl LexerError {
    pub fn span(&self) -> Span {
        match self {
            Self::UnexpectedChar(_, span) => *span,
            Self::UnterminatedString(span) => *span,
            Self::InvalidEscape(_, span) => *span,
            Self::InvalidNumber(_, span) => *span,
        }
    }
}

/// Parser errors.
#[derive(Debug, Error)]
pub enum ParserError {
    #[error("Unexpected token '{found}', expected {expected} at {span}")]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("Unexpected end of file at {0}")]
    UnexpectedEof(Span),

    #[error("Invalid assignment target at {0}")]
    InvalidAssignmentTarget(Span),

    #[error("{message} at {span}")]
    General { message: String, span: Span },
}

impl ParserError {
    pub fn unexpected_token(
        expected: impl Into<String>,
        found: impl Into<String>,
        span: Span,
    ) -> Self {
        Self::UnexpectedToken {
            expected: expected.into(),
            found: found.into(),
            span,
        }
    }

    pub fn general(message: impl Into<String>, span: Span) -> Self {
        Self::General {
            message: message.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::UnexpectedToken { span, .. } => *span,
            Self::UnexpectedEof(span) => *span,
            Self::InvalidAssignmentTarget(span) => *span,
            Self::General { span, .. } => *span,
        }
    }
}

/// What phase a compile-time diagnostic came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Lexical,
    Syntax,
    Semantic,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lexical => write!(f, "lexical"),
            Self::Syntax => write!(f, "syntax"),
            Self::Semantic => write!(f, "semantic"),
        }
    }
}

/// A single entry in the compile-time error sink.
///
/// Diagnostics accumulate across a whole pass; compilation never stops at the
/// first error. A pass that recorded any diagnostics yields no usable module.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub span: Span,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, span: Span, message: impl Into<String>) -> Self {
        Self {
            kind,
            span,
            message: message.into(),
        }
    }

    pub fn semantic(span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Semantic, span, message)
    }
}

impl From<LexerError> for Diagnostic {
    fn from(err: LexerError) -> Self {
        Diagnostic::new(DiagnosticKind::Lexical, err.span(), err.to_string())
    }
}

impl From<ParserError> for Diagnostic {
    fn from(err: ParserError) -> Self {
        Diagnostic::new(DiagnosticKind::Syntax, err.span(), err.to_string())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

/// Aggregate error carrying every diagnostic a pass produced.
#[derive(Debug)]
pub struct CompileErrors {
    pub diagnostics: Vec<Diagnostic>,
}

impl std::error::Error for CompileErrors {}

impl CompileErrors {
    pub fn new(diagnostics: Vec<Diagnostic>) -> Self {
        Self { diagnostics }
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} compile error(s):", self.diagnostics.len())?;
        for diag in &self.diagnostics {
            writeln!(f, "  {}", diag)?;
        }
        Ok(())
    }
}

/// Runtime errors.
///
/// Each variant maps onto a built-in exception class; an error escaping an
/// instruction handler is converted into an exception object and raised, so
/// every variant except `Uncaught` stays catchable by compiled try/except
/// regions.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Type error: {message} at {span}")]
    Type { message: String, span: Span },

    #[error("Argument error: {message} at {span}")]
    Argument { message: String, span: Span },

    #[error("Index out of bounds: {index} (length {length}) at {span}")]
    IndexOutOfBounds {
        index: i64,
        length: usize,
        span: Span,
    },

    #[error("IO error: {message} at {span}")]
    Io { message: String, span: Span },

    #[error("Key not found: {key} at {span}")]
    KeyNotFound { key: String, span: Span },

    #[error("'{target}' has no attribute '{name}' at {span}")]
    AttributeNotFound {
        target: String,
        name: String,
        span: Span,
    },

    #[error("Syntax error in imported module '{module}': {message}")]
    ModuleSyntax { module: String, message: String },

    #[error("{message} at {span}")]
    NotSupported { message: String, span: Span },

    #[error("Division by zero at {0}")]
    DivisionByZero(Span),

    #[error("Internal error: {message} at {span}")]
    Internal { message: String, span: Span },

    #[error("Undefined variable '{0}' at {1}")]
    UndefinedVariable(String, Span),

    #[error("{message} at {span}")]
    General { message: String, span: Span },

    /// An exception that reached the top of the handler stack. Fatal; carries
    /// the rendered frame-by-frame stack trace.
    #[error("Uncaught exception: {message}\n{trace}")]
    Uncaught { message: String, trace: String },
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self::General {
            message: message.into(),
            span,
        }
    }

    pub fn type_error(message: impl Into<String>, span: Span) -> Self {
        Self::Type {
            message: message.into(),
            span,
        }
    }

    pub fn argument(message: impl Into<String>, span: Span) -> Self {
        Self::Argument {
            message: message.into(),
            span,
        }
    }

    pub fn attribute_not_found(
        target: impl Into<String>,
        name: impl Into<String>,
        span: Span,
    ) -> Self {
        Self::AttributeNotFound {
            target: target.into(),
            name: name.into(),
            span,
        }
    }

    pub fn not_supported(message: impl Into<String>, span: Span) -> Self {
        Self::NotSupported {
            message: message.into(),
            span,
        }
    }

    pub fn internal(message: impl Into<String>, span: Span) -> Self {
        Self::Internal {
            message: message.into(),
            span,
        }
    }

    /// Name of the built-in exception class this error is raised as.
    pub fn exception_class(&self) -> &'static str {
        match self {
            Self::Type { .. } => "TypeError",
            Self::Argument { .. } => "ArgumentError",
            Self::IndexOutOfBounds { .. } => "IndexError",
            Self::Io { .. } => "IOError",
            Self::KeyNotFound { .. } => "KeyNotFoundError",
            Self::AttributeNotFound { .. } => "AttributeError",
            Self::ModuleSyntax { .. } => "SyntaxError",
            Self::NotSupported { .. } => "NotSupportedError",
            Self::DivisionByZero(_) => "TypeError",
            Self::Internal { .. } => "InternalError",
            Self::UndefinedVariable(..) | Self::General { .. } | Self::Uncaught { .. } => {
                "Exception"
            }
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::Type { span, .. }
            | Self::Argument { span, .. }
            | Self::IndexOutOfBounds { span, .. }
            | Self::Io { span, .. }
            | Self::KeyNotFound { span, .. }
            | Self::AttributeNotFound { span, .. }
            | Self::NotSupported { span, .. }
            | Self::Internal { span, .. }
            | Self::General { span, .. } => *span,
            Self::DivisionByZero(span) | Self::UndefinedVariable(_, span) => *span,
            Self::ModuleSyntax { .. } | Self::Uncaught { .. } => Span::default(),
        }
    }
}

/// A unified error type for all phases.
#[derive(Debug, Error)]
pub enum VesperError {
    #[error("{0}")]
    Compile(#[from] CompileErrors),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
