//! Core parser struct and helper methods.

use crate::ast::*;
use crate::error::{Diagnostic, ParserError};
use crate::lexer::{Token, TokenKind};
use crate::span::Span;

pub type ParseResult<T> = Result<T, ParserError>;

/// Recursive-descent parser for Vesper.
///
/// Parse errors are recorded in a sink and the parser re-synchronizes at the
/// next statement boundary, so one pass reports every syntax error it can.
pub struct Parser {
    pub(crate) tokens: Vec<Token>,
    pub(crate) current: usize,
    pub(crate) errors: Vec<Diagnostic>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            errors: Vec::new(),
        }
    }

    /// Parse a complete program. Returns the statements that parsed cleanly
    /// plus every diagnostic recorded along the way.
    pub fn parse(mut self) -> (Program, Vec<Diagnostic>) {
        let mut statements = Vec::new();

        while !self.is_at_end() {
            match self.declaration() {
                Ok(stmt) => statements.push(stmt),
                Err(err) => {
                    self.errors.push(err.into());
                    self.synchronize();
                }
            }
        }

        (Program::new(statements), self.errors)
    }

    // --- Token helpers ---

    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    pub(crate) fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    pub(crate) fn peek_at(&self, offset: usize) -> &TokenKind {
        let idx = (self.current + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    pub(crate) fn previous_span(&self) -> Span {
        self.tokens[self.current.saturating_sub(1)].span
    }

    pub(crate) fn is_at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    pub(crate) fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.is_at_end() {
            self.current += 1;
        }
        token
    }

    /// Compare token kinds ignoring any carried data.
    pub(crate) fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    pub(crate) fn match_kind(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn consume(&mut self, kind: &TokenKind, expected: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else if self.is_at_end() {
            Err(ParserError::UnexpectedEof(self.peek().span))
        } else {
            Err(ParserError::unexpected_token(
                expected,
                self.peek_kind().describe(),
                self.peek().span,
            ))
        }
    }

    pub(crate) fn consume_identifier(&mut self, expected: &str) -> ParseResult<(String, Span)> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                let span = self.peek().span;
                self.advance();
                Ok((name, span))
            }
            other => Err(ParserError::unexpected_token(
                expected,
                other.describe(),
                self.peek().span,
            )),
        }
    }

    /// Skip forward to the next likely statement boundary after an error.
    /// Always consumes the offending token so recovery can never loop.
    pub(crate) fn synchronize(&mut self) {
        self.advance();
        while !self.is_at_end() {
            if matches!(self.tokens[self.current - 1].kind, TokenKind::Semicolon) {
                return;
            }
            match self.peek_kind() {
                TokenKind::Function
                | TokenKind::Class
                | TokenKind::Enum
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Break
                | TokenKind::Return
                | TokenKind::Try
                | TokenKind::Raise
                | TokenKind::Import
                | TokenKind::From
                | TokenKind::RightBrace => return,
                _ => {
                    self.advance();
                }
            }
        }
    }
}
