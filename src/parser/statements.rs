//! Statement and declaration parsing.

use crate::ast::*;
use crate::error::ParserError;
use crate::lexer::TokenKind;
use crate::parser::core::{ParseResult, Parser};

impl Parser {
    /// Parse a declaration or statement.
    pub(crate) fn declaration(&mut self) -> ParseResult<Stmt> {
        match self.peek_kind() {
            // `function name(...)` is a declaration; `function (...)` is a
            // lambda expression and falls through to statement parsing.
            TokenKind::Function if matches!(self.peek_at(1), TokenKind::Identifier(_)) => {
                let decl = self.function_decl()?;
                let span = decl.span;
                Ok(Stmt::new(StmtKind::Function(decl), span))
            }
            TokenKind::Class => self.class_decl(),
            TokenKind::Enum => self.enum_decl(),
            TokenKind::Import | TokenKind::From => self.import_decl(),
            _ => self.statement(),
        }
    }

    pub(crate) fn statement(&mut self) -> ParseResult<Stmt> {
        match self.peek_kind() {
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Break => {
                let span = self.advance().span;
                self.consume(&TokenKind::Semicolon, "';' after 'break'")?;
                Ok(Stmt::new(StmtKind::Break, span))
            }
            TokenKind::Return => {
                let span = self.advance().span;
                let value = if self.check(&TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.consume(&TokenKind::Semicolon, "';' after return value")?;
                Ok(Stmt::new(StmtKind::Return(value), span))
            }
            TokenKind::Raise => {
                let span = self.advance().span;
                let value = self.expression()?;
                self.consume(&TokenKind::Semicolon, "';' after raised value")?;
                Ok(Stmt::new(StmtKind::Raise(value), span))
            }
            TokenKind::Try => self.try_statement(),
            _ => {
                let expr = self.expression()?;
                let span = expr.span;
                self.consume(&TokenKind::Semicolon, "';' after expression")?;
                Ok(Stmt::new(StmtKind::Expression(expr), span))
            }
        }
    }

    /// Parse a brace-delimited block. Errors inside the block are recorded
    /// and recovery continues at the next statement, like the top level.
    pub(crate) fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.consume(&TokenKind::LeftBrace, "'{'")?;
        let mut statements = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            match self.declaration() {
                Ok(stmt) => statements.push(stmt),
                Err(err) => {
                    self.errors.push(err.into());
                    self.synchronize();
                }
            }
        }
        self.consume(&TokenKind::RightBrace, "'}'")?;
        Ok(statements)
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        let span = self.advance().span;
        self.consume(&TokenKind::LeftParen, "'(' after 'if'")?;
        let condition = self.expression()?;
        self.consume(&TokenKind::RightParen, "')' after condition")?;
        let then_branch = self.block()?;

        let mut elif_branches = Vec::new();
        while self.match_kind(&TokenKind::Elif) {
            self.consume(&TokenKind::LeftParen, "'(' after 'elif'")?;
            let elif_cond = self.expression()?;
            self.consume(&TokenKind::RightParen, "')' after condition")?;
            elif_branches.push((elif_cond, self.block()?));
        }

        let else_branch = if self.match_kind(&TokenKind::Else) {
            Some(self.block()?)
        } else {
            None
        };

        Ok(Stmt::new(
            StmtKind::If {
                condition,
                then_branch,
                elif_branches,
                else_branch,
            },
            span,
        ))
    }

    fn while_statement(&mut self) -> ParseResult<Stmt> {
        let span = self.advance().span;
        self.consume(&TokenKind::LeftParen, "'(' after 'while'")?;
        let condition = self.expression()?;
        self.consume(&TokenKind::RightParen, "')' after condition")?;
        let body = self.block()?;
        Ok(Stmt::new(StmtKind::While { condition, body }, span))
    }

    fn for_statement(&mut self) -> ParseResult<Stmt> {
        let span = self.advance().span;
        self.consume(&TokenKind::LeftParen, "'(' after 'for'")?;
        let (variable, _) = self.consume_identifier("loop variable")?;
        self.consume(&TokenKind::In, "'in'")?;
        let iterable = self.expression()?;
        self.consume(&TokenKind::RightParen, "')' after iterable")?;
        let body = self.block()?;
        Ok(Stmt::new(
            StmtKind::For {
                variable,
                iterable,
                body,
            },
            span,
        ))
    }

    fn try_statement(&mut self) -> ParseResult<Stmt> {
        let span = self.advance().span;
        let body = self.block()?;

        let mut clauses = Vec::new();
        while self.check(&TokenKind::Except) {
            let clause_span = self.advance().span;
            self.consume(&TokenKind::LeftParen, "'(' after 'except'")?;
            let (variable, _) = self.consume_identifier("exception variable")?;
            let filter = if self.match_kind(&TokenKind::Colon) {
                Some(self.expression()?)
            } else {
                None
            };
            self.consume(&TokenKind::RightParen, "')' after exception variable")?;
            let clause_body = self.block()?;
            clauses.push(ExceptClause {
                variable,
                filter,
                body: clause_body,
                span: clause_span,
            });
        }

        if clauses.is_empty() {
            return Err(ParserError::general(
                "try statement requires at least one except clause",
                span,
            ));
        }

        Ok(Stmt::new(StmtKind::Try { body, clauses }, span))
    }

    /// Parse `function name(params) { body }`. The `function` keyword is
    /// still unconsumed on entry.
    pub(crate) fn function_decl(&mut self) -> ParseResult<FunctionDecl> {
        let span = self.advance().span;
        let (name, _) = self.consume_identifier("function name")?;
        let (params, variadic) = self.parameter_list()?;
        let body = self.block()?;
        Ok(FunctionDecl {
            name,
            params,
            variadic,
            body,
            span,
        })
    }

    /// Parse `(a, b, rest...)`. Returns the parameters and the variadic flag.
    pub(crate) fn parameter_list(&mut self) -> ParseResult<(Vec<Parameter>, bool)> {
        self.consume(&TokenKind::LeftParen, "'(' before parameters")?;
        let mut params = Vec::new();
        let mut variadic = false;

        if !self.check(&TokenKind::RightParen) {
            loop {
                let (name, span) = self.consume_identifier("parameter name")?;
                params.push(Parameter { name, span });
                if self.match_kind(&TokenKind::Ellipsis) {
                    variadic = true;
                    break;
                }
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }

        self.consume(&TokenKind::RightParen, "')' after parameters")?;
        Ok((params, variadic))
    }

    fn class_decl(&mut self) -> ParseResult<Stmt> {
        let span = self.advance().span;
        let (name, _) = self.consume_identifier("class name")?;

        let base = if self.match_kind(&TokenKind::Colon) {
            let (base_name, _) = self.consume_identifier("superclass name")?;
            Some(base_name)
        } else {
            None
        };

        self.consume(&TokenKind::LeftBrace, "'{' before class body")?;
        let mut methods = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            if !self.check(&TokenKind::Function) {
                return Err(ParserError::unexpected_token(
                    "method declaration",
                    self.peek_kind().describe(),
                    self.peek().span,
                ));
            }
            methods.push(self.function_decl()?);
        }
        self.consume(&TokenKind::RightBrace, "'}' after class body")?;

        Ok(Stmt::new(
            StmtKind::Class(ClassDecl {
                name,
                base,
                methods,
                span,
            }),
            span,
        ))
    }

    fn enum_decl(&mut self) -> ParseResult<Stmt> {
        let span = self.advance().span;
        let (name, _) = self.consume_identifier("enum name")?;
        self.consume(&TokenKind::LeftBrace, "'{' before enum members")?;

        let mut members = Vec::new();
        if !self.check(&TokenKind::RightBrace) {
            loop {
                let (member, _) = self.consume_identifier("enum member")?;
                members.push(member);
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightBrace, "'}' after enum members")?;

        Ok(Stmt::new(
            StmtKind::Enum(EnumDecl {
                name,
                members,
                span,
            }),
            span,
        ))
    }

    fn import_decl(&mut self) -> ParseResult<Stmt> {
        if self.check(&TokenKind::Import) {
            // import "path";
            let span = self.advance().span;
            let path = self.consume_string_literal("module path")?;
            self.consume(&TokenKind::Semicolon, "';' after import")?;
            return Ok(Stmt::new(
                StmtKind::Import(ImportDecl {
                    path,
                    items: ImportItems::Module,
                    span,
                }),
                span,
            ));
        }

        // from "path" import a, b; / from "path" import *;
        let span = self.advance().span;
        let path = self.consume_string_literal("module path")?;
        self.consume(&TokenKind::Import, "'import'")?;

        let items = if self.match_kind(&TokenKind::Star) {
            ImportItems::All
        } else {
            let mut names = Vec::new();
            loop {
                let (name, _) = self.consume_identifier("imported name")?;
                names.push(name);
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
            }
            ImportItems::Names(names)
        };

        self.consume(&TokenKind::Semicolon, "';' after import")?;
        Ok(Stmt::new(
            StmtKind::Import(ImportDecl { path, items, span }),
            span,
        ))
    }

    fn consume_string_literal(&mut self, expected: &str) -> ParseResult<String> {
        match self.peek_kind().clone() {
            TokenKind::StringLiteral(s) => {
                self.advance();
                Ok(s)
            }
            other => Err(ParserError::unexpected_token(
                expected,
                other.describe(),
                self.peek().span,
            )),
        }
    }
}
