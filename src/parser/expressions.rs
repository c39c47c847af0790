//! Expression parsing, lowest to highest precedence.

use crate::ast::*;
use crate::error::ParserError;
use crate::lexer::TokenKind;
use crate::parser::core::{ParseResult, Parser};

impl Parser {
    pub(crate) fn expression(&mut self) -> ParseResult<Expr> {
        self.assignment()
    }

    /// assignment is right-associative and an expression: `a = b = 1`.
    fn assignment(&mut self) -> ParseResult<Expr> {
        let expr = self.or_expr()?;

        if self.check(&TokenKind::Equal) {
            let eq_span = self.advance().span;
            let value = self.assignment()?;

            match expr.kind {
                ExprKind::Variable(_) | ExprKind::Attribute { .. } | ExprKind::Index { .. } => {
                    let span = expr.span.merge(value.span);
                    return Ok(Expr::new(
                        ExprKind::Assign {
                            target: Box::new(expr),
                            value: Box::new(value),
                        },
                        span,
                    ));
                }
                _ => return Err(ParserError::InvalidAssignmentTarget(eq_span)),
            }
        }

        Ok(expr)
    }

    fn or_expr(&mut self) -> ParseResult<Expr> {
        let mut expr = self.and_expr()?;
        while self.match_kind(&TokenKind::Or) {
            let right = self.and_expr()?;
            let span = expr.span.merge(right.span);
            expr = Expr::new(
                ExprKind::Logical {
                    left: Box::new(expr),
                    operator: LogicalOp::Or,
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(expr)
    }

    fn and_expr(&mut self) -> ParseResult<Expr> {
        let mut expr = self.equality()?;
        while self.match_kind(&TokenKind::And) {
            let right = self.equality()?;
            let span = expr.span.merge(right.span);
            expr = Expr::new(
                ExprKind::Logical {
                    left: Box::new(expr),
                    operator: LogicalOp::And,
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(expr)
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        let mut expr = self.comparison()?;
        loop {
            let operator = if self.match_kind(&TokenKind::EqualEqual) {
                BinaryOp::Equal
            } else if self.match_kind(&TokenKind::BangEqual) {
                BinaryOp::NotEqual
            } else {
                break;
            };
            let right = self.comparison()?;
            expr = Self::binary(expr, operator, right);
        }
        Ok(expr)
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let mut expr = self.term()?;
        loop {
            let operator = if self.match_kind(&TokenKind::Less) {
                BinaryOp::Less
            } else if self.match_kind(&TokenKind::LessEqual) {
                BinaryOp::LessEqual
            } else if self.match_kind(&TokenKind::Greater) {
                BinaryOp::Greater
            } else if self.match_kind(&TokenKind::GreaterEqual) {
                BinaryOp::GreaterEqual
            } else {
                break;
            };
            let right = self.term()?;
            expr = Self::binary(expr, operator, right);
        }
        Ok(expr)
    }

    fn term(&mut self) -> ParseResult<Expr> {
        let mut expr = self.factor()?;
        loop {
            let operator = if self.match_kind(&TokenKind::Plus) {
                BinaryOp::Add
            } else if self.match_kind(&TokenKind::Minus) {
                BinaryOp::Subtract
            } else {
                break;
            };
            let right = self.factor()?;
            expr = Self::binary(expr, operator, right);
        }
        Ok(expr)
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        let mut expr = self.unary()?;
        loop {
            let operator = if self.match_kind(&TokenKind::Star) {
                BinaryOp::Multiply
            } else if self.match_kind(&TokenKind::Slash) {
                BinaryOp::Divide
            } else if self.match_kind(&TokenKind::Percent) {
                BinaryOp::Modulo
            } else {
                break;
            };
            let right = self.unary()?;
            expr = Self::binary(expr, operator, right);
        }
        Ok(expr)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let operator = if self.check(&TokenKind::Minus) {
            Some(UnaryOp::Negate)
        } else if self.check(&TokenKind::Not) || self.check(&TokenKind::Bang) {
            Some(UnaryOp::Not)
        } else {
            None
        };

        if let Some(operator) = operator {
            let span = self.advance().span;
            let operand = self.unary()?;
            let span = span.merge(operand.span);
            return Ok(Expr::new(
                ExprKind::Unary {
                    operator,
                    operand: Box::new(operand),
                },
                span,
            ));
        }

        self.call()
    }

    /// Calls, attribute access, and indexing all bind tighter than unary.
    fn call(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;

        loop {
            if self.check(&TokenKind::LeftParen) {
                self.advance();
                let arguments = self.argument_list()?;
                let span = expr.span.merge(self.previous_span());
                expr = Expr::new(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        arguments,
                    },
                    span,
                );
            } else if self.match_kind(&TokenKind::Dot) {
                let (name, name_span) = self.consume_identifier("attribute name")?;
                let span = expr.span.merge(name_span);
                expr = Expr::new(
                    ExprKind::Attribute {
                        object: Box::new(expr),
                        name,
                    },
                    span,
                );
            } else if self.check(&TokenKind::LeftBracket) {
                self.advance();
                let index = self.expression()?;
                self.consume(&TokenKind::RightBracket, "']' after index")?;
                let span = expr.span.merge(self.previous_span());
                expr = Expr::new(
                    ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// Parse call arguments; the opening paren is already consumed.
    fn argument_list(&mut self) -> ParseResult<Vec<Expr>> {
        let mut arguments = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                arguments.push(self.expression()?);
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "')' after arguments")?;
        Ok(arguments)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::IntLiteral(n) => {
                self.advance();
                Ok(Expr::new(ExprKind::IntLiteral(n), token.span))
            }
            TokenKind::FloatLiteral(n) => {
                self.advance();
                Ok(Expr::new(ExprKind::FloatLiteral(n), token.span))
            }
            TokenKind::StringLiteral(s) => {
                self.advance();
                Ok(Expr::new(ExprKind::StringLiteral(s), token.span))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::new(ExprKind::BoolLiteral(true), token.span))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::new(ExprKind::BoolLiteral(false), token.span))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::new(ExprKind::Null, token.span))
            }
            TokenKind::This => {
                self.advance();
                Ok(Expr::new(ExprKind::This, token.span))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::new(ExprKind::Variable(name), token.span))
            }
            TokenKind::Super => {
                self.advance();
                self.consume(&TokenKind::LeftParen, "'(' after 'super'")?;
                let arguments = self.argument_list()?;
                let span = token.span.merge(self.previous_span());
                Ok(Expr::new(ExprKind::SuperCall { arguments }, span))
            }
            TokenKind::Function => {
                // Anonymous function expression: function (params) { body }
                self.advance();
                let (params, variadic) = self.parameter_list()?;
                let body = self.block()?;
                let span = token.span.merge(self.previous_span());
                Ok(Expr::new(
                    ExprKind::Lambda {
                        params,
                        variadic,
                        body,
                    },
                    span,
                ))
            }
            TokenKind::LeftBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(&TokenKind::RightBracket) {
                    loop {
                        elements.push(self.expression()?);
                        if !self.match_kind(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.consume(&TokenKind::RightBracket, "']' after list elements")?;
                let span = token.span.merge(self.previous_span());
                Ok(Expr::new(ExprKind::List(elements), span))
            }
            TokenKind::LeftParen => {
                // Grouping, or a tuple if a comma appears.
                self.advance();
                let first = self.expression()?;
                if self.match_kind(&TokenKind::Comma) {
                    let mut elements = vec![first];
                    if !self.check(&TokenKind::RightParen) {
                        loop {
                            elements.push(self.expression()?);
                            if !self.match_kind(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.consume(&TokenKind::RightParen, "')' after tuple elements")?;
                    let span = token.span.merge(self.previous_span());
                    Ok(Expr::new(ExprKind::Tuple(elements), span))
                } else {
                    self.consume(&TokenKind::RightParen, "')' after expression")?;
                    Ok(first)
                }
            }
            TokenKind::Eof => Err(ParserError::UnexpectedEof(token.span)),
            other => Err(ParserError::unexpected_token(
                "expression",
                other.describe(),
                token.span,
            )),
        }
    }

    fn binary(left: Expr, operator: BinaryOp, right: Expr) -> Expr {
        let span = left.span.merge(right.span);
        Expr::new(
            ExprKind::Binary {
                left: Box::new(left),
                operator,
                right: Box::new(right),
            },
            span,
        )
    }
}
