//! Lexer/Scanner for Vesper source code.

use crate::error::{Diagnostic, LexerError};
use crate::lexer::token::{Token, TokenKind};
use crate::span::Span;

/// The lexer transforms source code into a stream of tokens.
///
/// Errors do not stop the scan: each bad character or malformed literal is
/// recorded as a diagnostic and scanning resumes, so a single pass reports
/// every lexical error in the file.
pub struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    source_len: usize,
    current_pos: usize,
    line: usize,
    column: usize,
    start_pos: usize,
    start_line: usize,
    start_column: usize,
    errors: Vec<Diagnostic>,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            source_len: source.len(),
            current_pos: 0,
            line: 1,
            column: 1,
            start_pos: 0,
            start_line: 1,
            start_column: 1,
            errors: Vec::new(),
        }
    }

    /// Scan all tokens. Returns the tokens plus every diagnostic recorded.
    pub fn scan_tokens(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();

        loop {
            match self.scan_token() {
                Ok(token) => {
                    let is_eof = token.kind == TokenKind::Eof;
                    tokens.push(token);
                    if is_eof {
                        break;
                    }
                }
                Err(err) => {
                    self.errors.push(err.into());
                }
            }
        }

        (tokens, self.errors)
    }

    fn scan_token(&mut self) -> Result<Token, LexerError> {
        self.skip_whitespace_and_comments();
        self.mark_start();

        let Some(c) = self.advance() else {
            return Ok(Token::eof(self.source_len, self.line, self.column));
        };

        match c {
            '(' => Ok(self.make_token(TokenKind::LeftParen)),
            ')' => Ok(self.make_token(TokenKind::RightParen)),
            '{' => Ok(self.make_token(TokenKind::LeftBrace)),
            '}' => Ok(self.make_token(TokenKind::RightBrace)),
            '[' => Ok(self.make_token(TokenKind::LeftBracket)),
            ']' => Ok(self.make_token(TokenKind::RightBracket)),
            ',' => Ok(self.make_token(TokenKind::Comma)),
            ';' => Ok(self.make_token(TokenKind::Semicolon)),
            ':' => Ok(self.make_token(TokenKind::Colon)),
            '+' => Ok(self.make_token(TokenKind::Plus)),
            '-' => Ok(self.make_token(TokenKind::Minus)),
            '*' => Ok(self.make_token(TokenKind::Star)),
            '/' => Ok(self.make_token(TokenKind::Slash)),
            '%' => Ok(self.make_token(TokenKind::Percent)),
            '.' => {
                if self.match_char('.') {
                    if self.match_char('.') {
                        Ok(self.make_token(TokenKind::Ellipsis))
                    } else {
                        Err(LexerError::UnexpectedChar('.', self.current_span()))
                    }
                } else {
                    Ok(self.make_token(TokenKind::Dot))
                }
            }
            '=' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::EqualEqual))
                } else {
                    Ok(self.make_token(TokenKind::Equal))
                }
            }
            '!' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::BangEqual))
                } else {
                    Ok(self.make_token(TokenKind::Bang))
                }
            }
            '<' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::LessEqual))
                } else {
                    Ok(self.make_token(TokenKind::Less))
                }
            }
            '>' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::GreaterEqual))
                } else {
                    Ok(self.make_token(TokenKind::Greater))
                }
            }
            '"' => self.scan_string(),
            c if c.is_ascii_digit() => self.scan_number(c),
            c if c.is_alphabetic() || c == '_' => self.scan_identifier(c),
            c => Err(LexerError::UnexpectedChar(c, self.current_span())),
        }
    }

    // --- Scanning helpers ---

    fn scan_string(&mut self) -> Result<Token, LexerError> {
        let mut value = String::new();

        loop {
            match self.advance() {
                None => return Err(LexerError::UnterminatedString(self.current_span())),
                Some('"') => break,
                Some('\\') => {
                    let Some(escaped) = self.advance() else {
                        return Err(LexerError::UnterminatedString(self.current_span()));
                    };
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        '\\' => value.push('\\'),
                        '"' => value.push('"'),
                        '0' => value.push('\0'),
                        other => {
                            return Err(LexerError::InvalidEscape(other, self.current_span()))
                        }
                    }
                }
                Some(c) => value.push(c),
            }
        }

        Ok(self.make_token(TokenKind::StringLiteral(value)))
    }

    fn scan_number(&mut self, first: char) -> Result<Token, LexerError> {
        let mut text = String::new();
        text.push(first);

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }

        // Fractional part: a dot followed by a digit (not attribute access).
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            text.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() || c == '_' {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }

        let cleaned: String = text.chars().filter(|&c| c != '_').collect();
        if is_float {
            match cleaned.parse::<f64>() {
                Ok(n) => Ok(self.make_token(TokenKind::FloatLiteral(n))),
                Err(_) => Err(LexerError::InvalidNumber(text, self.current_span())),
            }
        } else {
            match cleaned.parse::<i64>() {
                Ok(n) => Ok(self.make_token(TokenKind::IntLiteral(n))),
                Err(_) => Err(LexerError::InvalidNumber(text, self.current_span())),
            }
        }
    }

    fn scan_identifier(&mut self, first: char) -> Result<Token, LexerError> {
        let mut text = String::new();
        text.push(first);

        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }

        let kind = TokenKind::keyword(&text).unwrap_or(TokenKind::Identifier(text));
        Ok(self.make_token(kind))
    }

    // --- Cursor helpers ---

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') | Some('\n') => {
                    self.advance();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn mark_start(&mut self) {
        self.start_pos = self.current_pos;
        self.start_line = self.line;
        self.start_column = self.column;
    }

    fn advance(&mut self) -> Option<char> {
        let (pos, c) = self.chars.next()?;
        self.current_pos = pos + c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn peek_at(&mut self, offset: usize) -> Option<char> {
        self.chars.clone().nth(offset).map(|(_, c)| c)
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.current_span())
    }

    fn current_span(&self) -> Span {
        Span::new(
            self.start_pos,
            self.current_pos,
            self.start_line,
            self.start_column,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, errors) = Scanner::new(source).scan_tokens();
        assert!(errors.is_empty(), "unexpected lexer errors: {:?}", errors);
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_scan_operators_and_keywords() {
        assert_eq!(
            kinds("x = 1 + 2;"),
            vec![
                TokenKind::Identifier("x".to_string()),
                TokenKind::Equal,
                TokenKind::IntLiteral(1),
                TokenKind::Plus,
                TokenKind::IntLiteral(2),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
        assert_eq!(
            kinds("while for function class"),
            vec![
                TokenKind::While,
                TokenKind::For,
                TokenKind::Function,
                TokenKind::Class,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_scan_string_escapes() {
        assert_eq!(
            kinds(r#""a\nb""#),
            vec![TokenKind::StringLiteral("a\nb".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_scan_numbers() {
        assert_eq!(
            kinds("3 3.25 1_000"),
            vec![
                TokenKind::IntLiteral(3),
                TokenKind::FloatLiteral(3.25),
                TokenKind::IntLiteral(1000),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_number_dot_is_attribute_access() {
        assert_eq!(
            kinds("3.abs"),
            vec![
                TokenKind::IntLiteral(3),
                TokenKind::Dot,
                TokenKind::Identifier("abs".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("1 # comment\n2"),
            vec![
                TokenKind::IntLiteral(1),
                TokenKind::IntLiteral(2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_errors_accumulate_without_stopping() {
        let (tokens, errors) = Scanner::new("1 ` 2 ` 3").scan_tokens();
        assert_eq!(errors.len(), 2);
        let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::IntLiteral(1),
                TokenKind::IntLiteral(2),
                TokenKind::IntLiteral(3),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_spans_track_lines() {
        let (tokens, _) = Scanner::new("1\n  x").scan_tokens();
        assert_eq!(tokens[0].span.line, 1);
        assert_eq!(tokens[1].span.line, 2);
        assert_eq!(tokens[1].span.column, 3);
    }
}
