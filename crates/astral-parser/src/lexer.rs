//! SQL lexer: converts source text into a token stream.

use astral_error::{AstralError, Result};

use crate::token::{is_reserved, Token, TokenKind};

/// Lexer over the source bytes.
pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Create a lexer for the given source text.
    pub fn new(source: &'a str) -> Self {
        Self {
            src: source.as_bytes(),
            pos: 0,
        }
    }

    /// Tokenize the entire input.
    pub fn tokenize(source: &'a str) -> Result<Vec<Token>> {
        let mut lexer = Self::new(source);
        let mut tokens = Vec::new();
        while let Some(token) = lexer.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn text(&self, start: usize, end: usize) -> String {
        String::from_utf8_lossy(&self.src[start..end]).into_owned()
    }

    /// Produce the next token, or `None` at end of input.
    fn next_token(&mut self) -> Result<Option<Token>> {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        let Some(ch) = self.peek() else {
            return Ok(None);
        };
        let start = self.pos;

        // Numeric literal: digits with an optional fraction.
        if ch.is_ascii_digit() {
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
            if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
            return Ok(Some(Token {
                kind: TokenKind::Literal,
                text: self.text(start, self.pos),
                offset: start,
            }));
        }

        // Quoted string literal. Backslash escapes pass through verbatim;
        // the literal must close with the matching quote.
        if ch == b'\'' || ch == b'"' {
            let quote = ch;
            self.pos += 1;
            let body_start = self.pos;
            while let Some(c) = self.peek() {
                if c == quote {
                    break;
                }
                if c == b'\\' && self.pos + 1 < self.src.len() {
                    self.pos += 2;
                } else {
                    self.pos += 1;
                }
            }
            if self.peek() != Some(quote) {
                return Err(AstralError::UnterminatedString { offset: start });
            }
            let text = self.text(body_start, self.pos);
            self.pos += 1;
            return Ok(Some(Token {
                kind: TokenKind::Literal,
                text,
                offset: start,
            }));
        }

        // Identifier or keyword.
        if ch.is_ascii_alphanumeric() || ch == b'_' {
            while self
                .peek()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
            {
                self.pos += 1;
            }
            let text = self.text(start, self.pos);
            let kind = if is_reserved(&text) {
                TokenKind::Keyword
            } else {
                TokenKind::Identifier
            };
            return Ok(Some(Token {
                kind,
                text,
                offset: start,
            }));
        }

        // Two-character operators take priority over their prefixes.
        if self.pos + 1 < self.src.len() {
            let pair = &self.src[self.pos..self.pos + 2];
            if matches!(pair, b"<=" | b">=" | b"!=" | b"==") {
                self.pos += 2;
                return Ok(Some(Token {
                    kind: TokenKind::Punctuation,
                    text: self.text(start, self.pos),
                    offset: start,
                }));
            }
        }

        // Single-character punctuation or symbol.
        self.pos += 1;
        let kind = if ch.is_ascii_punctuation() {
            TokenKind::Punctuation
        } else {
            TokenKind::Symbol
        };
        Ok(Some(Token {
            kind,
            text: self.text(start, self.pos),
            offset: start,
        }))
    }
}
