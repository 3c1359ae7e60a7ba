//! Hand-written scanner for the block language.
//!
//! Whitespace is insignificant. `COMMENT` starts a comment that runs to the
//! next `;`, which is swallowed with it. Strings are double-quoted with no
//! escapes. Numbers are decimal integers or fractions (`3`, `0.05`).
//! Identifiers start with a letter and continue with letters, digits or `_`.

use super::CompileError;
use super::token::{Token, TokenKind, keyword_lookup};
use crate::Location;

pub struct Lexer<'src> {
    src: &'src str,
    bytes: &'src [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'src> Lexer<'src> {
    pub fn new(src: &'src str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the whole source. The last token is always `Eof`.
    pub fn tokenize(&mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, CompileError> {
        loop {
            self.skip_whitespace();
            let start = self.location();
            let Some(ch) = self.peek() else {
                return Ok(Token::new(TokenKind::Eof, start));
            };

            let kind = match ch {
                b'"' => self.string(start)?,
                b'0'..=b'9' => self.number(start)?,
                c if c.is_ascii_alphabetic() => {
                    let word = self.word();
                    if word == "COMMENT" {
                        self.skip_comment(start)?;
                        continue;
                    }
                    keyword_lookup(word).unwrap_or_else(|| TokenKind::Ident(word.to_owned()))
                }
                _ => self.punctuation(start)?,
            };
            return Ok(Token::new(kind, start));
        }
    }

    fn punctuation(&mut self, start: Location) -> Result<TokenKind, CompileError> {
        let begin = self.pos;
        let Some(ch) = self.peek() else {
            return Ok(TokenKind::Eof);
        };
        self.advance();
        let kind = match ch {
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'=' => TokenKind::Eq,
            b';' => TokenKind::Semi,
            b',' => TokenKind::Comma,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b':' if self.eat(b'=') => TokenKind::Assign,
            b'<' if self.eat(b'=') => TokenKind::Le,
            b'<' if self.eat(b'>') => TokenKind::Ne,
            b'<' => TokenKind::Lt,
            b'>' if self.eat(b'=') => TokenKind::Ge,
            b'>' => TokenKind::Gt,
            _ => {
                let found = self.src[begin..].chars().next().unwrap_or('?');
                return Err(CompileError::lex(
                    format!("unexpected character '{found}'"),
                    start,
                ));
            }
        };
        Ok(kind)
    }

    fn string(&mut self, start: Location) -> Result<TokenKind, CompileError> {
        self.advance();
        let src = self.src;
        let content_start = self.pos;
        while let Some(ch) = self.peek() {
            if ch == b'"' {
                let content = src[content_start..self.pos].to_owned();
                self.advance();
                return Ok(TokenKind::Str(content));
            }
            self.advance();
        }
        Err(CompileError::lex("unterminated string literal", start))
    }

    fn number(&mut self, start: Location) -> Result<TokenKind, CompileError> {
        let begin = self.pos;
        self.digits();
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            self.digits();
        }
        if self.peek().is_some_and(|c| c.is_ascii_alphabetic() || c == b'_') {
            return Err(CompileError::lex(
                format!("malformed number '{}'", self.word_from(begin)),
                start,
            ));
        }
        let text = &self.src[begin..self.pos];
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| CompileError::lex(format!("invalid number '{text}'"), start))
    }

    fn digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
    }

    fn word(&mut self) -> &'src str {
        let src = self.src;
        let begin = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.advance();
        }
        &src[begin..self.pos]
    }

    fn word_from(&mut self, begin: usize) -> &'src str {
        let src = self.src;
        self.word();
        &src[begin..self.pos]
    }

    /// Skip from just after `COMMENT` through the terminating `;`.
    fn skip_comment(&mut self, start: Location) -> Result<(), CompileError> {
        while let Some(ch) = self.peek() {
            self.advance();
            if ch == b';' {
                return Ok(());
            }
        }
        Err(CompileError::lex("COMMENT without a closing ';'", start))
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.advance();
        }
    }

    fn location(&self) -> Location {
        Location::new(self.line, self.column)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Step over one byte. Columns count characters, so UTF-8 continuation
    /// bytes do not advance the column.
    fn advance(&mut self) {
        let Some(ch) = self.peek() else {
            return;
        };
        self.pos += 1;
        if ch == b'\n' {
            self.line += 1;
            self.column = 1;
        } else if ch & 0xC0 != 0x80 {
            self.column += 1;
        }
    }
}
