//! Tokens of the block language.
//!
//! Keywords are upper-case only: `BEGIN` is a keyword, `begin` is an
//! ordinary identifier.

use crate::Location;
use std::fmt;

/// Declared type of a variable. Documentation only; nothing checks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclType {
    Integer,
    Real,
    Boolean,
    String,
}

impl fmt::Display for DeclType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeclType::Integer => "INTEGER",
            DeclType::Real => "REAL",
            DeclType::Boolean => "BOOLEAN",
            DeclType::String => "STRING",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: Location,
}

impl Token {
    pub fn new(kind: TokenKind, location: Location) -> Self {
        Self { kind, location }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Keywords
    Begin,
    End,
    If,
    Then,
    Else,
    While,
    Do,
    And,
    Or,
    Not,
    True,
    False,
    Type(DeclType),

    // Operators
    Assign, // :=
    Plus,
    Minus,
    Star,
    Slash,
    Lt,
    Gt,
    Eq,
    Le,
    Ge,
    Ne, // <>

    // Punctuation
    Semi,
    Comma,
    LParen,
    RParen,

    // Literals and names
    Number(f64),
    Str(String),
    Ident(String),

    Eof,
}

/// Map an upper-case word to its keyword token.
pub fn keyword_lookup(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "BEGIN" => TokenKind::Begin,
        "END" => TokenKind::End,
        "IF" => TokenKind::If,
        "THEN" => TokenKind::Then,
        "ELSE" => TokenKind::Else,
        "WHILE" => TokenKind::While,
        "DO" => TokenKind::Do,
        "AND" => TokenKind::And,
        "OR" => TokenKind::Or,
        "NOT" => TokenKind::Not,
        "TRUE" => TokenKind::True,
        "FALSE" => TokenKind::False,
        "INTEGER" => TokenKind::Type(DeclType::Integer),
        "REAL" => TokenKind::Type(DeclType::Real),
        "BOOLEAN" => TokenKind::Type(DeclType::Boolean),
        "STRING" => TokenKind::Type(DeclType::String),
        _ => return None,
    };
    Some(kind)
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Begin => write!(f, "BEGIN"),
            TokenKind::End => write!(f, "END"),
            TokenKind::If => write!(f, "IF"),
            TokenKind::Then => write!(f, "THEN"),
            TokenKind::Else => write!(f, "ELSE"),
            TokenKind::While => write!(f, "WHILE"),
            TokenKind::Do => write!(f, "DO"),
            TokenKind::And => write!(f, "AND"),
            TokenKind::Or => write!(f, "OR"),
            TokenKind::Not => write!(f, "NOT"),
            TokenKind::True => write!(f, "TRUE"),
            TokenKind::False => write!(f, "FALSE"),
            TokenKind::Type(ty) => write!(f, "{ty}"),
            TokenKind::Assign => write!(f, "':='"),
            TokenKind::Plus => write!(f, "'+'"),
            TokenKind::Minus => write!(f, "'-'"),
            TokenKind::Star => write!(f, "'*'"),
            TokenKind::Slash => write!(f, "'/'"),
            TokenKind::Lt => write!(f, "'<'"),
            TokenKind::Gt => write!(f, "'>'"),
            TokenKind::Eq => write!(f, "'='"),
            TokenKind::Le => write!(f, "'<='"),
            TokenKind::Ge => write!(f, "'>='"),
            TokenKind::Ne => write!(f, "'<>'"),
            TokenKind::Semi => write!(f, "';'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::Number(n) => write!(f, "number {n}"),
            TokenKind::Str(s) => write!(f, "string \"{s}\""),
            TokenKind::Ident(name) => write!(f, "identifier '{name}'"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}
