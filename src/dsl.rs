//! Compiler from the ALGOL-style block language to interpreter source.
//!
//! ```text
//! BEGIN
//!   INTEGER i;
//!   COMMENT count to five;
//!   i := 0;
//!   WHILE i < 5 DO i := i + 1;
//!   i
//! END
//! ```
//!
//! The pipeline is lexer, recursive-descent parser, then code generator. The
//! output is plain S-expression text for [`crate::Interpreter::eval`]; the
//! block language has no runtime of its own. `WHILE` has no counterpart in
//! the interpreter and is lowered to a self-recursive closure, which the
//! evaluator runs in constant stack because the recursive call is in tail
//! position.
//!
//! `INTEGER`, `REAL`, `BOOLEAN` and `STRING` declarations introduce names but
//! are not type-checked; all arithmetic uses the interpreter's generic
//! numeric builtins.

pub mod ast;
pub mod codegen;
pub mod lexer;
pub mod parser;
pub mod token;

use crate::{ErrorReport, Location};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompileErrorKind {
    LexError,
    SyntaxError,
}

/// One diagnostic, always with a source position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    pub location: Location,
}

impl CompileError {
    pub fn lex(message: impl Into<String>, location: Location) -> Self {
        CompileError {
            kind: CompileErrorKind::LexError,
            message: message.into(),
            location,
        }
    }

    pub fn syntax(message: impl Into<String>, location: Location) -> Self {
        CompileError {
            kind: CompileErrorKind::SyntaxError,
            message: message.into(),
            location,
        }
    }

    pub fn report(&self) -> ErrorReport {
        let kind = match self.kind {
            CompileErrorKind::LexError => "LexError",
            CompileErrorKind::SyntaxError => "SyntaxError",
        };
        ErrorReport {
            kind: kind.to_owned(),
            message: self.message.clone(),
            location: Some(self.location),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.location, self.message)
    }
}

impl std::error::Error for CompileError {}

/// Result of [`compile`], shaped for direct serialization to a UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompileOutput {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lisp: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<CompileError>,
}

/// Compile a program, collecting every diagnostic the parser can recover
/// past.
pub fn compile(source: &str) -> CompileOutput {
    match compile_to_lisp(source) {
        Ok(lisp) => CompileOutput {
            success: true,
            lisp: Some(lisp),
            errors: Vec::new(),
        },
        Err(errors) => CompileOutput {
            success: false,
            lisp: None,
            errors,
        },
    }
}

pub fn compile_to_lisp(source: &str) -> Result<String, Vec<CompileError>> {
    tracing::debug!(bytes = source.len(), "compiling block program");
    let tokens = lexer::Lexer::new(source).tokenize().map_err(|e| vec![e])?;
    let program = parser::Parser::new(tokens).parse_program().inspect_err(|errors| {
        tracing::debug!(count = errors.len(), "compilation failed");
    })?;
    let lisp = codegen::generate(&program).map_err(|err| {
        tracing::debug!(%err, "lowering failed");
        vec![err]
    })?;
    tracing::debug!(output = lisp.len(), "compiled block program");
    Ok(lisp)
}
