//! ouro-core - sandboxed language tooling for the OuroborOS shell
//!
//! This crate holds the three evaluation-related subsystems of the shell:
//!
//! - a small Lisp interpreter with lexical closures, a host-injected bridge
//!   and hard execution ceilings,
//! - a compiler from an ALGOL-style block language down to that Lisp,
//! - Ourocode, a typed basic-block IR with a validator and an executor.
//!
//! ```scheme
//! (def make-adder (lambda (n) (lambda (x) (+ x n))))
//! (def add5 (make-adder 5))
//! (add5 10)                 ; => 15
//! ```
//!
//! ```text
//! BEGIN INTEGER i; i := 0; WHILE i < 5 DO i := i + 1; i END
//! ```
//!
//! compiles to
//!
//! ```scheme
//! (begin (def i nil) (set! i 0)
//!        (begin (def __loop_0 (lambda () (if (< i 5) (begin (set! i (+ i 1)) (__loop_0)) nil)))
//!               (__loop_0))
//!        i)
//! ```
//!
//! ## Surface
//!
//! The stable entry points are [`evaluator::Interpreter::eval`],
//! [`dsl::compile`] and [`ourocode::Executor::execute`]. Every failure they
//! return can be flattened into an [`ErrorReport`] for display.
//!
//! ## Modules
//!
//! - `scheme`: S-expression reader
//! - `expr`: special-form analysis into a tagged expression tree
//! - `evaluator`: environments and the evaluation loop
//! - `builtinops`: built-in procedure registry
//! - `bridge`: host function tables behind `call-js` / `call-wasm`
//! - `dsl`: the block-language compiler
//! - `ourocode`: IR model, textual form, validator, executor

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Maximum parsing depth to prevent stack overflow attacks
/// This limits deeply nested structures in the S-expression reader, the DSL
/// parser and the analysis pass
pub const MAX_PARSE_DEPTH: usize = 128;

/// Hard ceiling on evaluation nesting and Ourocode call depth.
/// `Limits::max_depth` is clamped to it; every level fits comfortably in a
/// default 2 MiB thread stack.
pub const MAX_EVAL_DEPTH: usize = 64;

/// A 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn new(line: usize, column: usize) -> Self {
        Location { line, column }
    }

    /// Compute the line and column of a byte offset into `input`.
    pub fn from_offset(input: &str, offset: usize) -> Self {
        let offset = offset.min(input.len());
        let before = &input[..offset];
        let line = before.matches('\n').count() + 1;
        let column = match before.rfind('\n') {
            Some(nl) => before[nl + 1..].chars().count() + 1,
            None => before.chars().count() + 1,
        };
        Location { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone, Copy, Serialize)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed expressions)
    InvalidSyntax,
    /// Input ended before the expression was complete (EOF, unterminated string, unclosed parens)
    Incomplete,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// A closing paren with no matching opener
    Unbalanced,
    /// A special form used with the wrong shape, e.g. `(lambda x)`
    MalformedForm,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
    pub location: Option<Location>,
}

impl ParseError {
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
            location: None,
        }
    }

    /// Create a simple ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context and location extracted from input at a given offset
    pub fn at_offset(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let error_offset = error_offset.min(input.len());
        let found = input[error_offset..].chars().next().map(String::from);

        // Show a little of what came before the error
        let context_start = input[..error_offset]
            .char_indices()
            .rev()
            .nth(19)
            .map_or(0, |(i, _)| i);
        let context_str: String = input[context_start..].chars().take(MAX_CONTEXT).collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.len() < input.len() {
            display_context.push_str("[...]");
        }
        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        ParseError {
            kind,
            message: message.into(),
            context: Some(display_context),
            found,
            location: Some(Location::from_offset(input, error_offset)),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParseError")?;
        if let Some(location) = &self.location {
            write!(f, " at {location}")?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(found) = &self.found {
            write!(f, "\nFound: {found}")?;
        }
        if let Some(context) = &self.context {
            write!(f, "\nContext: {context}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

fn arity_message(expected: &usize, got: &usize, expression: &Option<String>) -> String {
    match expression {
        Some(expr) => format!("expression {expr}: expected {expected} arguments, got {got}"),
        None => format!("function expected {expected} arguments but got {got}"),
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("{0}")]
    ParseError(ParseError),
    #[error("EvalError: {0}")]
    EvalError(String),
    #[error("TypeError: {0}")]
    TypeError(String),
    #[error("UnboundVariableError: {0}")]
    UnboundVariable(String),
    #[error("ArityError: {}", arity_message(.expected, .got, .expression))]
    ArityError {
        expected: usize,
        got: usize,
        expression: Option<String>,
    },
    #[error("ZeroDivisionError: {0}")]
    ZeroDivisionError(String),
    #[error("ResourceLimitError: {0}")]
    ResourceLimitError(#[from] sandbox::LimitExceeded),
    #[error("BridgeLookupError: {0}")]
    BridgeLookupError(String),
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::ParseError(e)
    }
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError with expression context
    pub fn arity_error_with_expr(expected: usize, got: usize, expression: String) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression),
        }
    }

    /// Stable kind name used in [`ErrorReport`]s.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::ParseError(_) => "ParseError",
            Error::EvalError(_) => "EvalError",
            Error::TypeError(_) => "TypeError",
            Error::UnboundVariable(_) => "UnboundVariableError",
            Error::ArityError { .. } => "ArityError",
            Error::ZeroDivisionError(_) => "ZeroDivisionError",
            Error::ResourceLimitError(_) => "ResourceLimitError",
            Error::BridgeLookupError(_) => "BridgeLookupError",
        }
    }

    pub fn report(&self) -> ErrorReport {
        let (message, location) = match self {
            Error::ParseError(e) => (e.message.clone(), e.location),
            other => (other.to_string(), None),
        };
        ErrorReport {
            kind: self.kind_name().to_owned(),
            message,
            location,
        }
    }
}

/// The shape every failure takes when it crosses into a UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{} at {loc}: {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

pub mod ast;
pub mod bridge;
pub mod builtinops;
pub mod config;
pub mod dsl;
pub mod evaluator;
pub mod expr;
pub mod ourocode;
pub mod sandbox;
pub mod scheme;

pub use config::Limits;
pub use evaluator::Interpreter;
