//! Textual Ourocode.
//!
//! ```text
//! @module population 1.0.0 python
//! %Pair = type { f64, i64 }
//! define @rate(%population: f64) -> f64 {
//! entry:
//!   %big = gt f64 %population, 100.0
//!   br %big, high, low
//! high:
//!   %r1 = const f64 0.05
//!   jmp merge
//! low:
//!   %r2 = const f64 0.1
//!   jmp merge
//! merge:
//!   %rate = phi f64 [high: %r1], [low: %r2]
//!   ret %rate
//! }
//! ```
//!
//! Layout is free-form; `;` starts a comment that runs to the end of the
//! line. A number with a `.` or an exponent is an `f64` constant, otherwise
//! an `i64`. Parsing checks syntax only: whether the module makes sense is
//! the validator's business.

use super::module::{
    ArithOp, Block, Callee, CompareOp, Constant, Function, Instruction, Module, Operand, Param,
    Type, TypeDef,
};
use crate::{Location, MAX_PARSE_DEPTH};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace1, not_line_ending, one_of},
    combinator::{opt, recognize, value},
    multi::many0_count,
    sequence::{pair, preceded, terminated},
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("SyntaxError at {location}: {message}")]
pub struct SyntaxError {
    pub message: String,
    pub location: Location,
}

/// Whitespace and `;` line comments.
fn trivia(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0_count(alt((multispace1, preceded(char(';'), not_line_ending)))),
    )
    .parse(input)
}

/// Names of modules, functions, labels, types and locals.
fn ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.'),
    ))
    .parse(input)
}

fn local(input: &str) -> IResult<&str, &str> {
    preceded(char('%'), ident).parse(input)
}

fn global(input: &str) -> IResult<&str, &str> {
    preceded(char('@'), ident).parse(input)
}

/// `-? digits (. digits)? ([eE] [+-]? digits)?`
fn number(input: &str) -> IResult<&str, &str> {
    recognize((
        opt(char('-')),
        digit1,
        opt((char('.'), digit1)),
        opt((one_of("eE"), opt(one_of("+-")), digit1)),
    ))
    .parse(input)
}

fn version(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && c != ';').parse(input)
}

type PResult<T> = Result<T, SyntaxError>;

struct Cursor<'s> {
    source: &'s str,
    rest: &'s str,
}

impl<'s> Cursor<'s> {
    fn error_at(&self, at: &str, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            message: message.into(),
            location: Location::from_offset(self.source, self.source.len() - at.len()),
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        self.error_at(self.rest, message)
    }

    fn skip(&mut self) {
        if let Ok((rest, ())) = trivia(self.rest) {
            self.rest = rest;
        }
    }

    /// The remaining input, positioned at the next token.
    fn here(&mut self) -> &'s str {
        self.skip();
        self.rest
    }

    fn at_end(&mut self) -> bool {
        self.skip();
        self.rest.is_empty()
    }

    /// Run `parser` after trivia; on failure nothing is consumed.
    fn token<T, P>(&mut self, mut parser: P) -> Option<T>
    where
        P: Parser<&'s str, Output = T, Error = nom::error::Error<&'s str>>,
    {
        self.skip();
        let (rest, out) = parser.parse(self.rest).ok()?;
        self.rest = rest;
        Some(out)
    }

    fn require<T, P>(&mut self, parser: P, what: &str) -> PResult<T>
    where
        P: Parser<&'s str, Output = T, Error = nom::error::Error<&'s str>>,
    {
        match self.token(parser) {
            Some(out) => Ok(out),
            None => Err(self.error(format!("expected {what}"))),
        }
    }

    fn punct(&mut self, c: char) -> bool {
        self.token(char(c)).is_some()
    }

    fn expect(&mut self, text: &'static str) -> PResult<()> {
        self.require(tag(text), &format!("'{text}'")).map(drop)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.skip();
        self.rest.chars().next()
    }

    fn peek_word(&mut self) -> Option<&'s str> {
        self.skip();
        ident(self.rest).ok().map(|(_, word)| word)
    }

    fn keyword(&mut self, word: &str) -> bool {
        if self.peek_word() == Some(word) {
            self.rest = &self.rest[word.len()..];
            true
        } else {
            false
        }
    }

    // Grammar

    fn module(&mut self) -> PResult<Module> {
        let at = self.here();
        if !(self.punct('@') && self.keyword("module")) {
            return Err(self.error_at(at, "expected '@module' header"));
        }
        let name = self.require(ident, "a module name")?;
        let version = self.require(version, "a module version")?;
        let language = self.require(ident, "a source language")?;
        let mut module = Module::new(name, version, language);

        while !self.at_end() {
            let at = self.here();
            if self.peek_char() == Some('%') {
                let (name, def) = self.type_def()?;
                if module.types.insert(name.to_owned(), def).is_some() {
                    return Err(self.error_at(at, format!("type %{name} defined twice")));
                }
            } else if self.keyword("define") {
                let (name, function) = self.function()?;
                if module.functions.insert(name.to_owned(), function).is_some() {
                    return Err(self.error_at(at, format!("function @{name} defined twice")));
                }
            } else {
                return Err(self.error("expected a type definition or 'define'"));
            }
        }
        Ok(module)
    }

    fn type_def(&mut self) -> PResult<(&'s str, TypeDef)> {
        let name = self.require(local, "a type name")?;
        self.expect("=")?;
        if !self.keyword("type") {
            return Err(self.error("expected 'type'"));
        }
        self.expect("{")?;
        let mut fields = Vec::new();
        if !self.punct('}') {
            loop {
                fields.push(self.ty()?);
                if self.punct('}') {
                    break;
                }
                self.expect(",")?;
            }
        }
        Ok((name, TypeDef { fields }))
    }

    fn ty(&mut self) -> PResult<Type> {
        if let Some(name) = self.token(local) {
            return Ok(Type::Named(name.to_owned()));
        }
        for (word, ty) in [
            ("i64", Type::I64),
            ("f64", Type::F64),
            ("bool", Type::Bool),
            ("void", Type::Void),
        ] {
            if self.keyword(word) {
                return Ok(ty);
            }
        }
        Err(self.error("expected a type"))
    }

    fn function(&mut self) -> PResult<(&'s str, Function)> {
        let name = self.require(global, "a function name like @main")?;
        self.expect("(")?;
        let mut params = Vec::new();
        if !self.punct(')') {
            loop {
                let param = self.require(local, "a parameter like %x")?;
                self.expect(":")?;
                let ty = self.ty()?;
                params.push(Param {
                    name: param.to_owned(),
                    ty,
                });
                if self.punct(')') {
                    break;
                }
                self.expect(",")?;
            }
        }
        self.expect("->")?;
        let return_type = self.ty()?;
        self.expect("{")?;

        let mut blocks: Vec<Block> = Vec::new();
        loop {
            if self.punct('}') {
                break;
            }
            if self.at_end() {
                return Err(self.error(format!("unclosed body of @{name}")));
            }
            if let Some(label) = self.token(terminated(ident, char(':'))) {
                blocks.push(Block {
                    label: label.to_owned(),
                    instructions: Vec::new(),
                });
                continue;
            }
            let at = self.here();
            let instruction = self.instruction()?;
            let Some(block) = blocks.last_mut() else {
                return Err(self.error_at(at, "instruction before the first block label"));
            };
            block.instructions.push(instruction);
        }

        Ok((
            name,
            Function {
                params,
                return_type,
                blocks,
            },
        ))
    }

    fn instruction(&mut self) -> PResult<Instruction> {
        if let Some(dest) = self.token(local) {
            self.expect("=")?;
            return self.assignment(dest.to_owned());
        }
        let at = self.here();
        match self.token(ident) {
            Some("br") => {
                let cond = self.operand()?;
                self.expect(",")?;
                let if_true = self.label()?;
                self.expect(",")?;
                let if_false = self.label()?;
                Ok(Instruction::Br {
                    cond,
                    if_true,
                    if_false,
                })
            }
            Some("jmp") => Ok(Instruction::Jmp {
                target: self.label()?,
            }),
            Some("ret") => {
                let value = if self.operand_follows() {
                    Some(self.operand()?)
                } else {
                    None
                };
                Ok(Instruction::Ret { value })
            }
            Some("call") => self.call(None),
            Some(word) => Err(self.error_at(at, format!("unknown instruction '{word}'"))),
            None => Err(self.error("expected an instruction or a block label")),
        }
    }

    /// The part after `%dest =`.
    fn assignment(&mut self, dest: String) -> PResult<Instruction> {
        let at = self.here();
        let Some(op) = self.token(ident) else {
            return Err(self.error("expected an operation"));
        };
        let arith = match op {
            "add" => Some(ArithOp::Add),
            "sub" => Some(ArithOp::Sub),
            "mul" => Some(ArithOp::Mul),
            "div" => Some(ArithOp::Div),
            _ => None,
        };
        if let Some(op) = arith {
            let (ty, lhs, rhs) = self.binary_operands()?;
            return Ok(Instruction::Arith {
                dest,
                op,
                ty,
                lhs,
                rhs,
            });
        }
        let compare = match op {
            "gt" => Some(CompareOp::Gt),
            "lt" => Some(CompareOp::Lt),
            "eq" => Some(CompareOp::Eq),
            "ne" => Some(CompareOp::Ne),
            _ => None,
        };
        if let Some(op) = compare {
            let (ty, lhs, rhs) = self.binary_operands()?;
            return Ok(Instruction::Compare {
                dest,
                op,
                ty,
                lhs,
                rhs,
            });
        }

        match op {
            "const" => {
                let ty = self.ty()?;
                let value = self.constant()?;
                Ok(Instruction::Const { dest, ty, value })
            }
            "extract" => {
                let ty = self.ty()?;
                let aggregate = self.operand()?;
                self.expect(",")?;
                let index = self.index()?;
                Ok(Instruction::Extract {
                    dest,
                    ty,
                    aggregate,
                    index,
                })
            }
            "insert" => {
                let ty = self.ty()?;
                let aggregate = self.operand()?;
                self.expect(",")?;
                let index = self.index()?;
                self.expect(",")?;
                let value = self.operand()?;
                Ok(Instruction::Insert {
                    dest,
                    ty,
                    aggregate,
                    index,
                    value,
                })
            }
            "call" => self.call(Some(dest)),
            "phi" => {
                let ty = self.ty()?;
                let mut incoming = Vec::new();
                loop {
                    self.expect("[")?;
                    let label = self.label()?;
                    self.expect(":")?;
                    let value = self.operand()?;
                    self.expect("]")?;
                    incoming.push((label, value));
                    if !self.punct(',') {
                        break;
                    }
                }
                Ok(Instruction::Phi { dest, ty, incoming })
            }
            other => Err(self.error_at(at, format!("unknown operation '{other}'"))),
        }
    }

    fn binary_operands(&mut self) -> PResult<(Type, Operand, Operand)> {
        let ty = self.ty()?;
        let lhs = self.operand()?;
        self.expect(",")?;
        let rhs = self.operand()?;
        Ok((ty, lhs, rhs))
    }

    fn call(&mut self, dest: Option<String>) -> PResult<Instruction> {
        let ty = self.ty()?;
        let first = self.require(global, "a callee like @f or @module::f")?;
        let callee = if self.token(tag("::")).is_some() {
            let function = self.require(ident, "a function name after '::'")?;
            Callee {
                module: Some(first.to_owned()),
                function: function.to_owned(),
            }
        } else {
            Callee {
                module: None,
                function: first.to_owned(),
            }
        };
        self.expect("(")?;
        let mut args = Vec::new();
        if !self.punct(')') {
            loop {
                args.push(self.operand()?);
                if self.punct(')') {
                    break;
                }
                self.expect(",")?;
            }
        }
        Ok(Instruction::Call {
            dest,
            ty,
            callee,
            args,
        })
    }

    fn label(&mut self) -> PResult<String> {
        self.require(ident, "a block label").map(str::to_owned)
    }

    fn index(&mut self) -> PResult<usize> {
        let at = self.here();
        let digits = self.require(digit1, "a field index")?;
        digits
            .parse()
            .map_err(|_| self.error_at(at, format!("field index {digits} out of range")))
    }

    fn operand_follows(&mut self) -> bool {
        match self.peek_char() {
            Some('%' | '-' | '{') => true,
            Some(c) if c.is_ascii_digit() => true,
            _ => matches!(self.peek_word(), Some("true" | "false")),
        }
    }

    fn operand(&mut self) -> PResult<Operand> {
        if let Some(name) = self.token(local) {
            return Ok(Operand::Local(name.to_owned()));
        }
        if !self.operand_follows() {
            return Err(self.error("expected an operand"));
        }
        self.constant().map(Operand::Const)
    }

    fn constant(&mut self) -> PResult<Constant> {
        self.nested_constant(0)
    }

    fn nested_constant(&mut self, depth: usize) -> PResult<Constant> {
        let open = self.here();
        if self.punct('{') {
            if depth >= MAX_PARSE_DEPTH {
                return Err(self.error_at(
                    open,
                    format!("constant too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                ));
            }
            let mut items = Vec::new();
            if !self.punct('}') {
                loop {
                    items.push(self.nested_constant(depth + 1)?);
                    if self.punct('}') {
                        break;
                    }
                    self.expect(",")?;
                }
            }
            return Ok(Constant::Aggregate(items));
        }
        if self.keyword("true") {
            return Ok(Constant::Bool(true));
        }
        if self.keyword("false") {
            return Ok(Constant::Bool(false));
        }
        let at = self.here();
        let text = self.require(number, "a constant")?;
        if text.contains(['.', 'e', 'E']) {
            text.parse()
                .map(Constant::Float)
                .map_err(|_| self.error_at(at, format!("invalid float '{text}'")))
        } else {
            text.parse()
                .map(Constant::Int)
                .map_err(|_| self.error_at(at, format!("integer '{text}' out of range")))
        }
    }
}

/// Parse a whole module from its textual form.
pub fn parse_module(source: &str) -> Result<Module, SyntaxError> {
    let mut cursor = Cursor {
        source,
        rest: source,
    };
    cursor.module()
}
