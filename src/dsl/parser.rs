//! Recursive-descent parser for the block language.
//!
//! ```text
//! program     := block EOF
//! block       := BEGIN declaration* statement (';' statement)* END
//! declaration := TYPE ident (',' ident)* ';'
//! statement   := ident ':=' expr
//!              | IF expr THEN statement (ELSE statement)?
//!              | WHILE expr DO statement
//!              | block
//!              | expr
//!              | (empty)
//! ```
//!
//! Operator precedence, lowest first: `OR`, `AND`, relational
//! (`< > = <= >= <>`, non-associative), additive, multiplicative, unary
//! (`-`, `NOT`).
//!
//! A failed statement is recorded and the parser skips ahead to the next `;`
//! or `END` of the same block, so one pass reports every independent error.

use super::CompileError;
use super::ast::{BinOp, Block, Declaration, Expr, Literal, Stmt, UnaryOp};
use super::token::{Token, TokenKind};
use crate::{Location, MAX_PARSE_DEPTH};

type PResult<T> = Result<T, CompileError>;

/// Names the generated code cannot bind: the reader takes them as literals.
const RESERVED_NAMES: &[&str] = &["nil", "true", "false"];

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    errors: Vec<CompileError>,
}

impl Parser {
    /// An `Eof` token is appended when `tokens` does not already end with
    /// one, as [`super::lexer::Lexer::tokenize`] output does.
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().is_none_or(|token| token.kind != TokenKind::Eof) {
            let location = tokens.last().map_or(Location::new(1, 1), |token| token.location);
            tokens.push(Token::new(TokenKind::Eof, location));
        }
        Self {
            tokens,
            pos: 0,
            depth: 0,
            errors: Vec::new(),
        }
    }

    pub fn parse_program(&mut self) -> Result<Block, Vec<CompileError>> {
        let block = match self.block() {
            Ok(block) => {
                if !self.at_eof() {
                    let err = self.error_unexpected("end of input after the final END");
                    self.errors.push(err);
                }
                Some(block)
            }
            Err(err) => {
                self.errors.push(err);
                None
            }
        };
        match block {
            Some(block) if self.errors.is_empty() => Ok(block),
            _ => Err(std::mem::take(&mut self.errors)),
        }
    }

    fn block(&mut self) -> PResult<Block> {
        let open = self.expect(TokenKind::Begin)?.location;

        let mut declarations = Vec::new();
        while let TokenKind::Type(ty) = self.peek_kind() {
            let location = self.advance().location;
            match self.declaration_names() {
                Ok(names) => declarations.push(Declaration {
                    ty,
                    names,
                    location,
                }),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize();
                    if self.check(&TokenKind::Semi) {
                        self.advance();
                    }
                }
            }
        }

        let statements = self.statement_list();

        if self.at_eof() {
            return Err(CompileError::syntax(
                format!("missing END for the BEGIN at {open}"),
                self.current_location(),
            ));
        }
        self.expect(TokenKind::End)?;
        Ok(Block {
            declarations,
            statements,
            location: open,
        })
    }

    fn declaration_names(&mut self) -> PResult<Vec<String>> {
        let mut names = vec![self.name()?];
        while self.check(&TokenKind::Comma) {
            self.advance();
            names.push(self.name()?);
        }
        self.expect(TokenKind::Semi)?;
        Ok(names)
    }

    /// Statements up to (not including) the block's `END`.
    fn statement_list(&mut self) -> Vec<Stmt> {
        let mut statements = Vec::new();
        loop {
            if self.check(&TokenKind::End) || self.at_eof() {
                return statements;
            }
            match self.statement() {
                Ok(Stmt::Empty) => {}
                Ok(stmt) => statements.push(stmt),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize();
                }
            }
            if self.check(&TokenKind::Semi) {
                self.advance();
            } else if !(self.check(&TokenKind::End) || self.at_eof()) {
                let err = self.error_unexpected("';' or END");
                self.errors.push(err);
                self.synchronize();
            }
        }
    }

    /// Skip to the next `;` or `END` of the current block, stepping over
    /// whole nested `BEGIN ... END` pairs.
    fn synchronize(&mut self) {
        let mut nesting = 0usize;
        loop {
            match self.peek_kind() {
                TokenKind::Eof => return,
                TokenKind::Semi | TokenKind::End if nesting == 0 => return,
                TokenKind::Begin => nesting += 1,
                TokenKind::End => nesting -= 1,
                _ => {}
            }
            self.advance();
        }
    }

    fn statement(&mut self) -> PResult<Stmt> {
        self.nested(|p| match p.peek_kind() {
            TokenKind::Semi | TokenKind::End | TokenKind::Else | TokenKind::Eof => Ok(Stmt::Empty),
            TokenKind::Ident(_) if p.peek_ahead_kind(1) == TokenKind::Assign => p.assignment(),
            TokenKind::If => p.if_statement(),
            TokenKind::While => p.while_statement(),
            TokenKind::Begin => Ok(Stmt::Block(p.block()?)),
            TokenKind::Type(ty) => Err(CompileError::syntax(
                format!("{ty} declaration after the first statement of a block"),
                p.current_location(),
            )),
            _ => {
                let location = p.current_location();
                let value = p.expression()?;
                Ok(Stmt::Expr { value, location })
            }
        })
    }

    fn assignment(&mut self) -> PResult<Stmt> {
        let location = self.current_location();
        let target = self.name()?;
        self.expect(TokenKind::Assign)?;
        let value = self.expression()?;
        Ok(Stmt::Assign {
            target,
            value,
            location,
        })
    }

    fn if_statement(&mut self) -> PResult<Stmt> {
        let location = self.expect(TokenKind::If)?.location;
        let cond = self.expression()?;
        self.expect(TokenKind::Then)?;
        let then = Box::new(self.statement()?);
        let otherwise = if self.check(&TokenKind::Else) {
            self.advance();
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then,
            otherwise,
            location,
        })
    }

    fn while_statement(&mut self) -> PResult<Stmt> {
        let location = self.expect(TokenKind::While)?.location;
        let cond = self.expression()?;
        self.expect(TokenKind::Do)?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::While {
            cond,
            body,
            location,
        })
    }

    // Expressions

    fn expression(&mut self) -> PResult<Expr> {
        self.disjunction()
    }

    fn disjunction(&mut self) -> PResult<Expr> {
        self.left_chain(Self::conjunction, |kind| match kind {
            TokenKind::Or => Some(BinOp::Or),
            _ => None,
        })
    }

    fn conjunction(&mut self) -> PResult<Expr> {
        self.left_chain(Self::relation, |kind| match kind {
            TokenKind::And => Some(BinOp::And),
            _ => None,
        })
    }

    fn relation(&mut self) -> PResult<Expr> {
        let left = self.additive()?;
        let op = match self.peek_kind() {
            TokenKind::Lt => BinOp::Lt,
            TokenKind::Gt => BinOp::Gt,
            TokenKind::Eq => BinOp::Eq,
            TokenKind::Ne => BinOp::Ne,
            TokenKind::Le => BinOp::Le,
            TokenKind::Ge => BinOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.additive()?;
        Ok(binary(op, left, right))
    }

    fn additive(&mut self) -> PResult<Expr> {
        self.left_chain(Self::term, |kind| match kind {
            TokenKind::Plus => Some(BinOp::Add),
            TokenKind::Minus => Some(BinOp::Sub),
            _ => None,
        })
    }

    fn term(&mut self) -> PResult<Expr> {
        self.left_chain(Self::unary, |kind| match kind {
            TokenKind::Star => Some(BinOp::Mul),
            TokenKind::Slash => Some(BinOp::Div),
            _ => None,
        })
    }

    /// `operand (op operand)*`, grouped to the left. A run of one chainable
    /// operator extends a single node; every other step wraps the tree so
    /// far one level deeper, and that depth counts against the nesting limit.
    fn left_chain(
        &mut self,
        operand: fn(&mut Self) -> PResult<Expr>,
        operator: fn(&TokenKind) -> Option<BinOp>,
    ) -> PResult<Expr> {
        let base = self.depth;
        let result = self.left_chain_from(operand, operator);
        self.depth = base;
        result
    }

    fn left_chain_from(
        &mut self,
        operand: fn(&mut Self) -> PResult<Expr>,
        operator: fn(&TokenKind) -> Option<BinOp>,
    ) -> PResult<Expr> {
        let mut left = operand(self)?;
        while let Some(op) = operator(&self.peek_kind()) {
            let location = self.current_location();
            self.advance();
            let wraps = matches!(&left, Expr::BinOp { op: prev, .. } if *prev != op || !op.is_chainable());
            if wraps {
                if self.depth + 1 >= MAX_PARSE_DEPTH {
                    return Err(CompileError::syntax(
                        format!("expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                        location,
                    ));
                }
                self.depth += 1;
            }
            let right = operand(self)?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> PResult<Expr> {
        self.nested(|p| {
            let op = match p.peek_kind() {
                TokenKind::Minus => UnaryOp::Neg,
                TokenKind::Not => UnaryOp::Not,
                _ => return p.primary(),
            };
            p.advance();
            let operand = Box::new(p.unary()?);
            Ok(Expr::Unary { op, operand })
        })
    }

    fn primary(&mut self) -> PResult<Expr> {
        match self.peek_kind() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Number(n)))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::Str(s)))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            TokenKind::Ident(_) => Ok(Expr::VarRef(self.name()?)),
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            _ => Err(self.error_unexpected("an expression")),
        }
    }

    // Helpers

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_PARSE_DEPTH {
            return Err(CompileError::syntax(
                format!("program too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                self.current_location(),
            ));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// A variable name, rejecting the ones the interpreter reads as literals.
    fn name(&mut self) -> PResult<String> {
        let TokenKind::Ident(name) = self.peek_kind() else {
            return Err(self.error_unexpected("an identifier"));
        };
        if RESERVED_NAMES.contains(&name.as_str()) {
            return Err(CompileError::syntax(
                format!("'{name}' is reserved and cannot name a variable"),
                self.current_location(),
            ));
        }
        self.advance();
        Ok(name)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind.clone()
    }

    fn peek_ahead_kind(&self, offset: usize) -> TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        self.tokens[idx].kind.clone()
    }

    fn current_location(&self) -> Location {
        self.peek().location
    }

    fn at_eof(&self) -> bool {
        self.check(&TokenKind::Eof)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind) -> PResult<Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.error_unexpected(&kind.to_string()))
        }
    }

    fn error_unexpected(&self, expected: &str) -> CompileError {
        CompileError::syntax(
            format!("expected {expected}, found {}", self.peek_kind()),
            self.current_location(),
        )
    }
}

/// Append to a run of the same chainable operator, or start a new node.
fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    match left {
        Expr::BinOp {
            op: prev,
            mut operands,
        } if prev == op && op.is_chainable() => {
            operands.push(right);
            Expr::BinOp { op, operands }
        }
        left => Expr::BinOp {
            op,
            operands: vec![left, right],
        },
    }
}
