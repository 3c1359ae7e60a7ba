//! Syntax tree of the block language. Built once by the parser, read once
//! by the code generator.

use super::token::DeclType;
use crate::Location;

/// `BEGIN declarations statements END`
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub declarations: Vec<Declaration>,
    pub statements: Vec<Stmt>,
    /// Position of `BEGIN`
    pub location: Location,
}

/// `INTEGER a, b;`
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub ty: DeclType,
    pub names: Vec<String>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign {
        target: String,
        value: Expr,
        location: Location,
    },
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
        location: Location,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
        location: Location,
    },
    Block(Block),
    /// A bare expression; its value is the block's value when it comes last
    Expr { value: Expr, location: Location },
    /// Nothing between two separators, as in `x := 1; END`
    Empty,
}

impl Stmt {
    /// Where the statement starts. `Empty` has no source of its own.
    pub fn location(&self) -> Option<Location> {
        match self {
            Stmt::Assign { location, .. }
            | Stmt::If { location, .. }
            | Stmt::While { location, .. }
            | Stmt::Expr { location, .. } => Some(*location),
            Stmt::Block(block) => Some(block.location),
            Stmt::Empty => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    VarRef(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// Two operands, or more for a run of one chainable operator
    /// (`a + b + c` is a single node).
    BinOp { op: BinOp, operands: Vec<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Str(String),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Gt,
    Eq,
    Ne,
    Le,
    Ge,
    And,
    Or,
}

impl BinOp {
    /// Operators whose interpreter procedure folds left over any number of
    /// arguments, so `a op b op c` lowers to one list.
    pub fn is_chainable(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::And | BinOp::Or
        )
    }

    /// The interpreter procedure or special form this operator becomes.
    /// `Ne` has none of its own and is lowered as `(not (= ..))`.
    pub fn target_symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Eq | BinOp::Ne => "=",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}
