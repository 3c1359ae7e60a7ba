//! In-memory form of an Ourocode module.
//!
//! A module is built once (by [`super::text::parse_module`], by a front-end,
//! or by [`Module::from_bytes`]), validated once, and then only read. The
//! `Display` impls print the textual syntax that `parse_module` accepts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    I64,
    F64,
    Bool,
    Void,
    /// A struct declared in the module's type table, written `%Name`
    Named(String),
}

impl Type {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::I64 | Type::F64)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::I64 => write!(f, "i64"),
            Type::F64 => write!(f, "f64"),
            Type::Bool => write!(f, "bool"),
            Type::Void => write!(f, "void"),
            Type::Named(name) => write!(f, "%{name}"),
        }
    }
}

/// `%Name = type { f64, i64 }`: an ordered list of positional fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    pub fields: Vec<Type>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Bool(bool),
    /// `{ 1.0, 2 }`, only valid where a struct type is expected
    Aggregate(Vec<Constant>),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(n) => write!(f, "{n}"),
            // Debug keeps a `.0` or an exponent so the text reads back as a float
            Constant::Float(x) => write!(f, "{x:?}"),
            Constant::Bool(b) => write!(f, "{b}"),
            Constant::Aggregate(items) => {
                write!(f, "{{ ")?;
                write_list(f, items)?;
                write!(f, " }}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// A parameter or instruction result, written `%name`
    Local(String),
    Const(Constant),
}

impl Operand {
    pub fn local(name: &str) -> Self {
        Operand::Local(name.to_owned())
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Local(name) => write!(f, "%{name}"),
            Operand::Const(c) => write!(f, "{c}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Gt,
    Lt,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            CompareOp::Gt => "gt",
            CompareOp::Lt => "lt",
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
        }
    }

    /// `gt` and `lt` need an ordering; `eq` and `ne` work on every type.
    pub fn is_ordering(self) -> bool {
        matches!(self, CompareOp::Gt | CompareOp::Lt)
    }
}

/// Target of a `call`: `@f` in the same module or `@m::f` in module `m`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callee {
    pub module: Option<String>,
    pub function: String,
}

impl fmt::Display for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(module) => write!(f, "@{module}::{}", self.function),
            None => write!(f, "@{}", self.function),
        }
    }
}

/// One instruction. The last three variants are terminators; a well-formed
/// block ends with exactly one of them and has none before that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    Arith {
        dest: String,
        op: ArithOp,
        ty: Type,
        lhs: Operand,
        rhs: Operand,
    },
    Compare {
        dest: String,
        op: CompareOp,
        ty: Type,
        lhs: Operand,
        rhs: Operand,
    },
    Const {
        dest: String,
        ty: Type,
        value: Constant,
    },
    /// Read field `index` of a struct of type `ty`
    Extract {
        dest: String,
        ty: Type,
        aggregate: Operand,
        index: usize,
    },
    /// A copy of `aggregate` with field `index` replaced
    Insert {
        dest: String,
        ty: Type,
        aggregate: Operand,
        index: usize,
        value: Operand,
    },
    /// `ty` is the callee's return type; void calls have no destination
    Call {
        dest: Option<String>,
        ty: Type,
        callee: Callee,
        args: Vec<Operand>,
    },
    /// Pick the operand paired with the block control came from
    Phi {
        dest: String,
        ty: Type,
        incoming: Vec<(String, Operand)>,
    },
    Br {
        cond: Operand,
        if_true: String,
        if_false: String,
    },
    Jmp {
        target: String,
    },
    Ret {
        value: Option<Operand>,
    },
}

impl Instruction {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Br { .. } | Instruction::Jmp { .. } | Instruction::Ret { .. }
        )
    }

    /// The local this instruction defines, if any.
    pub fn dest(&self) -> Option<&str> {
        match self {
            Instruction::Arith { dest, .. }
            | Instruction::Compare { dest, .. }
            | Instruction::Const { dest, .. }
            | Instruction::Extract { dest, .. }
            | Instruction::Insert { dest, .. }
            | Instruction::Phi { dest, .. } => Some(dest),
            Instruction::Call { dest, .. } => dest.as_deref(),
            Instruction::Br { .. } | Instruction::Jmp { .. } | Instruction::Ret { .. } => None,
        }
    }

    /// Labels control may transfer to from this instruction.
    pub fn successors(&self) -> Vec<&str> {
        match self {
            Instruction::Br {
                if_true, if_false, ..
            } => vec![if_true.as_str(), if_false.as_str()],
            Instruction::Jmp { target } => vec![target.as_str()],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Arith {
                dest,
                op,
                ty,
                lhs,
                rhs,
            } => write!(f, "%{dest} = {} {ty} {lhs}, {rhs}", op.mnemonic()),
            Instruction::Compare {
                dest,
                op,
                ty,
                lhs,
                rhs,
            } => write!(f, "%{dest} = {} {ty} {lhs}, {rhs}", op.mnemonic()),
            Instruction::Const { dest, ty, value } => write!(f, "%{dest} = const {ty} {value}"),
            Instruction::Extract {
                dest,
                ty,
                aggregate,
                index,
            } => write!(f, "%{dest} = extract {ty} {aggregate}, {index}"),
            Instruction::Insert {
                dest,
                ty,
                aggregate,
                index,
                value,
            } => write!(f, "%{dest} = insert {ty} {aggregate}, {index}, {value}"),
            Instruction::Call {
                dest,
                ty,
                callee,
                args,
            } => {
                if let Some(dest) = dest {
                    write!(f, "%{dest} = ")?;
                }
                write!(f, "call {ty} {callee}(")?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Instruction::Phi { dest, ty, incoming } => {
                write!(f, "%{dest} = phi {ty} ")?;
                for (i, (label, value)) in incoming.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[{label}: {value}]")?;
                }
                Ok(())
            }
            Instruction::Br {
                cond,
                if_true,
                if_false,
            } => write!(f, "br {cond}, {if_true}, {if_false}"),
            Instruction::Jmp { target } => write!(f, "jmp {target}"),
            Instruction::Ret { value: Some(value) } => write!(f, "ret {value}"),
            Instruction::Ret { value: None } => write!(f, "ret"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub label: String,
    pub instructions: Vec<Instruction>,
}

impl Block {
    /// The final instruction, when it is a terminator.
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|i| i.is_terminator())
    }

    pub fn successors(&self) -> Vec<&str> {
        self.terminator()
            .map(Instruction::successors)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub params: Vec<Param>,
    pub return_type: Type,
    /// In source order; the first block need not be `entry`
    pub blocks: Vec<Block>,
}

impl Function {
    pub fn block(&self, label: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.label == label)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub version: String,
    /// Front-end language the module was lowered from, e.g. `python`
    pub source_language: String,
    pub types: BTreeMap<String, TypeDef>,
    pub functions: BTreeMap<String, Function>,
}

impl Module {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        source_language: impl Into<String>,
    ) -> Self {
        Module {
            name: name.into(),
            version: version.into(),
            source_language: source_language.into(),
            ..Module::default()
        }
    }

    /// Opaque byte form for hashing and storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "@module {} {} {}",
            self.name, self.version, self.source_language
        )?;
        for (name, def) in &self.types {
            write!(f, "%{name} = type {{ ")?;
            write_list(f, &def.fields)?;
            writeln!(f, " }}")?;
        }
        for (name, func) in &self.functions {
            write!(f, "define @{name}(")?;
            for (i, param) in func.params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "%{}: {}", param.name, param.ty)?;
            }
            writeln!(f, ") -> {} {{", func.return_type)?;
            for block in &func.blocks {
                writeln!(f, "{}:", block.label)?;
                for instruction in &block.instructions {
                    writeln!(f, "  {instruction}")?;
                }
            }
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}
