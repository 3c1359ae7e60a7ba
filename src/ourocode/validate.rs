//! Ourocode validation.
//!
//! Checks run in a fixed order over the whole module and stop at the first
//! failure:
//!
//!   1. header fields are present
//!   2. every type reference resolves
//!   3. every function has an `entry` block
//!   4. every block ends with exactly one terminator
//!   5. labels are unique and every jump target exists
//!   6. phis come first, sit in blocks that have predecessors, list at
//!      least one incoming value and only name direct predecessors
//!   7. values are defined once, defined before use on every path, and
//!      have the types their instructions expect
//!   8. no block can reach itself and no function can call itself
//!
//! A phi is not required to list every predecessor. The executor reports
//! the missing case when control actually arrives from one.

use super::module::{Constant, Function, Instruction, Module, Operand, Type};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("module header is missing its {field}")]
    MissingHeader { field: &'static str },

    #[error("{at}: unknown type {ty}")]
    UnknownType { at: String, ty: Type },

    #[error("@{function}: no block labeled 'entry'")]
    MissingEntry { function: String },

    #[error("@{function}: block '{block}' does not end with a terminator")]
    MissingTerminator { function: String, block: String },

    #[error("@{function}: block '{block}' has a terminator before its last instruction")]
    MisplacedTerminator { function: String, block: String },

    #[error("@{function}: block label '{block}' is used twice")]
    DuplicateLabel { function: String, block: String },

    #[error("@{function}: block '{block}' jumps to unknown label '{target}'")]
    UnknownLabel {
        function: String,
        block: String,
        target: String,
    },

    #[error("@{function}: phi in '{block}' lists '{from}', which is not a predecessor")]
    PhiNotPredecessor {
        function: String,
        block: String,
        from: String,
    },

    #[error("@{function}: phi in '{block}' follows a non-phi instruction")]
    PhiNotFirst { function: String, block: String },

    #[error("@{function}: phi %{dest} in '{block}' has no incoming values")]
    EmptyPhi {
        function: String,
        block: String,
        dest: String,
    },

    #[error("@{function}: phi %{dest} in '{block}', a block nothing jumps to")]
    PhiWithoutPredecessors {
        function: String,
        block: String,
        dest: String,
    },

    #[error("@{function}: %{name} is defined more than once")]
    DuplicateDefinition { function: String, name: String },

    #[error("@{function}: block '{block}' uses undefined value %{name}")]
    UndefinedValue {
        function: String,
        block: String,
        name: String,
    },

    #[error("@{function}: %{name} is not defined on every path into block '{block}'")]
    NotDominated {
        function: String,
        block: String,
        name: String,
    },

    #[error("@{function}: block '{block}': {detail}")]
    TypeMismatch {
        function: String,
        block: String,
        detail: String,
    },

    #[error("@{function}: block '{block}': {ty} has no field {index}")]
    FieldIndex {
        function: String,
        block: String,
        ty: Type,
        index: usize,
    },

    #[error("@{function}: call to unknown function @{callee}")]
    UnknownFunction { function: String, callee: String },

    #[error("@{function}: @{callee} takes {expected} argument(s), call passes {got}")]
    CallArity {
        function: String,
        callee: String,
        expected: usize,
        got: usize,
    },

    #[error("@{function}: '{from}' jumps back to '{to}', loops are not allowed")]
    BackEdge {
        function: String,
        from: String,
        to: String,
    },

    #[error("@{function} can call itself, recursion is not allowed")]
    RecursiveCall { function: String },
}

impl ValidationError {
    /// Stable identifier of the rule that failed.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingHeader { .. } => "missing-header",
            ValidationError::UnknownType { .. } => "unknown-type",
            ValidationError::MissingEntry { .. } => "missing-entry",
            ValidationError::MissingTerminator { .. } => "missing-terminator",
            ValidationError::MisplacedTerminator { .. } => "misplaced-terminator",
            ValidationError::DuplicateLabel { .. } => "duplicate-label",
            ValidationError::UnknownLabel { .. } => "unknown-label",
            ValidationError::PhiNotPredecessor { .. } => "phi-not-predecessor",
            ValidationError::PhiNotFirst { .. } => "phi-not-first",
            ValidationError::EmptyPhi { .. } => "empty-phi",
            ValidationError::PhiWithoutPredecessors { .. } => "phi-without-predecessors",
            ValidationError::DuplicateDefinition { .. } => "duplicate-definition",
            ValidationError::UndefinedValue { .. } => "undefined-value",
            ValidationError::NotDominated { .. } => "not-dominated",
            ValidationError::TypeMismatch { .. } => "type-mismatch",
            ValidationError::FieldIndex { .. } => "field-index",
            ValidationError::UnknownFunction { .. } => "unknown-function",
            ValidationError::CallArity { .. } => "call-arity",
            ValidationError::BackEdge { .. } => "back-edge",
            ValidationError::RecursiveCall { .. } => "recursive-call",
        }
    }
}

type Result<T> = std::result::Result<T, ValidationError>;

/// Validate a module. `Ok(())` means the executor may run it.
pub fn validate(module: &Module) -> Result<()> {
    let result = check_module(module);
    match &result {
        Ok(()) => debug!(
            module = %module.name,
            functions = module.functions.len(),
            "module validated"
        ),
        Err(err) => debug!(module = %module.name, reason = err.code(), "module rejected: {err}"),
    }
    result
}

fn check_module(module: &Module) -> Result<()> {
    check_header(module)?;
    check_types(module)?;
    for (name, function) in &module.functions {
        if function.block("entry").is_none() {
            return Err(ValidationError::MissingEntry {
                function: name.clone(),
            });
        }
    }
    for (name, function) in &module.functions {
        check_terminators(name, function)?;
    }
    for (name, function) in &module.functions {
        check_labels(name, function)?;
    }

    let graphs: Vec<(&String, &Function, Cfg<'_>)> = module
        .functions
        .iter()
        .map(|(name, function)| (name, function, Cfg::new(function)))
        .collect();
    for (name, function, cfg) in &graphs {
        check_phis(name, function, cfg)?;
    }
    for (name, function, cfg) in &graphs {
        FunctionChecker::new(module, name, function, cfg)?.run()?;
    }
    for (name, function, cfg) in &graphs {
        if let Some((from, to)) = find_back_edge(&cfg.succs, cfg.entry) {
            return Err(ValidationError::BackEdge {
                function: name.to_string(),
                from: function.blocks[from].label.clone(),
                to: function.blocks[to].label.clone(),
            });
        }
    }
    check_call_graph(module)
}

fn check_header(module: &Module) -> Result<()> {
    for (field, value) in [
        ("name", &module.name),
        ("version", &module.version),
        ("source language", &module.source_language),
    ] {
        if value.trim().is_empty() {
            return Err(ValidationError::MissingHeader { field });
        }
    }
    Ok(())
}

fn declared_type(instruction: &Instruction) -> Option<&Type> {
    match instruction {
        Instruction::Arith { ty, .. }
        | Instruction::Compare { ty, .. }
        | Instruction::Const { ty, .. }
        | Instruction::Extract { ty, .. }
        | Instruction::Insert { ty, .. }
        | Instruction::Call { ty, .. }
        | Instruction::Phi { ty, .. } => Some(ty),
        Instruction::Br { .. } | Instruction::Jmp { .. } | Instruction::Ret { .. } => None,
    }
}

fn check_types(module: &Module) -> Result<()> {
    let check = |at: &dyn Fn() -> String, ty: &Type| match ty {
        Type::Named(name) if !module.types.contains_key(name) => {
            Err(ValidationError::UnknownType {
                at: at(),
                ty: ty.clone(),
            })
        }
        _ => Ok(()),
    };

    for (name, def) in &module.types {
        for field in &def.fields {
            check(&|| format!("%{name}"), field)?;
        }
    }
    for (name, function) in &module.functions {
        let at = || format!("@{name}");
        for param in &function.params {
            check(&at, &param.ty)?;
        }
        check(&at, &function.return_type)?;
        for block in &function.blocks {
            for ty in block.instructions.iter().filter_map(declared_type) {
                check(&|| format!("@{name}/{}", block.label), ty)?;
            }
        }
    }
    Ok(())
}

fn check_terminators(name: &str, function: &Function) -> Result<()> {
    for block in &function.blocks {
        let Some((last, body)) = block.instructions.split_last() else {
            return Err(ValidationError::MissingTerminator {
                function: name.to_owned(),
                block: block.label.clone(),
            });
        };
        if body.iter().any(Instruction::is_terminator) {
            return Err(ValidationError::MisplacedTerminator {
                function: name.to_owned(),
                block: block.label.clone(),
            });
        }
        if !last.is_terminator() {
            return Err(ValidationError::MissingTerminator {
                function: name.to_owned(),
                block: block.label.clone(),
            });
        }
    }
    Ok(())
}

fn check_labels(name: &str, function: &Function) -> Result<()> {
    let mut seen = HashSet::new();
    for block in &function.blocks {
        if !seen.insert(block.label.as_str()) {
            return Err(ValidationError::DuplicateLabel {
                function: name.to_owned(),
                block: block.label.clone(),
            });
        }
    }
    for block in &function.blocks {
        for target in block.successors() {
            if !seen.contains(target) {
                return Err(ValidationError::UnknownLabel {
                    function: name.to_owned(),
                    block: block.label.clone(),
                    target: target.to_owned(),
                });
            }
        }
    }
    Ok(())
}

/// Control-flow graph over block indices. Built only once labels are known
/// to be unique and resolvable.
struct Cfg<'m> {
    index: HashMap<&'m str, usize>,
    entry: usize,
    preds: Vec<Vec<usize>>,
    succs: Vec<Vec<usize>>,
}

impl<'m> Cfg<'m> {
    fn new(function: &'m Function) -> Self {
        let index: HashMap<&str, usize> = function
            .blocks
            .iter()
            .enumerate()
            .map(|(i, block)| (block.label.as_str(), i))
            .collect();
        let n = function.blocks.len();
        let mut preds = vec![Vec::new(); n];
        let mut succs = vec![Vec::new(); n];
        for (from, block) in function.blocks.iter().enumerate() {
            for label in block.successors() {
                let Some(&to) = index.get(label) else {
                    continue;
                };
                if !succs[from].contains(&to) {
                    succs[from].push(to);
                    preds[to].push(from);
                }
            }
        }
        let entry = index.get("entry").copied().unwrap_or(0);
        Cfg {
            index,
            entry,
            preds,
            succs,
        }
    }

    fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.succs.len()];
        let mut stack = vec![self.entry];
        while let Some(b) = stack.pop() {
            if !std::mem::replace(&mut seen[b], true) {
                stack.extend(&self.succs[b]);
            }
        }
        seen
    }

    /// `dom[b]` holds every block that lies on all paths from entry to `b`,
    /// `b` included. Unreachable blocks keep the full set.
    fn dominators(&self) -> Vec<HashSet<usize>> {
        let n = self.succs.len();
        let reachable = self.reachable();
        let mut dom: Vec<HashSet<usize>> = vec![(0..n).collect(); n];
        dom[self.entry] = HashSet::from([self.entry]);

        let mut changed = true;
        while changed {
            changed = false;
            for b in (0..n).filter(|&b| b != self.entry && reachable[b]) {
                let mut next: Option<HashSet<usize>> = None;
                for &p in self.preds[b].iter().filter(|&&p| reachable[p]) {
                    next = Some(match next {
                        None => dom[p].clone(),
                        Some(acc) => acc.intersection(&dom[p]).copied().collect(),
                    });
                }
                let mut next = next.unwrap_or_default();
                next.insert(b);
                if next != dom[b] {
                    dom[b] = next;
                    changed = true;
                }
            }
        }
        dom
    }
}

fn check_phis(name: &str, function: &Function, cfg: &Cfg<'_>) -> Result<()> {
    for (b, block) in function.blocks.iter().enumerate() {
        let mut body_started = false;
        for instruction in &block.instructions {
            let Instruction::Phi { dest, incoming, .. } = instruction else {
                body_started = true;
                continue;
            };
            if body_started {
                return Err(ValidationError::PhiNotFirst {
                    function: name.to_owned(),
                    block: block.label.clone(),
                });
            }
            if cfg.preds[b].is_empty() {
                return Err(ValidationError::PhiWithoutPredecessors {
                    function: name.to_owned(),
                    block: block.label.clone(),
                    dest: dest.clone(),
                });
            }
            if incoming.is_empty() {
                return Err(ValidationError::EmptyPhi {
                    function: name.to_owned(),
                    block: block.label.clone(),
                    dest: dest.clone(),
                });
            }
            for (from, _) in incoming {
                let is_pred = cfg
                    .index
                    .get(from.as_str())
                    .is_some_and(|p| cfg.preds[b].contains(p));
                if !is_pred {
                    return Err(ValidationError::PhiNotPredecessor {
                        function: name.to_owned(),
                        block: block.label.clone(),
                        from: from.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Where a value is read.
#[derive(Clone, Copy)]
enum Site {
    /// Instruction `.1` of block `.0`
    At(usize, usize),
    /// After the last instruction of a block, for phi operands
    EndOf(usize),
}

impl Site {
    fn block(self) -> usize {
        match self {
            Site::At(b, _) | Site::EndOf(b) => b,
        }
    }
}

struct Def {
    ty: Type,
    /// `None` for parameters
    block: Option<usize>,
    index: usize,
}

struct FunctionChecker<'a> {
    module: &'a Module,
    name: &'a str,
    function: &'a Function,
    cfg: &'a Cfg<'a>,
    dominators: Vec<HashSet<usize>>,
    defs: HashMap<&'a str, Def>,
}

impl<'a> FunctionChecker<'a> {
    fn new(
        module: &'a Module,
        name: &'a str,
        function: &'a Function,
        cfg: &'a Cfg<'a>,
    ) -> Result<Self> {
        let mut checker = FunctionChecker {
            module,
            name,
            function,
            cfg,
            dominators: cfg.dominators(),
            defs: HashMap::new(),
        };
        for param in &function.params {
            checker.define(&param.name, param.ty.clone(), None, 0)?;
        }
        for (b, block) in function.blocks.iter().enumerate() {
            for (i, instruction) in block.instructions.iter().enumerate() {
                if let Some(dest) = instruction.dest() {
                    let ty = checker.result_type(instruction, b)?;
                    checker.define(dest, ty, Some(b), i)?;
                }
            }
        }
        Ok(checker)
    }

    fn define(&mut self, name: &'a str, ty: Type, block: Option<usize>, index: usize) -> Result<()> {
        if self.defs.insert(name, Def { ty, block, index }).is_some() {
            return Err(ValidationError::DuplicateDefinition {
                function: self.name.to_owned(),
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    fn result_type(&self, instruction: &Instruction, b: usize) -> Result<Type> {
        match instruction {
            Instruction::Compare { .. } => Ok(Type::Bool),
            Instruction::Extract { ty, index, .. } => self.field(ty, *index, b).cloned(),
            Instruction::Call { dest: Some(dest), ty: Type::Void, .. } => {
                Err(self.mismatch(b, format!("a void call cannot define %{dest}")))
            }
            other => Ok(declared_type(other).cloned().unwrap_or(Type::Void)),
        }
    }

    fn run(&self) -> Result<()> {
        for (b, block) in self.function.blocks.iter().enumerate() {
            for (i, instruction) in block.instructions.iter().enumerate() {
                self.instruction(instruction, Site::At(b, i))?;
            }
        }
        Ok(())
    }

    fn instruction(&self, instruction: &Instruction, here: Site) -> Result<()> {
        let b = here.block();
        match instruction {
            Instruction::Arith {
                op, ty, lhs, rhs, ..
            } => {
                if !ty.is_numeric() {
                    return Err(self.mismatch(b, format!("{} needs i64 or f64, not {ty}", op.mnemonic())));
                }
                self.operand(lhs, ty, here)?;
                self.operand(rhs, ty, here)
            }
            Instruction::Compare {
                op, ty, lhs, rhs, ..
            } => {
                if (op.is_ordering() && !ty.is_numeric()) || *ty == Type::Void {
                    return Err(self.mismatch(b, format!("{} cannot compare {ty}", op.mnemonic())));
                }
                self.operand(lhs, ty, here)?;
                self.operand(rhs, ty, here)
            }
            Instruction::Const { ty, value, .. } => self.constant(value, ty, b),
            Instruction::Extract { ty, aggregate, .. } => self.operand(aggregate, ty, here),
            Instruction::Insert {
                ty,
                aggregate,
                index,
                value,
                ..
            } => {
                self.operand(aggregate, ty, here)?;
                let field = self.field(ty, *index, b)?;
                self.operand(value, field, here)
            }
            Instruction::Call {
                ty, callee, args, ..
            } => {
                if callee.module.is_some() {
                    // Signature belongs to another module; checked when called.
                    for arg in args {
                        if let Operand::Local(name) = arg {
                            self.available(name, here)?;
                        }
                    }
                    return Ok(());
                }
                let Some(target) = self.module.functions.get(&callee.function) else {
                    return Err(ValidationError::UnknownFunction {
                        function: self.name.to_owned(),
                        callee: callee.function.clone(),
                    });
                };
                if args.len() != target.params.len() {
                    return Err(ValidationError::CallArity {
                        function: self.name.to_owned(),
                        callee: callee.function.clone(),
                        expected: target.params.len(),
                        got: args.len(),
                    });
                }
                for (arg, param) in args.iter().zip(&target.params) {
                    self.operand(arg, &param.ty, here)?;
                }
                if *ty != target.return_type {
                    return Err(self.mismatch(
                        b,
                        format!("{callee} returns {}, call says {ty}", target.return_type),
                    ));
                }
                Ok(())
            }
            Instruction::Phi { ty, incoming, .. } => {
                for (from, value) in incoming {
                    if let Some(&p) = self.cfg.index.get(from.as_str()) {
                        self.operand(value, ty, Site::EndOf(p))?;
                    }
                }
                Ok(())
            }
            Instruction::Br { cond, .. } => self.operand(cond, &Type::Bool, here),
            Instruction::Jmp { .. } => Ok(()),
            Instruction::Ret { value } => match (value, &self.function.return_type) {
                (None, Type::Void) => Ok(()),
                (None, ty) => Err(self.mismatch(b, format!("ret needs a {ty} value"))),
                (Some(_), Type::Void) => {
                    Err(self.mismatch(b, "ret with a value in a void function".to_owned()))
                }
                (Some(value), ty) => self.operand(value, ty, here),
            },
        }
    }

    fn operand(&self, operand: &Operand, expected: &Type, site: Site) -> Result<()> {
        match operand {
            Operand::Const(value) => self.constant(value, expected, site.block()),
            Operand::Local(name) => {
                let ty = self.available(name, site)?;
                if ty == expected {
                    Ok(())
                } else {
                    Err(self.mismatch(
                        site.block(),
                        format!("%{name} is {ty}, expected {expected}"),
                    ))
                }
            }
        }
    }

    /// The type of `name`, if its definition is guaranteed to have run
    /// by the time control reaches `site`.
    fn available(&self, name: &str, site: Site) -> Result<&Type> {
        let block = &self.function.blocks[site.block()].label;
        let Some(def) = self.defs.get(name) else {
            return Err(ValidationError::UndefinedValue {
                function: self.name.to_owned(),
                block: block.clone(),
                name: name.to_owned(),
            });
        };
        let ok = match (def.block, site) {
            (None, _) => true,
            (Some(d), Site::At(u, i)) if d == u => def.index < i,
            (Some(d), site) => self.dominators[site.block()].contains(&d),
        };
        if ok {
            Ok(&def.ty)
        } else {
            Err(ValidationError::NotDominated {
                function: self.name.to_owned(),
                block: block.clone(),
                name: name.to_owned(),
            })
        }
    }

    fn constant(&self, value: &Constant, expected: &Type, b: usize) -> Result<()> {
        let fits = match (value, expected) {
            (Constant::Int(_), Type::I64)
            | (Constant::Float(_), Type::F64)
            | (Constant::Bool(_), Type::Bool) => true,
            (Constant::Aggregate(items), Type::Named(name)) => {
                let fields = self
                    .module
                    .types
                    .get(name)
                    .map(|def| def.fields.as_slice())
                    .unwrap_or_default();
                if items.len() != fields.len() {
                    return Err(self.mismatch(
                        b,
                        format!(
                            "{expected} has {} field(s), constant has {}",
                            fields.len(),
                            items.len()
                        ),
                    ));
                }
                for (item, field) in items.iter().zip(fields) {
                    self.constant(item, field, b)?;
                }
                true
            }
            _ => false,
        };
        if fits {
            Ok(())
        } else {
            Err(self.mismatch(b, format!("constant {value} is not a {expected}")))
        }
    }

    fn field(&self, ty: &Type, index: usize, b: usize) -> Result<&'a Type> {
        let fields = match ty {
            Type::Named(name) => self.module.types.get(name).map(|def| &def.fields),
            _ => None,
        };
        let Some(fields) = fields else {
            return Err(self.mismatch(b, format!("extract and insert need a struct type, not {ty}")));
        };
        fields.get(index).ok_or_else(|| ValidationError::FieldIndex {
            function: self.name.to_owned(),
            block: self.function.blocks[b].label.clone(),
            ty: ty.clone(),
            index,
        })
    }

    fn mismatch(&self, b: usize, detail: String) -> ValidationError {
        ValidationError::TypeMismatch {
            function: self.name.to_owned(),
            block: self.function.blocks[b].label.clone(),
            detail,
        }
    }
}

/// Depth-first search from `root`, then from every node it missed. Returns
/// the first edge that points back into the current path.
fn find_back_edge(succs: &[Vec<usize>], root: usize) -> Option<(usize, usize)> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        OnPath,
        Done,
    }

    let mut marks = vec![Mark::New; succs.len()];
    let roots = std::iter::once(root).chain(0..succs.len());
    for start in roots {
        if marks[start] != Mark::New {
            continue;
        }
        marks[start] = Mark::OnPath;
        let mut stack = vec![(start, 0)];
        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            let Some(&succ) = succs[node].get(*next) else {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            };
            *next += 1;
            match marks[succ] {
                Mark::OnPath => return Some((node, succ)),
                Mark::New => {
                    marks[succ] = Mark::OnPath;
                    stack.push((succ, 0));
                }
                Mark::Done => {}
            }
        }
    }
    None
}

fn check_call_graph(module: &Module) -> Result<()> {
    let names: Vec<&String> = module.functions.keys().collect();
    let index: HashMap<&str, usize> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();
    let calls: Vec<Vec<usize>> = module
        .functions
        .values()
        .map(|function| {
            let mut callees = Vec::new();
            let local_calls = function
                .blocks
                .iter()
                .flat_map(|b| &b.instructions)
                .filter_map(|instruction| match instruction {
                    Instruction::Call { callee, .. } if callee.module.is_none() => {
                        index.get(callee.function.as_str()).copied()
                    }
                    _ => None,
                });
            for i in local_calls {
                if !callees.contains(&i) {
                    callees.push(i);
                }
            }
            callees
        })
        .collect();

    if names.is_empty() {
        return Ok(());
    }
    match find_back_edge(&calls, 0) {
        Some((_, to)) => Err(ValidationError::RecursiveCall {
            function: names[to].clone(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ourocode::parse_module;

    fn check(body: &str) -> Result<()> {
        let module = parse_module(&format!("@module m 1.0.0 test\n{body}")).unwrap();
        validate(&module)
    }

    const RATE: &str = "
        define @rate(%population: f64) -> f64 {
        entry:
          %big = gt f64 %population, 100.0
          br %big, high, low
        high:
          %r1 = const f64 0.05
          jmp merge
        low:
          %r2 = const f64 0.1
          jmp merge
        merge:
          %rate = phi f64 [high: %r1], [low: %r2]
          ret %rate
        }
    ";

    #[test]
    fn test_accepts_well_formed_modules() {
        check(RATE).unwrap();
        check(
            "%Pair = type { f64, i64 }
             define @swap(%p: %Pair, %n: i64) -> %Pair {
             entry:
               %x = extract %Pair %p, 0
               %y = mul f64 %x, 2.0
               %q = insert %Pair %p, 0, %y
               %r = insert %Pair %q, 1, %n
               ret %r
             }
             define @main() -> f64 {
             entry:
               %p = const %Pair { 1.5, 7 }
               %q = call %Pair @swap(%p, 3)
               %v = call f64 @other::read(%q)
               call void @other::log(%v)
               ret %v
             }",
        )
        .unwrap();
        // A value defined in entry is available after a diamond.
        check(
            "define @f(%c: bool) -> i64 {
             entry:
               %x = const i64 1
               br %c, a, b
             a:
               jmp m
             b:
               jmp m
             m:
               %y = add i64 %x, %x
               ret %y
             }",
        )
        .unwrap();
    }

    #[test]
    fn test_rejections_have_distinct_reasons() {
        let cases = [
            (
                "define @f() -> i64 {\nstart:\n  ret 1\n}",
                "missing-entry",
            ),
            (
                "define @f() -> i64 {\nentry:\n  %x = const i64 1\n}",
                "missing-terminator",
            ),
            (
                "define @f() -> i64 {\nentry:\n}",
                "missing-terminator",
            ),
            (
                "define @f() -> i64 {\nentry:\n  ret 1\n  %x = const i64 1\n  ret %x\n}",
                "misplaced-terminator",
            ),
            (
                "define @f() -> i64 {\nentry:\n  jmp nowhere\n}",
                "unknown-label",
            ),
            (
                "define @f() -> i64 {\nentry:\n  jmp a\na:\n  ret 1\na:\n  ret 2\n}",
                "duplicate-label",
            ),
            (
                "define @f() -> i64 {
                 entry:
                   br true, a, b
                 a:
                   jmp m
                 b:
                   jmp m
                 m:
                   %x = phi i64 [a: 1], [entry: 2]
                   ret %x
                 }",
                "phi-not-predecessor",
            ),
            (
                "define @f() -> i64 {
                 entry:
                   jmp m
                 m:
                   %y = const i64 1
                   %x = phi i64 [entry: 2]
                   ret %x
                 }",
                "phi-not-first",
            ),
            (
                "define @f() -> i64 {\nentry:\n  %x = phi i64 [entry: 1]\n  ret %x\n}",
                "phi-without-predecessors",
            ),
            (
                "define @f() -> i64 {\nentry:\n  ret %nope\n}",
                "undefined-value",
            ),
            (
                "define @f(%c: bool) -> f64 {
                 entry:
                   br %c, high, low
                 high:
                   %r1 = const f64 0.05
                   jmp merge
                 low:
                   jmp merge
                 merge:
                   ret %r1
                 }",
                "not-dominated",
            ),
            (
                "define @f() -> i64 {\nentry:\n  %a = add i64 %a, 1\n  ret %a\n}",
                "not-dominated",
            ),
            (
                "define @f(%x: i64) -> i64 {\nentry:\n  %x = const i64 1\n  ret %x\n}",
                "duplicate-definition",
            ),
            (
                "define @f(%x: f64) -> f64 {\nentry:\n  %y = add f64 %x, 1\n  ret %y\n}",
                "type-mismatch",
            ),
            (
                "define @f(%x: i64) -> i64 {\nentry:\n  br %x, a, a\na:\n  ret 1\n}",
                "type-mismatch",
            ),
            (
                "define @f(%x: bool) -> bool {\nentry:\n  %y = lt bool %x, %x\n  ret %y\n}",
                "type-mismatch",
            ),
            (
                "define @f() -> i64 {\nentry:\n  ret\n}",
                "type-mismatch",
            ),
            (
                "%Pair = type { f64, i64 }
                 define @f(%p: %Pair) -> f64 {\nentry:\n  %x = extract %Pair %p, 2\n  ret %x\n}",
                "field-index",
            ),
            (
                "%Pair = type { f64, i64 }
                 define @f() -> %Pair {\nentry:\n  %p = const %Pair { 1.0 }\n  ret %p\n}",
                "type-mismatch",
            ),
            (
                "define @f() -> i64 {\nentry:\n  %x = call i64 @g()\n  ret %x\n}",
                "unknown-function",
            ),
            (
                "define @g(%a: i64) -> i64 {\nentry:\n  ret %a\n}
                 define @f() -> i64 {\nentry:\n  %x = call i64 @g()\n  ret %x\n}",
                "call-arity",
            ),
            (
                "define @f() -> i64 {\nentry:\n  jmp a\na:\n  jmp b\nb:\n  jmp a\n}",
                "back-edge",
            ),
            (
                "define @f(%n: i64) -> i64 {\nentry:\n  %x = call i64 @g(%n)\n  ret %x\n}
                 define @g(%n: i64) -> i64 {\nentry:\n  %x = call i64 @f(%n)\n  ret %x\n}",
                "recursive-call",
            ),
            (
                "define @f(%p: %Nope) -> i64 {\nentry:\n  ret 1\n}",
                "unknown-type",
            ),
        ];
        for (body, code) in cases {
            let err = check(body).unwrap_err();
            assert_eq!(err.code(), code, "{body}\n{err}");
        }
    }

    #[test]
    fn test_specific_reasons() {
        assert_eq!(
            check("define @f() -> i64 {\nentry:\n  jmp nowhere\n}").unwrap_err(),
            ValidationError::UnknownLabel {
                function: "f".into(),
                block: "entry".into(),
                target: "nowhere".into(),
            }
        );
        assert_eq!(
            check("define @f() -> i64 {\nentry:\n  jmp a\na:\n  jmp b\nb:\n  jmp a\n}").unwrap_err(),
            ValidationError::BackEdge {
                function: "f".into(),
                from: "b".into(),
                to: "a".into(),
            }
        );
    }

    #[test]
    fn test_phi_needs_an_incoming_value() {
        let mut module = parse_module(&format!("@module m 1.0.0 test\n{RATE}")).unwrap();
        let merge = module
            .functions
            .get_mut("rate")
            .unwrap()
            .blocks
            .iter_mut()
            .find(|block| block.label == "merge")
            .unwrap();
        let Instruction::Phi { incoming, .. } = &mut merge.instructions[0] else {
            panic!("merge should open with a phi");
        };
        incoming.clear();
        assert_eq!(
            validate(&module).unwrap_err(),
            ValidationError::EmptyPhi {
                function: "rate".into(),
                block: "merge".into(),
                dest: "rate".into(),
            }
        );
    }

    #[test]
    fn test_checks_run_in_order() {
        // @a has a bad jump, @z has no entry block; the entry check runs first.
        let err = check(
            "define @a() -> i64 {\nentry:\n  jmp nowhere\n}
             define @z() -> i64 {\nstart:\n  ret 1\n}",
        )
        .unwrap_err();
        assert_eq!(err.code(), "missing-entry");
    }

    #[test]
    fn test_missing_header() {
        let err = validate(&Module::new("m", " ", "python")).unwrap_err();
        assert_eq!(err, ValidationError::MissingHeader { field: "version" });
        assert_eq!(err.to_string(), "module header is missing its version");
    }
}
