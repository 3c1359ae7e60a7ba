//! Block-at-a-time execution of validated Ourocode.
//!
//! Each call gets a flat map from local name to value. Running a block
//! writes one binding per instruction; the terminator either returns or
//! names the next block, and the block just left becomes the predecessor
//! that the next block's phis select on. Modules are never modified.

use super::module::{ArithOp, CompareOp, Constant, Function, Instruction, Module, Operand, Type};
use super::text::{SyntaxError, parse_module};
use super::validate::{ValidationError, validate};
use crate::config::Limits;
use crate::sandbox::{Budget, LimitExceeded};
use crate::ErrorReport;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, trace};

/// A runtime value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum IrValue {
    I64(i64),
    F64(f64),
    Bool(bool),
    Void,
    /// Instance of the named struct type; fields in declaration order
    Struct { ty: String, fields: Vec<IrValue> },
}

impl IrValue {
    /// Shallow type test; struct fields are not inspected.
    pub fn has_type(&self, ty: &Type) -> bool {
        match (self, ty) {
            (IrValue::I64(_), Type::I64)
            | (IrValue::F64(_), Type::F64)
            | (IrValue::Bool(_), Type::Bool)
            | (IrValue::Void, Type::Void) => true,
            (IrValue::Struct { ty: name, .. }, Type::Named(expected)) => name == expected,
            _ => false,
        }
    }
}

impl From<i64> for IrValue {
    fn from(n: i64) -> Self {
        IrValue::I64(n)
    }
}

impl From<f64> for IrValue {
    fn from(x: f64) -> Self {
        IrValue::F64(x)
    }
}

impl From<bool> for IrValue {
    fn from(b: bool) -> Self {
        IrValue::Bool(b)
    }
}

impl fmt::Display for IrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrValue::I64(n) => write!(f, "{n}"),
            IrValue::F64(x) => write!(f, "{x:?}"),
            IrValue::Bool(b) => write!(f, "{b}"),
            IrValue::Void => write!(f, "void"),
            IrValue::Struct { ty, fields } => {
                write!(f, "%{ty} {{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, " }}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    #[error("no module named '{0}' is loaded")]
    UnknownModule(String),

    #[error("module '{module}' has no function @{function}")]
    UnknownFunction { module: String, function: String },

    #[error("@{function} takes {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: usize,
        got: usize,
    },

    #[error("{0}")]
    TypeError(String),

    #[error("division by zero in @{function}")]
    ZeroDivision { function: String },

    #[error("integer overflow in @{function}")]
    Overflow { function: String },

    #[error(transparent)]
    ResourceLimit(#[from] LimitExceeded),

    /// Something the validator should have ruled out
    #[error("internal consistency check failed: {0}")]
    ValidationEscape(String),

    #[error("module rejected: {0}")]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Syntax(#[from] SyntaxError),
}

impl ExecError {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ExecError::UnknownModule(_) => "UnknownModuleError",
            ExecError::UnknownFunction { .. } => "UnknownFunctionError",
            ExecError::Arity { .. } => "ArityError",
            ExecError::TypeError(_) => "TypeError",
            ExecError::ZeroDivision { .. } => "ZeroDivisionError",
            ExecError::Overflow { .. } => "OverflowError",
            ExecError::ResourceLimit(_) => "ResourceLimitError",
            ExecError::ValidationEscape(_) => "ValidationEscapeError",
            ExecError::Invalid(_) => "ValidationError",
            ExecError::Syntax(_) => "SyntaxError",
        }
    }

    pub fn report(&self) -> ErrorReport {
        let (message, location) = match self {
            ExecError::Syntax(e) => (e.message.clone(), Some(e.location)),
            other => (other.to_string(), None),
        };
        ErrorReport {
            kind: self.kind_name().to_owned(),
            message,
            location,
        }
    }
}

type Result<T> = std::result::Result<T, ExecError>;

/// Holds validated modules by name and runs their functions.
#[derive(Debug, Default)]
pub struct Executor {
    modules: HashMap<String, Module>,
    limits: Limits,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: Limits) -> Self {
        Executor {
            modules: HashMap::new(),
            limits,
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Validate `module` and make it callable, replacing any module of the
    /// same name. An invalid module is not loaded.
    pub fn load(&mut self, module: Module) -> Result<()> {
        validate(&module)?;
        info!(
            module = %module.name,
            version = %module.version,
            language = %module.source_language,
            "loaded module"
        );
        self.modules.insert(module.name.clone(), module);
        Ok(())
    }

    /// Parse, validate and load a module from text. Returns its name.
    pub fn load_text(&mut self, source: &str) -> Result<String> {
        let module = parse_module(source)?;
        let name = module.name.clone();
        self.load(module)?;
        Ok(name)
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn module_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Call `function` in `module`. Every call starts with a fresh budget.
    pub fn execute(&self, module: &str, function: &str, args: Vec<IrValue>) -> Result<IrValue> {
        let mut run = Run {
            executor: self,
            budget: Budget::new(self.limits),
        };
        let result = run.call(module, function, args);
        debug!(
            module,
            function,
            instructions = run.budget.instructions(),
            ok = result.is_ok(),
            "execution finished"
        );
        result
    }
}

/// Deep type test against a module's struct table.
fn conforms(value: &IrValue, ty: &Type, module: &Module) -> bool {
    match (value, ty) {
        (IrValue::Struct { ty: name, fields }, Type::Named(expected)) => {
            name == expected
                && module.types.get(expected).is_some_and(|def| {
                    def.fields.len() == fields.len()
                        && fields
                            .iter()
                            .zip(&def.fields)
                            .all(|(field, ty)| conforms(field, ty, module))
                })
        }
        _ => value.has_type(ty),
    }
}

/// State of one `execute` call.
struct Run<'e> {
    executor: &'e Executor,
    budget: Budget,
}

/// Bindings of one function activation.
struct Frame<'e> {
    module: &'e Module,
    function: &'e str,
    bindings: HashMap<&'e str, IrValue>,
}

impl<'e> Frame<'e> {
    fn bind(&mut self, name: &'e str, value: IrValue) {
        self.bindings.insert(name, value);
    }

    /// Evaluate an operand; `ty` gives constants their shape.
    fn operand(&self, operand: &Operand, ty: &Type) -> Result<IrValue> {
        match operand {
            Operand::Local(name) => self.bindings.get(name.as_str()).cloned().ok_or_else(|| {
                ExecError::ValidationEscape(format!(
                    "@{}: %{name} read before it was defined",
                    self.function
                ))
            }),
            Operand::Const(value) => self.constant(value, ty),
        }
    }

    fn constant(&self, value: &Constant, ty: &Type) -> Result<IrValue> {
        match (value, ty) {
            (Constant::Int(n), _) => Ok(IrValue::I64(*n)),
            (Constant::Float(x), _) => Ok(IrValue::F64(*x)),
            (Constant::Bool(b), _) => Ok(IrValue::Bool(*b)),
            (Constant::Aggregate(items), Type::Named(name)) => {
                let Some(def) = self.module.types.get(name) else {
                    return Err(ExecError::ValidationEscape(format!("unknown type %{name}")));
                };
                if def.fields.len() != items.len() {
                    return Err(ExecError::ValidationEscape(format!(
                        "constant {value} does not fit %{name}"
                    )));
                }
                let fields = items
                    .iter()
                    .zip(&def.fields)
                    .map(|(item, field)| self.constant(item, field))
                    .collect::<Result<Vec<_>>>()?;
                Ok(IrValue::Struct {
                    ty: name.clone(),
                    fields,
                })
            }
            (Constant::Aggregate(_), other) => Err(ExecError::ValidationEscape(format!(
                "aggregate constant used as {other}"
            ))),
        }
    }
}

impl<'e> Run<'e> {
    fn call(&mut self, module: &str, function: &str, args: Vec<IrValue>) -> Result<IrValue> {
        let executor = self.executor;
        let Some(target) = executor.modules.get(module) else {
            return Err(ExecError::UnknownModule(module.to_owned()));
        };
        let Some((name, body)) = target.functions.get_key_value(function) else {
            return Err(ExecError::UnknownFunction {
                module: module.to_owned(),
                function: function.to_owned(),
            });
        };
        if args.len() != body.params.len() {
            return Err(ExecError::Arity {
                function: name.clone(),
                expected: body.params.len(),
                got: args.len(),
            });
        }
        for (arg, param) in args.iter().zip(&body.params) {
            if !conforms(arg, &param.ty, target) {
                return Err(ExecError::TypeError(format!(
                    "@{name}: parameter %{} is {}, got {arg}",
                    param.name, param.ty
                )));
            }
        }

        self.budget.enter()?;
        let result = self.run_body(target, name, body, args);
        self.budget.leave();

        let value = result?;
        if !conforms(&value, &body.return_type, target) {
            return Err(ExecError::TypeError(format!(
                "@{name} returns {}, produced {value}",
                body.return_type
            )));
        }
        Ok(value)
    }

    fn run_body(
        &mut self,
        module: &'e Module,
        name: &'e str,
        function: &'e Function,
        args: Vec<IrValue>,
    ) -> Result<IrValue> {
        let mut frame = Frame {
            module,
            function: name,
            bindings: HashMap::new(),
        };
        for (param, arg) in function.params.iter().zip(args) {
            frame.bind(&param.name, arg);
        }

        let Some(mut block) = function.block("entry") else {
            return Err(ExecError::ValidationEscape(format!("@{name} has no entry block")));
        };
        let mut predecessor: Option<&'e str> = None;
        loop {
            let mut next = None;
            for instruction in &block.instructions {
                self.budget.tick()?;
                match instruction {
                    Instruction::Br {
                        cond,
                        if_true,
                        if_false,
                    } => {
                        let taken = match frame.operand(cond, &Type::Bool)? {
                            IrValue::Bool(true) => if_true,
                            IrValue::Bool(false) => if_false,
                            other => {
                                return Err(ExecError::TypeError(format!(
                                    "@{name}: br condition is {other}, not a bool"
                                )));
                            }
                        };
                        next = Some(taken);
                        break;
                    }
                    Instruction::Jmp { target } => {
                        next = Some(target);
                        break;
                    }
                    Instruction::Ret { value } => {
                        return match value {
                            Some(value) => frame.operand(value, &function.return_type),
                            None => Ok(IrValue::Void),
                        };
                    }
                    Instruction::Phi { dest, ty, incoming } => {
                        let Some(from) = predecessor else {
                            return Err(ExecError::ValidationEscape(format!(
                                "@{name}: phi %{dest} in '{}' reached without a predecessor",
                                block.label
                            )));
                        };
                        let Some((_, value)) = incoming.iter().find(|(label, _)| label == from)
                        else {
                            return Err(ExecError::ValidationEscape(format!(
                                "@{name}: phi %{dest} in '{}' has no operand for '{from}'",
                                block.label
                            )));
                        };
                        let value = frame.operand(value, ty)?;
                        frame.bind(dest, value);
                    }
                    other => {
                        let value = self.compute(&frame, other)?;
                        if let Some(dest) = other.dest() {
                            frame.bind(dest, value);
                        }
                    }
                }
            }

            let Some(target) = next else {
                return Err(ExecError::ValidationEscape(format!(
                    "@{name}: block '{}' has no terminator",
                    block.label
                )));
            };
            trace!(function = name, from = %block.label, to = %target, "branch");
            predecessor = Some(block.label.as_str());
            block = function.block(target).ok_or_else(|| {
                ExecError::ValidationEscape(format!("@{name}: no block labeled '{target}'"))
            })?;
        }
    }

    /// Everything except control flow and phis.
    fn compute(&mut self, frame: &Frame<'e>, instruction: &Instruction) -> Result<IrValue> {
        let function = frame.function;
        match instruction {
            Instruction::Arith {
                op, ty, lhs, rhs, ..
            } => arith(
                *op,
                frame.operand(lhs, ty)?,
                frame.operand(rhs, ty)?,
                function,
            ),
            Instruction::Compare {
                op, ty, lhs, rhs, ..
            } => compare(*op, &frame.operand(lhs, ty)?, &frame.operand(rhs, ty)?).map(IrValue::Bool),
            Instruction::Const { ty, value, .. } => frame.constant(value, ty),
            Instruction::Extract {
                ty,
                aggregate,
                index,
                ..
            } => match frame.operand(aggregate, ty)? {
                IrValue::Struct { mut fields, .. } if *index < fields.len() => {
                    Ok(fields.swap_remove(*index))
                }
                other => Err(ExecError::TypeError(format!(
                    "@{function}: cannot extract field {index} from {other}"
                ))),
            },
            Instruction::Insert {
                ty,
                aggregate,
                index,
                value,
                ..
            } => {
                // Operands are copies, so the original binding stays intact.
                let IrValue::Struct { ty: name, mut fields } = frame.operand(aggregate, ty)? else {
                    return Err(ExecError::TypeError(format!(
                        "@{function}: insert into a non-struct value"
                    )));
                };
                let field_ty = frame
                    .module
                    .types
                    .get(&name)
                    .and_then(|def| def.fields.get(*index))
                    .cloned()
                    .unwrap_or(Type::Void);
                let Some(slot) = fields.get_mut(*index) else {
                    return Err(ExecError::TypeError(format!(
                        "@{function}: %{name} has no field {index}"
                    )));
                };
                *slot = frame.operand(value, &field_ty)?;
                Ok(IrValue::Struct { ty: name, fields })
            }
            Instruction::Call {
                ty, callee, args, ..
            } => {
                let module_name = callee.module.as_deref().unwrap_or(&frame.module.name);
                let params = self
                    .executor
                    .modules
                    .get(module_name)
                    .and_then(|m| m.functions.get(&callee.function))
                    .map(|f| f.params.as_slice())
                    .unwrap_or_default();
                let mut values = Vec::with_capacity(args.len());
                for (i, arg) in args.iter().enumerate() {
                    let ty = params.get(i).map_or(&Type::Void, |p| &p.ty);
                    values.push(frame.operand(arg, ty)?);
                }
                trace!(caller = function, %callee, "call");
                let result = self.call(module_name, &callee.function, values)?;
                if !result.has_type(ty) {
                    return Err(ExecError::TypeError(format!(
                        "@{function}: {callee} returned {result}, expected {ty}"
                    )));
                }
                Ok(result)
            }
            Instruction::Phi { .. }
            | Instruction::Br { .. }
            | Instruction::Jmp { .. }
            | Instruction::Ret { .. } => Err(ExecError::ValidationEscape(format!(
                "@{function}: unexpected {instruction}"
            ))),
        }
    }
}

fn arith(op: ArithOp, lhs: IrValue, rhs: IrValue, function: &str) -> Result<IrValue> {
    match (lhs, rhs) {
        (IrValue::I64(a), IrValue::I64(b)) => {
            let result = match op {
                ArithOp::Add => a.checked_add(b),
                ArithOp::Sub => a.checked_sub(b),
                ArithOp::Mul => a.checked_mul(b),
                ArithOp::Div if b == 0 => {
                    return Err(ExecError::ZeroDivision {
                        function: function.to_owned(),
                    });
                }
                ArithOp::Div => a.checked_div(b),
            };
            result.map(IrValue::I64).ok_or_else(|| ExecError::Overflow {
                function: function.to_owned(),
            })
        }
        (IrValue::F64(a), IrValue::F64(b)) => Ok(IrValue::F64(match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div if b == 0.0 => {
                return Err(ExecError::ZeroDivision {
                    function: function.to_owned(),
                });
            }
            ArithOp::Div => a / b,
        })),
        (a, b) => Err(ExecError::TypeError(format!(
            "@{function}: {} needs two numbers of one type, got {a} and {b}",
            op.mnemonic()
        ))),
    }
}

fn compare(op: CompareOp, lhs: &IrValue, rhs: &IrValue) -> Result<bool> {
    let ordering = match (lhs, rhs) {
        (IrValue::I64(a), IrValue::I64(b)) => a.partial_cmp(b),
        (IrValue::F64(a), IrValue::F64(b)) => a.partial_cmp(b),
        _ if !op.is_ordering() => None,
        _ => {
            return Err(ExecError::TypeError(format!(
                "{} cannot order {lhs} and {rhs}",
                op.mnemonic()
            )));
        }
    };
    Ok(match op {
        CompareOp::Gt => ordering == Some(Ordering::Greater),
        CompareOp::Lt => ordering == Some(Ordering::Less),
        CompareOp::Eq => lhs == rhs,
        CompareOp::Ne => lhs != rhs,
    })
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;

    const RATE: &str = "
        @module population 1.0.0 python
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

    fn executor(sources: &[&str]) -> Executor {
        let mut executor = Executor::new();
        for source in sources {
            executor.load_text(source).unwrap();
        }
        executor
    }

    #[test]
    fn test_phi_follows_the_path_taken() {
        let ex = executor(&[RATE]);
        let cases = [(150.0, 0.05), (50.0, 0.1), (100.0, 0.1), (100.5, 0.05)];
        for (population, rate) in cases {
            assert_eq!(
                ex.execute("population", "rate", vec![population.into()]).unwrap(),
                IrValue::F64(rate),
                "population {population}"
            );
        }
    }

    #[test]
    fn test_insert_returns_a_copy() {
        let ex = executor(&["
            @module structs 1.0.0 test
            %Pair = type { f64, i64 }
            define @demo() -> f64 {
            entry:
              %p = const %Pair { 1.5, 7 }
              %q = insert %Pair %p, 0, 9.0
              %a = extract %Pair %p, 0
              %b = extract %Pair %q, 0
              %d = sub f64 %b, %a
              ret %d
            }
            define @bump(%p: %Pair) -> %Pair {
            entry:
              %n = extract %Pair %p, 1
              %m = add i64 %n, 1
              %q = insert %Pair %p, 1, %m
              ret %q
            }
        "]);
        assert_eq!(ex.execute("structs", "demo", vec![]).unwrap(), IrValue::F64(7.5));

        let original = IrValue::Struct {
            ty: "Pair".into(),
            fields: vec![1.5.into(), IrValue::I64(7)],
        };
        let bumped = ex.execute("structs", "bump", vec![original.clone()]).unwrap();
        assert_eq!(
            bumped,
            IrValue::Struct {
                ty: "Pair".into(),
                fields: vec![1.5.into(), IrValue::I64(8)],
            }
        );
        assert_eq!(
            original,
            IrValue::Struct {
                ty: "Pair".into(),
                fields: vec![1.5.into(), IrValue::I64(7)],
            }
        );
        assert_eq!(bumped.to_string(), "%Pair { 1.5, 8 }");
    }

    #[test]
    fn test_cross_module_call() {
        let mut ex = executor(&["
            @module app 1.0.0 test
            define @main(%x: f64) -> f64 {
            entry:
              %y = call f64 @geometry::scale(%x)
              %z = call f64 @twice(%y)
              ret %z
            }
            define @twice(%v: f64) -> f64 {
            entry:
              %w = add f64 %v, %v
              ret %w
            }
        "]);
        assert_eq!(
            ex.execute("app", "main", vec![1.0.into()]).unwrap_err(),
            ExecError::UnknownModule("geometry".into())
        );

        ex.load_text(
            "@module geometry 0.1.0 test
             define @scale(%x: f64) -> f64 {
             entry:
               %y = mul f64 %x, 3.0
               ret %y
             }",
        )
        .unwrap();
        assert_eq!(ex.execute("app", "main", vec![2.0.into()]).unwrap(), IrValue::F64(12.0));
        assert_eq!(ex.module_names(), vec!["app", "geometry"]);
    }

    #[test]
    fn test_call_errors() {
        let ex = executor(&[RATE]);
        assert!(matches!(
            ex.execute("population", "rate", vec![]),
            Err(ExecError::Arity { expected: 1, got: 0, .. })
        ));
        assert!(matches!(
            ex.execute("population", "rate", vec![IrValue::I64(150)]),
            Err(ExecError::TypeError(_))
        ));
        assert_eq!(
            ex.execute("nowhere", "rate", vec![]).unwrap_err(),
            ExecError::UnknownModule("nowhere".into())
        );
        assert_eq!(
            ex.execute("population", "growth", vec![]).unwrap_err(),
            ExecError::UnknownFunction {
                module: "population".into(),
                function: "growth".into(),
            }
        );
    }

    #[test]
    fn test_arithmetic_faults() {
        let ex = executor(&["
            @module math 1.0.0 test
            define @idiv(%a: i64, %b: i64) -> i64 {
            entry:
              %c = div i64 %a, %b
              ret %c
            }
            define @fdiv(%a: f64, %b: f64) -> f64 {
            entry:
              %c = div f64 %a, %b
              ret %c
            }
            define @inc(%a: i64) -> i64 {
            entry:
              %c = add i64 %a, 1
              ret %c
            }
        "]);
        assert_eq!(ex.execute("math", "idiv", vec![IrValue::I64(7), IrValue::I64(2)]).unwrap(), IrValue::I64(3));
        assert!(matches!(
            ex.execute("math", "idiv", vec![IrValue::I64(1), IrValue::I64(0)]),
            Err(ExecError::ZeroDivision { .. })
        ));
        assert!(matches!(
            ex.execute("math", "idiv", vec![i64::MIN.into(), IrValue::I64(-1)]),
            Err(ExecError::Overflow { .. })
        ));
        assert!(matches!(
            ex.execute("math", "fdiv", vec![1.0.into(), 0.0.into()]),
            Err(ExecError::ZeroDivision { .. })
        ));
        assert!(matches!(
            ex.execute("math", "inc", vec![i64::MAX.into()]),
            Err(ExecError::Overflow { .. })
        ));
    }

    #[test]
    fn test_incomplete_phi_escapes() {
        // Valid: the phi names only real predecessors. Arriving from `low`
        // finds no operand.
        let ex = executor(&["
            @module partial 1.0.0 test
            define @pick(%c: bool) -> i64 {
            entry:
              br %c, high, low
            high:
              %a = const i64 1
              jmp merge
            low:
              jmp merge
            merge:
              %r = phi i64 [high: %a]
              ret %r
            }
        "]);
        assert_eq!(ex.execute("partial", "pick", vec![true.into()]).unwrap(), IrValue::I64(1));
        let err = ex.execute("partial", "pick", vec![false.into()]).unwrap_err();
        assert!(matches!(err, ExecError::ValidationEscape(_)), "{err}");
        assert_eq!(err.report().kind, "ValidationEscapeError");
    }

    #[test]
    fn test_limits() {
        let mut ex = Executor::with_limits(Limits::default().with_max_instructions(3));
        ex.load_text(RATE).unwrap();
        assert_eq!(
            ex.execute("population", "rate", vec![150.0.into()]).unwrap_err(),
            ExecError::ResourceLimit(LimitExceeded::Instructions { limit: 3 })
        );

        let chain = "
            @module chain 1.0.0 test
            define @a() -> i64 {
            entry:
              %x = call i64 @b()
              ret %x
            }
            define @b() -> i64 {
            entry:
              %x = call i64 @c()
              ret %x
            }
            define @c() -> i64 {
            entry:
              ret 3
            }
        ";
        let mut ex = Executor::with_limits(Limits::default().with_max_depth(2));
        ex.load_text(chain).unwrap();
        assert_eq!(ex.execute("chain", "b", vec![]).unwrap(), IrValue::I64(3));
        assert_eq!(
            ex.execute("chain", "a", vec![]).unwrap_err(),
            ExecError::ResourceLimit(LimitExceeded::Depth { limit: 2 })
        );
        // The budget is per call.
        assert_eq!(ex.execute("chain", "b", vec![]).unwrap(), IrValue::I64(3));
    }

    #[test]
    fn test_mutual_recursion_across_modules_stops_at_default_depth() {
        let ping = "
            @module ping 1.0.0 test
            define @f(%n: i64) -> i64 {
            entry:
              %m = add i64 %n, 1
              %r = call i64 @pong::g(%m)
              ret %r
            }
        ";
        let pong = "
            @module pong 1.0.0 test
            define @g(%n: i64) -> i64 {
            entry:
              %r = call i64 @ping::f(%n)
              ret %r
            }
        ";
        let ex = executor(&[ping, pong]);
        assert_eq!(
            ex.execute("ping", "f", vec![IrValue::I64(0)]).unwrap_err(),
            ExecError::ResourceLimit(LimitExceeded::Depth {
                limit: crate::MAX_EVAL_DEPTH
            })
        );

        let limits = Limits {
            max_depth: 1_000_000,
            ..Limits::default()
        };
        let mut ex = Executor::with_limits(limits);
        ex.load_text(ping).unwrap();
        ex.load_text(pong).unwrap();
        assert_eq!(
            ex.execute("pong", "g", vec![IrValue::I64(0)]).unwrap_err(),
            ExecError::ResourceLimit(LimitExceeded::Depth {
                limit: crate::MAX_EVAL_DEPTH
            })
        );
    }

    #[test]
    fn test_load_is_fail_closed() {
        let mut ex = Executor::new();
        let err = ex
            .load_text("@module broken 1.0.0 test\ndefine @f() -> i64 {\nstart:\n  ret 1\n}")
            .unwrap_err();
        assert!(matches!(
            err,
            ExecError::Invalid(ValidationError::MissingEntry { .. })
        ));
        assert!(ex.module("broken").is_none());
        assert_eq!(
            ex.execute("broken", "f", vec![]).unwrap_err(),
            ExecError::UnknownModule("broken".into())
        );

        let err = ex.load_text("@module m 1 x\ndefine @f() -> i64 {\n  ret 1\n}").unwrap_err();
        let report = err.report();
        assert_eq!(report.kind, "SyntaxError");
        assert_eq!(report.location, Some(crate::Location::new(3, 3)));
    }
}
