//! Built-in procedure registry.
//!
//! Every procedure the global environment starts with is listed once in
//! [`BUILTIN_OPS`] together with its [`Arity`]. Special forms (`if`, `and`,
//! `lambda`, ...) are not procedures: they are recognized by the `expr`
//! analysis pass and never appear here.
//!
//! ```scheme
//! (+ 1 2 3)               ; 6
//! (/ 1 0)                 ; ZeroDivisionError
//! (car '())               ; EvalError: car of empty list
//! (string-append "a" "b") ; "ab"
//! ```
//!
//! Arithmetic and comparison reject non-numbers with a `TypeError`; there is no
//! coercion between strings and numbers. `not` follows the interpreter's
//! truthiness rule, so `(not nil)` is `#t`.
//!
//! ## Adding a builtin
//!
//! 1. Write it as a plain Rust function over the typed parameters in
//!    `evaluator::intooperation` (`NumberType`, `&str`, `Value`, `NumIter`, ...).
//! 2. Add a [`BuiltinOp`] entry with its id and arity.
//! 3. Add rows to the test table below.

use crate::Error;
use crate::ast::{NumberType, Value};
use crate::evaluator::Environment;
use crate::evaluator::intooperation::{
    IntoOperation, IntoVariadicOperation, NumIter, OperationFn, StringIter, ValueIter,
};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// Accepted argument counts of a procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    pub fn validate(&self, got: usize) -> Result<(), Error> {
        match *self {
            Arity::Exact(expected) if got != expected => Err(Error::arity_error(expected, got)),
            Arity::AtLeast(min) if got < min => Err(Error::arity_error(min, got)),
            _ => Ok(()),
        }
    }
}

/// One registry entry.
#[derive(Clone)]
pub struct BuiltinOp {
    pub id: &'static str,
    pub func: Arc<OperationFn>,
    pub arity: Arity,
}

impl std::fmt::Debug for BuiltinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BuiltinOp({}, {:?})", self.id, self.arity)
    }
}

impl BuiltinOp {
    /// The procedure value bound in the global environment. The arity check
    /// runs before the typed adapter so variadic procedures report the same
    /// errors as fixed ones.
    pub(crate) fn to_value(&self) -> Value {
        let arity = self.arity;
        let inner = Arc::clone(&self.func);
        Value::BuiltinFunction {
            id: self.id.to_owned(),
            func: Arc::new(move |args: Vec<Value>| {
                arity.validate(args.len())?;
                inner(args)
            }),
        }
    }
}

//
// Arithmetic
//

fn builtin_add(args: NumIter<'_>) -> NumberType {
    args.sum()
}

fn builtin_sub(first: NumberType, rest: NumIter<'_>) -> NumberType {
    if rest.len() == 0 {
        return -first;
    }
    rest.fold(first, |acc, n| acc - n)
}

fn builtin_mul(args: NumIter<'_>) -> NumberType {
    args.product()
}

fn builtin_div(first: NumberType, rest: NumIter<'_>) -> Result<NumberType, Error> {
    if rest.len() == 0 {
        return divide(1.0, first);
    }
    let mut result = first;
    for n in rest {
        result = divide(result, n)?;
    }
    Ok(result)
}

fn divide(a: NumberType, b: NumberType) -> Result<NumberType, Error> {
    if b == 0.0 {
        return Err(Error::ZeroDivisionError(format!("{a} / {b}")));
    }
    Ok(a / b)
}

fn builtin_max(first: NumberType, rest: NumIter<'_>) -> NumberType {
    rest.fold(first, NumberType::max)
}

fn builtin_min(first: NumberType, rest: NumIter<'_>) -> NumberType {
    rest.fold(first, NumberType::min)
}

//
// Comparison
//

macro_rules! numeric_comparison {
    ($name:ident, $op:tt) => {
        fn $name(first: NumberType, rest: NumIter<'_>) -> bool {
            let mut prev = first;
            for current in rest {
                if !(prev $op current) {
                    return false;
                }
                prev = current;
            }
            true
        }
    };
}

numeric_comparison!(builtin_lt, <);
numeric_comparison!(builtin_gt, >);
numeric_comparison!(builtin_le, <=);
numeric_comparison!(builtin_ge, >=);

/// `=` compares numbers numerically and anything else structurally, so the
/// block language's `=` and `<>` work on strings and booleans too.
fn builtin_num_eq(first: Value, rest: ValueIter<'_>) -> bool {
    let mut prev = &first;
    for current in rest {
        if prev != current {
            return false;
        }
        prev = current;
    }
    true
}

fn builtin_equal(first: Value, second: Value) -> bool {
    first == second
}

//
// Lists
//

fn builtin_car(mut list: ValueIter<'_>) -> Result<Value, Error> {
    match list.next() {
        Some(first) => Ok(first.clone()),
        None => Err(Error::EvalError("car of empty list".into())),
    }
}

fn builtin_cdr(mut list: ValueIter<'_>) -> Result<Value, Error> {
    if list.next().is_none() {
        return Err(Error::EvalError("cdr of empty list".into()));
    }
    Ok(Value::List(list.cloned().collect()))
}

fn builtin_cons(first: Value, rest: Value) -> Result<Value, Error> {
    match rest {
        Value::Nil => Ok(Value::List(vec![first])),
        Value::List(mut tail) => {
            tail.insert(0, first);
            Ok(Value::List(tail))
        }
        other => Err(Error::TypeError(format!(
            "cons expects a list as its second argument, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_list(args: ValueIter<'_>) -> Value {
    Value::List(args.cloned().collect())
}

fn builtin_length(list: ValueIter<'_>) -> usize {
    list.len()
}

fn builtin_null(value: Value) -> bool {
    value.is_nil()
}

//
// Logic and predicates
//

fn builtin_not(value: Value) -> bool {
    !value.is_truthy()
}

fn builtin_is_number(value: Value) -> bool {
    matches!(value, Value::Number(_))
}

fn builtin_is_string(value: Value) -> bool {
    matches!(value, Value::String(_))
}

fn builtin_is_symbol(value: Value) -> bool {
    matches!(value, Value::Symbol(_))
}

fn builtin_is_boolean(value: Value) -> bool {
    matches!(value, Value::Bool(_))
}

fn builtin_is_list(value: Value) -> bool {
    value.as_list().is_some()
}

fn builtin_is_procedure(value: Value) -> bool {
    value.is_procedure()
}

//
// Strings and errors
//

fn builtin_string_append(args: StringIter<'_>) -> String {
    args.collect()
}

fn builtin_error(args: ValueIter<'_>) -> Result<Value, Error> {
    let parts: Vec<String> = args
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    let message = if parts.is_empty() {
        "error".to_owned()
    } else {
        parts.join(" ")
    };
    Err(Error::EvalError(message))
}

/// Global registry of all built-in procedures, built once.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn fixed<Args, F: IntoOperation<Args>>(f: F) -> Arc<OperationFn> {
        f.into_operation()
    }

    fn variadic<Args, F: IntoVariadicOperation<Args>>(f: F) -> Arc<OperationFn> {
        f.into_variadic_operation()
    }

    type Num = NumberType;
    type Nums = NumIter<'static>;
    type Values = ValueIter<'static>;

    let op = |id, func, arity| BuiltinOp { id, func, arity };

    vec![
        // Arithmetic
        op("+", variadic::<(Nums,), _>(builtin_add), Arity::Any),
        op("-", variadic::<(Num, Nums), _>(builtin_sub), Arity::AtLeast(1)),
        op("*", variadic::<(Nums,), _>(builtin_mul), Arity::Any),
        op("/", variadic::<(Num, Nums), _>(builtin_div), Arity::AtLeast(1)),
        op("max", variadic::<(Num, Nums), _>(builtin_max), Arity::AtLeast(1)),
        op("min", variadic::<(Num, Nums), _>(builtin_min), Arity::AtLeast(1)),
        // Comparison
        op("<", variadic::<(Num, Nums), _>(builtin_lt), Arity::AtLeast(2)),
        op(">", variadic::<(Num, Nums), _>(builtin_gt), Arity::AtLeast(2)),
        op("<=", variadic::<(Num, Nums), _>(builtin_le), Arity::AtLeast(2)),
        op(">=", variadic::<(Num, Nums), _>(builtin_ge), Arity::AtLeast(2)),
        op("=", variadic::<(Value, Values), _>(builtin_num_eq), Arity::AtLeast(2)),
        op("equal?", fixed::<(Value, Value), _>(builtin_equal), Arity::Exact(2)),
        // Lists
        op("car", fixed::<(Values,), _>(builtin_car), Arity::Exact(1)),
        op("cdr", fixed::<(Values,), _>(builtin_cdr), Arity::Exact(1)),
        op("cons", fixed::<(Value, Value), _>(builtin_cons), Arity::Exact(2)),
        op("list", variadic::<(Values,), _>(builtin_list), Arity::Any),
        op("length", fixed::<(Values,), _>(builtin_length), Arity::Exact(1)),
        op("null?", fixed::<(Value,), _>(builtin_null), Arity::Exact(1)),
        // Logic and predicates
        op("not", fixed::<(Value,), _>(builtin_not), Arity::Exact(1)),
        op("number?", fixed::<(Value,), _>(builtin_is_number), Arity::Exact(1)),
        op("string?", fixed::<(Value,), _>(builtin_is_string), Arity::Exact(1)),
        op("symbol?", fixed::<(Value,), _>(builtin_is_symbol), Arity::Exact(1)),
        op("boolean?", fixed::<(Value,), _>(builtin_is_boolean), Arity::Exact(1)),
        op("list?", fixed::<(Value,), _>(builtin_is_list), Arity::Exact(1)),
        op("procedure?", fixed::<(Value,), _>(builtin_is_procedure), Arity::Exact(1)),
        // Strings and errors
        op(
            "string-append",
            variadic::<(StringIter<'static>,), _>(builtin_string_append),
            Arity::Any,
        ),
        op("error", variadic::<(Values,), _>(builtin_error), Arity::Any),
    ]
});

static BUILTIN_INDEX: LazyLock<HashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| BUILTIN_OPS.iter().map(|op| (op.id, op)).collect());

/// All builtin procedures, in registry order.
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

pub fn find_builtin_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_INDEX.get(id).copied()
}

/// Bind every builtin procedure in `env`.
pub(crate) fn install_builtins(env: &Environment) {
    for op in get_builtin_ops() {
        env.define(op.id, op.to_value());
    }
}
