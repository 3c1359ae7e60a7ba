//! Environments and the evaluation loop.
//!
//! An [`Environment`] is a chain of frames shared through `Rc`. Closures keep
//! the frame they were created in alive, `define` always writes the innermost
//! frame and `set!` rewrites the nearest frame that already binds the name.
//!
//! A closure defined in the frame it captures forms a reference cycle. Call
//! and `let` frames are released when their body finishes: a frame reachable
//! only through its own closures has its bindings dropped.
//!
//! The [`Interpreter`] owns a global environment seeded with the builtin
//! procedures and the host bridge. Every call to [`Interpreter::eval`] gets a
//! fresh [`Budget`]; a step in any `if`, `begin`, `let`, `and`, `or` or closure
//! body position is a tail position and reuses the current host stack frame,
//! so a self-recursive loop costs instructions but not depth.

pub mod intooperation;

pub use intooperation::{IntoOperation, IntoVariadicOperation, NumIter, StringIter, ValueIter};

use crate::Error;
use crate::ast::{Closure, Value};
use crate::bridge::HostBridge;
use crate::builtinops::{Arity, install_builtins};
use crate::config::Limits;
use crate::expr::Expr;
use crate::sandbox::Budget;
use crate::scheme::parse_program;
use intooperation::OperationFn;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Default)]
struct Frame {
    bindings: HashMap<String, Value>,
    parent: Option<Environment>,
}

/// A scope: one frame plus the chain of enclosing frames.
///
/// Cloning is cheap and yields a handle to the same frame.
#[derive(Clone, Default)]
pub struct Environment(Rc<RefCell<Frame>>);

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let frame = self.0.borrow();
        let mut names: Vec<&String> = frame.bindings.keys().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("bindings", &names)
            .field("has_parent", &frame.parent.is_some())
            .finish()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new empty frame whose parent is `self`.
    pub fn child(&self) -> Self {
        Environment(Rc::new(RefCell::new(Frame {
            bindings: HashMap::new(),
            parent: Some(self.clone()),
        })))
    }

    /// Bind `name` in this frame, shadowing any outer binding.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.0.borrow_mut().bindings.insert(name.into(), value);
    }

    /// Look `name` up through the chain of frames.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut current = self.clone();
        loop {
            let parent = {
                let frame = current.0.borrow();
                if let Some(value) = frame.bindings.get(name) {
                    return Some(value.clone());
                }
                frame.parent.clone()
            };
            current = parent?;
        }
    }

    /// Rebind `name` in the nearest frame that has it.
    pub fn set(&self, name: &str, value: Value) -> Result<(), Error> {
        let mut current = self.clone();
        loop {
            let parent = {
                let mut frame = current.0.borrow_mut();
                if let Some(slot) = frame.bindings.get_mut(name) {
                    *slot = value;
                    return Ok(());
                }
                frame.parent.clone()
            };
            match parent {
                Some(parent) => current = parent,
                None => {
                    return Err(Error::UnboundVariable(format!(
                        "cannot set! undefined variable '{name}'"
                    )));
                }
            }
        }
    }

    /// Register a builtin written directly against argument slices.
    ///
    /// ```
    /// use ouro_core::{Error, Interpreter};
    /// use ouro_core::ast::Value;
    ///
    /// fn count(args: &[Value]) -> Result<Value, Error> {
    ///     Ok(Value::from(args.len()))
    /// }
    ///
    /// let interp = Interpreter::new();
    /// interp.global_env().register_builtin_function("count", count);
    /// assert_eq!(interp.eval("(count 1 2 3)").unwrap(), Value::from(3));
    /// ```
    pub fn register_builtin_function(&self, name: &str, func: fn(&[Value]) -> Result<Value, Error>) {
        let wrapped: Arc<OperationFn> = Arc::new(move |args: Vec<Value>| func(&args));
        self.define_builtin(name, wrapped);
    }

    /// Register a typed Rust function. Arity comes from the signature;
    /// argument conversion failures are `TypeError`s.
    ///
    /// Supported parameter types are `f64`, `bool`, `&str`, `Value` and the
    /// list iterators [`NumIter`], [`StringIter`] and [`ValueIter`]. The return
    /// type is anything convertible into a [`Value`], or a `Result` of one.
    ///
    /// ```rust,ignore
    /// fn hypot(a: f64, b: f64) -> f64 { (a * a + b * b).sqrt() }
    /// env.register_builtin_operation::<(f64, f64), _>("hypot", hypot);
    /// ```
    pub fn register_builtin_operation<Args, F>(&self, name: &str, func: F)
    where
        F: IntoOperation<Args>,
    {
        self.define_builtin(name, func.into_operation());
    }

    /// Register a typed Rust function whose last parameter collects the
    /// remaining arguments. `arity` bounds the total argument count.
    pub fn register_variadic_builtin_operation<Args, F>(&self, name: &str, arity: Arity, func: F)
    where
        F: IntoVariadicOperation<Args>,
    {
        let inner = func.into_variadic_operation();
        let wrapped: Arc<OperationFn> = Arc::new(move |args: Vec<Value>| {
            arity.validate(args.len())?;
            inner(args)
        });
        self.define_builtin(name, wrapped);
    }

    fn define_builtin(&self, name: &str, func: Arc<OperationFn>) {
        self.define(
            name,
            Value::BuiltinFunction {
                id: name.to_owned(),
                func,
            },
        );
    }

    /// Every visible binding, inner frames shadowing outer ones, sorted by name.
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut seen: HashMap<String, Value> = HashMap::new();
        let mut current = Some(self.clone());
        while let Some(env) = current {
            let frame = env.0.borrow();
            for (name, value) in &frame.bindings {
                seen.entry(name.clone()).or_insert_with(|| value.clone());
            }
            current = frame.parent.clone();
        }
        let mut result: Vec<_> = seen.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    /// Release a frame its creator is done with. Returns false while
    /// something besides this handle and the frame's own closures still
    /// refers to it.
    fn release(&self) -> bool {
        let own_closures = self
            .0
            .borrow()
            .bindings
            .values()
            .filter(|value| {
                matches!(value, Value::Lambda(closure)
                    if Rc::strong_count(closure) == 1 && Rc::ptr_eq(&closure.env.0, &self.0))
            })
            .count();
        if Rc::strong_count(&self.0) != 1 + own_closures {
            return false;
        }
        if own_closures > 0 {
            self.clear();
        }
        true
    }

    /// Drop every binding in this frame.
    fn clear(&self) {
        let bindings = std::mem::take(&mut self.0.borrow_mut().bindings);
        drop(bindings);
    }
}

/// A sandboxed interpreter: one global environment, one set of limits and
/// one host bridge.
pub struct Interpreter {
    global: Environment,
    limits: Limits,
    bridge: Arc<HostBridge>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("limits", &self.limits)
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

impl Interpreter {
    /// Default limits and an empty bridge.
    pub fn new() -> Self {
        Self::with_config(Limits::default(), HostBridge::default())
    }

    pub fn with_config(limits: Limits, bridge: HostBridge) -> Self {
        let global = Environment::new();
        install_builtins(&global);
        let bridge = Arc::new(bridge);
        for (name, procedure) in HostBridge::procedures(&bridge) {
            global.define(name, procedure);
        }
        Interpreter {
            global,
            limits,
            bridge,
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn bridge(&self) -> &HostBridge {
        &self.bridge
    }

    pub fn global_env(&self) -> &Environment {
        &self.global
    }

    /// Read, analyze and evaluate every expression in `source` against the
    /// global environment, returning the last value (nil for empty source).
    ///
    /// The whole source is read and analyzed before anything runs, so a
    /// syntax error has no effects. A runtime error stops evaluation;
    /// bindings made before it stay in place.
    pub fn eval(&self, source: &str) -> Result<Value, Error> {
        let program = parse_program(source)?
            .iter()
            .map(|datum| Expr::analyze(datum).map(Rc::new))
            .collect::<Result<Vec<_>, _>>()?;
        self.run(&program, &self.global)
    }

    /// Evaluate one datum in `env` with a fresh budget.
    pub fn eval_in(&self, datum: &Value, env: &Environment) -> Result<Value, Error> {
        let expr = Rc::new(Expr::analyze(datum)?);
        self.run(std::slice::from_ref(&expr), env)
    }

    fn run(&self, program: &[Rc<Expr>], env: &Environment) -> Result<Value, Error> {
        let mut budget = Budget::new(self.limits);
        let mut last = Value::Nil;
        for expr in program {
            last = eval(expr, env, &mut budget).inspect_err(|err| {
                tracing::debug!(kind = err.kind_name(), %err, "evaluation failed");
            })?;
        }
        tracing::trace!(
            instructions = budget.instructions(),
            forms = program.len(),
            "evaluation finished"
        );
        Ok(last)
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        // Closures stored in the global frame hold the frame itself.
        self.global.clear();
    }
}

/// Evaluate `expr` one level deeper than the caller.
fn eval(expr: &Rc<Expr>, env: &Environment, budget: &mut Budget) -> Result<Value, Error> {
    budget.enter()?;
    let result = eval_tail(Rc::clone(expr), env.clone(), budget);
    budget.leave();
    result
}

fn eval_tail(expr: Rc<Expr>, env: Environment, budget: &mut Budget) -> Result<Value, Error> {
    let mut scopes = Scopes::default();
    eval_loop(expr, env, budget, &mut scopes)
}

/// Frames created by one evaluation loop, innermost last.
#[derive(Default)]
struct Scopes(Vec<Environment>);

impl Scopes {
    fn push(&mut self, env: &Environment) {
        self.0.push(env.clone());
        self.0.retain(|frame| !frame.release());
    }
}

impl Drop for Scopes {
    fn drop(&mut self) {
        while let Some(frame) = self.0.pop() {
            frame.release();
        }
    }
}

/// The evaluation loop. Arms that end in a tail position replace `expr`
/// (and possibly `env`) and go round again instead of recursing.
fn eval_loop(
    mut expr: Rc<Expr>,
    mut env: Environment,
    budget: &mut Budget,
    scopes: &mut Scopes,
) -> Result<Value, Error> {
    loop {
        budget.tick()?;

        let (next, next_env) = match &*expr {
            Expr::Literal(value) | Expr::Quote(value) => return Ok(value.clone()),

            Expr::Symbol(name) => {
                return env
                    .get(name)
                    .ok_or_else(|| Error::UnboundVariable(name.clone()));
            }

            Expr::Def(name, value) => {
                let value = eval(value, &env, budget)?;
                env.define(name.clone(), value.clone());
                return Ok(value);
            }

            Expr::Set(name, value) => {
                let value = eval(value, &env, budget)?;
                env.set(name, value.clone())?;
                return Ok(value);
            }

            Expr::Lambda { params, body } => {
                return Ok(Value::Lambda(Rc::new(Closure {
                    params: Rc::clone(params),
                    body: Rc::clone(body),
                    env: env.clone(),
                })));
            }

            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                if eval(cond, &env, budget)?.is_truthy() {
                    (Rc::clone(then), None)
                } else {
                    match otherwise {
                        Some(otherwise) => (Rc::clone(otherwise), None),
                        None => return Ok(Value::Nil),
                    }
                }
            }

            Expr::Begin(body) => {
                let Some((last, init)) = body.split_last() else {
                    return Ok(Value::Nil);
                };
                for expr in init {
                    eval(expr, &env, budget)?;
                }
                (Rc::clone(last), None)
            }

            Expr::And(items) => {
                let Some((last, init)) = items.split_last() else {
                    return Ok(Value::Bool(true));
                };
                for expr in init {
                    let value = eval(expr, &env, budget)?;
                    if !value.is_truthy() {
                        return Ok(value);
                    }
                }
                (Rc::clone(last), None)
            }

            Expr::Or(items) => {
                let Some((last, init)) = items.split_last() else {
                    return Ok(Value::Bool(false));
                };
                for expr in init {
                    let value = eval(expr, &env, budget)?;
                    if value.is_truthy() {
                        return Ok(value);
                    }
                }
                (Rc::clone(last), None)
            }

            Expr::Let { bindings, body } => {
                // Initializers see the outer scope only.
                let frame = env.child();
                for (name, init) in bindings {
                    let value = eval(init, &env, budget)?;
                    frame.define(name.clone(), value);
                }
                (Rc::clone(body), Some(frame))
            }

            Expr::Call { head, args } => {
                let procedure = eval(head, &env, budget)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args.iter() {
                    values.push(eval(arg, &env, budget)?);
                }
                let args = values;
                match procedure {
                    Value::BuiltinFunction { func, .. } => return func(args),
                    Value::Lambda(closure) => {
                        let frame = bind_arguments(&closure, args)?;
                        (Rc::clone(&closure.body), Some(frame))
                    }
                    other => {
                        return Err(Error::TypeError(format!(
                            "cannot apply non-procedure {other} ({})",
                            other.type_name()
                        )));
                    }
                }
            }
        };

        expr = next;
        if let Some(next_env) = next_env {
            env = next_env;
            scopes.push(&env);
        }
    }
}

/// A fresh frame under the closure's captured scope with the parameters bound.
fn bind_arguments(closure: &Closure, args: Vec<Value>) -> Result<Environment, Error> {
    if closure.params.len() != args.len() {
        return Err(Error::arity_error_with_expr(
            closure.params.len(),
            args.len(),
            format!("(lambda ({}) ...)", closure.params.join(" ")),
        ));
    }
    let frame = closure.env.child();
    for (param, arg) in closure.params.iter().zip(args) {
        frame.define(param.clone(), arg);
    }
    Ok(frame)
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sym, val};
    use crate::sandbox::LimitExceeded;

    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),
        SpecificError(&'static str),
        AnyError,
        /// Setup step; only success matters
        Ignored,
    }
    use TestResult::*;

    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    /// Test cases that run one after another in the same interpreter.
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(cases)) in test_environments.iter().enumerate() {
            let interp = Interpreter::new();
            for (test_idx, (input, expected)) in cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{} ({input})", env_idx + 1, test_idx + 1);
                execute_test_case(&interp, input, expected, &test_id);
            }
        }
    }

    fn run_comprehensive_tests(cases: Vec<(&'static str, TestResult)>) {
        for (i, (input, expected)) in cases.iter().enumerate() {
            let interp = Interpreter::new();
            execute_test_case(&interp, input, expected, &format!("Test #{} ({input})", i + 1));
        }
    }

    fn execute_test_case(interp: &Interpreter, input: &str, expected: &TestResult, test_id: &str) {
        match (interp.eval(input), expected) {
            (Ok(actual), EvalResult(expected_val)) => {
                assert_eq!(actual, *expected_val, "{test_id}: value mismatch");
            }
            (Err(_), AnyError) | (Ok(_), Ignored) => {}
            (Err(e), SpecificError(text)) => {
                let msg = format!("{e}");
                assert!(msg.contains(text), "{test_id}: error '{msg}' should contain '{text}'");
            }
            (Ok(actual), _) => panic!("{test_id}: expected error, got {actual:?}"),
            (Err(e), EvalResult(_) | Ignored) => panic!("{test_id}: expected success, got {e:?}"),
        }
    }

    #[test]
    fn test_special_forms_comprehensive() {
        run_comprehensive_tests(vec![
            // Self-evaluating atoms
            ("42", success(42)),
            ("\"hi\"", success("hi")),
            ("#f", success(false)),
            ("nil", EvalResult(nil())),
            ("()", EvalResult(nil())),
            ("", EvalResult(nil())),
            // quote
            ("'foo", success(sym("foo"))),
            ("'(1 (2 x))", success(vec![val(1), val(vec![val(2), sym("x")])])),
            ("(quote (+ 1 2))", success(vec![sym("+"), val(1), val(2)])),
            // def returns the value
            ("(def x 7)", success(7)),
            ("(define y (* 2 3)) y", success(6)),
            // if and truthiness
            ("(if #t 1 2)", success(1)),
            ("(if #f 1 2)", success(2)),
            ("(if nil 1 2)", success(2)),
            ("(if '() 1 2)", success(2)),
            ("(if 0 1 2)", success(1)),
            ("(if \"\" 1 2)", success(1)),
            ("(if #f 1)", EvalResult(nil())),
            ("(if (< 1 2) 'yes 'no)", success(sym("yes"))),
            // begin
            ("(begin 1 2 3)", success(3)),
            ("(begin)", EvalResult(nil())),
            // and / or short-circuit
            ("(and)", success(true)),
            ("(or)", success(false)),
            ("(and 1 2 3)", success(3)),
            ("(and 1 #f undefined-name)", success(false)),
            ("(or #f nil 5)", success(5)),
            ("(or 1 undefined-name)", success(1)),
            // let
            ("(let ((a 1) (b 2)) (+ a b))", success(3)),
            ("(def a 10) (let ((a 1) (b a)) b)", success(10)),
            ("(let () 5)", success(5)),
            ("(let ((a 1)) (def inner 2) (+ a inner))", success(3)),
            // lambda and application
            ("((lambda (x y) (* x y)) 6 7)", success(42)),
            ("((lambda () 9))", success(9)),
            ("((lambda (x) (def t (* x 2)) (+ t 1)) 4)", success(9)),
            // set!
            ("(def c 1) (set! c (+ c 1)) c", success(2)),
            ("(set! nope 1)", SpecificError("UnboundVariableError")),
            // Errors
            ("undefined-name", SpecificError("UnboundVariableError")),
            ("(1 2 3)", SpecificError("TypeError")),
            ("(\"f\")", SpecificError("non-procedure")),
            ("(+ 1 \"a\")", SpecificError("TypeError")),
            ("(/ 5 0)", SpecificError("ZeroDivisionError")),
            ("(car '())", SpecificError("car of empty list")),
            ("(cdr nil)", SpecificError("cdr of empty list")),
            ("(lambda (x))", SpecificError("ParseError")),
            ("(+ 1 2", SpecificError("ParseError")),
            ("(error \"custom\" 1)", SpecificError("custom 1")),
            ("(call-js \"alert\" 1)", SpecificError("BridgeLookupError")),
            ("(if)", AnyError),
        ]);
    }

    #[test]
    fn test_builtins_through_environment() {
        run_comprehensive_tests(vec![
            ("(+ 1 2 3)", success(6)),
            ("(- 10 4)", success(6)),
            ("(/ 9 2)", success(4.5)),
            ("(list 1 2 (+ 1 2))", success([1, 2, 3])),
            ("(cons 0 (list 1 2))", success([0, 1, 2])),
            ("(length (list 1 2 3))", success(3)),
            ("(null? (cdr (list 1)))", success(true)),
            ("(not (= 1 2))", success(true)),
            ("(procedure? car)", success(true)),
            ("(procedure? (lambda (x) x))", success(true)),
            ("(procedure? 'car)", success(false)),
            ("(string-append \"a\" \"b\")", success("ab")),
            ("(equal? '(1 (2)) (list 1 (list 2)))", success(true)),
        ]);
    }

    #[test]
    fn test_lexical_scoping() {
        run_tests_in_environment(vec![
            TestEnvironment(vec![
                ("(def make-adder (lambda (n) (lambda (x) (+ x n))))", Ignored),
                ("(def add5 (make-adder 5))", Ignored),
                ("(add5 10)", success(15)),
                // A later, unrelated n changes nothing.
                ("(def n 100)", success(100)),
                ("(add5 10)", success(15)),
                ("(let ((n 1000)) (add5 1))", success(6)),
            ]),
            TestEnvironment(vec![
                // Closures share and mutate their captured frame.
                (
                    "(def make-counter (lambda () (let ((count 0)) (lambda () (set! count (+ count 1)) count))))",
                    Ignored,
                ),
                ("(def c1 (make-counter))", Ignored),
                ("(def c2 (make-counter))", Ignored),
                ("(c1)", success(1)),
                ("(c1)", success(2)),
                ("(c2)", success(1)),
                ("count", SpecificError("UnboundVariableError")),
            ]),
            TestEnvironment(vec![
                // define inside a body stays local to that call.
                ("(def f (lambda () (def hidden 1) hidden))", Ignored),
                ("(f)", success(1)),
                ("hidden", SpecificError("UnboundVariableError")),
                // set! from inside a call reaches the global binding.
                ("(def g 0)", success(0)),
                ("(def bump (lambda () (set! g (+ g 1))))", Ignored),
                ("(bump) (bump) g", success(2)),
            ]),
        ]);
    }

    #[test]
    fn test_arity_checking() {
        let interp = Interpreter::new();
        interp.eval("(def pair (lambda (a b) (list a b)))").unwrap();
        assert_eq!(interp.eval("(pair 1 2)").unwrap(), val([1, 2]));
        for call in ["(pair 1)", "(pair 1 2 3)", "(pair)"] {
            assert!(
                matches!(interp.eval(call), Err(Error::ArityError { expected: 2, .. })),
                "{call}"
            );
        }
        assert!(matches!(
            interp.eval("(car 1 2)"),
            Err(Error::ArityError { expected: 1, got: 2, .. })
        ));
    }

    #[test]
    fn test_round_trip_determinism() {
        let program = "(def sq (lambda (x) (* x x))) (def xs (list 1 2 3)) (+ (sq 4) (length xs))";
        let first = Interpreter::new().eval(program).unwrap();
        let second = Interpreter::new().eval(program).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, val(19));
    }

    #[test]
    fn test_resource_ceilings() {
        let limits = Limits::default().with_max_instructions(20_000);
        let interp = Interpreter::with_config(limits, HostBridge::default());

        // Tail recursion runs in constant stack until the instruction limit.
        let err = interp.eval("(def loop (lambda () (loop))) (loop)").unwrap_err();
        assert_eq!(
            err,
            Error::ResourceLimitError(LimitExceeded::Instructions { limit: 20_000 })
        );

        // Non-tail recursion trips the depth limit instead.
        let err = interp
            .eval("(def deep (lambda (n) (+ 1 (deep n)))) (deep 0)")
            .unwrap_err();
        assert_eq!(
            err,
            Error::ResourceLimitError(LimitExceeded::Depth {
                limit: crate::MAX_EVAL_DEPTH
            })
        );

        // Each top-level eval starts with a fresh budget.
        assert_eq!(interp.eval("(+ 1 1)").unwrap(), val(2));
    }

    #[test]
    fn test_runaway_recursion_at_default_limits() {
        let err = Interpreter::new()
            .eval("(def deep (lambda (n) (+ 1 (deep n)))) (deep 0)")
            .unwrap_err();
        assert_eq!(
            err,
            Error::ResourceLimitError(LimitExceeded::Depth {
                limit: crate::MAX_EVAL_DEPTH
            })
        );

        // A configured depth cannot exceed the hard ceiling.
        let limits = Limits {
            max_depth: 100_000,
            ..Limits::default()
        };
        let interp = Interpreter::with_config(limits, HostBridge::default());
        let err = interp
            .eval("(def deep (lambda (n) (if (= n 0) 0 (+ 1 (deep (- n 1)))))) (deep 100000)")
            .unwrap_err();
        assert_eq!(
            err,
            Error::ResourceLimitError(LimitExceeded::Depth {
                limit: crate::MAX_EVAL_DEPTH
            })
        );
    }

    thread_local! {
        static WATCHED: RefCell<Vec<std::rc::Weak<RefCell<Frame>>>> = const { RefCell::new(Vec::new()) };
    }

    /// Remember the frame each closure argument captured.
    fn watch(args: &[Value]) -> Result<Value, Error> {
        for arg in args {
            if let Value::Lambda(closure) = arg {
                WATCHED.with(|watched| watched.borrow_mut().push(Rc::downgrade(&closure.env.0)));
            }
        }
        Ok(Value::Nil)
    }

    fn watched_frames() -> Vec<std::rc::Weak<RefCell<Frame>>> {
        WATCHED.with(|watched| watched.take())
    }

    #[test]
    fn test_frames_with_local_closures_are_freed() {
        let interp = Interpreter::new();
        interp.global_env().register_builtin_function("watch", watch);

        // A helper defined inside a call frame captures that frame.
        interp
            .eval("(def f (lambda (n) (def inner (lambda () n)) (watch (lambda () n)) (inner)))")
            .unwrap();
        assert_eq!(interp.eval("(f 7)").unwrap(), val(7));

        // The same shape in a tail-recursive loop: one frame per iteration.
        interp
            .eval(
                "(def spin (lambda (i)
                   (def step (lambda () (+ i 1)))
                   (watch (lambda () i))
                   (if (< i 50) (spin (step)) i)))",
            )
            .unwrap();
        assert_eq!(interp.eval("(spin 0)").unwrap(), val(50));

        // Inside a let frame.
        assert_eq!(
            interp
                .eval("(let ((x 2)) (def twice (lambda () (* x 2))) (watch (lambda () x)) (twice))")
                .unwrap(),
            val(4)
        );

        // A nested WHILE as the block-language compiler lowers it: the inner
        // loop helper lives in each outer iteration's frame.
        interp
            .eval(
                "(def i 0)
                 (begin
                   (def __loop_0 (lambda ()
                     (if (< i 20)
                       (begin
                         (def j 0)
                         (begin
                           (def __loop_1 (lambda () (if (< j 2) (begin (set! j (+ j 1)) (__loop_1)) nil)))
                           (watch __loop_1)
                           (__loop_1))
                         (set! i (+ i 1))
                         (__loop_0))
                       nil)))
                   (__loop_0))",
            )
            .unwrap();
        assert_eq!(interp.eval("i").unwrap(), val(20));

        let frames = watched_frames();
        assert_eq!(frames.len(), 73);
        assert!(frames.iter().all(|frame| frame.upgrade().is_none()));
    }

    #[test]
    fn test_escaping_closures_keep_their_frame() {
        let interp = Interpreter::new();
        interp.global_env().register_builtin_function("watch", watch);
        interp
            .eval(
                "(def make-counter (lambda ()
                   (def count 0)
                   (def bump (lambda () (set! count (+ count 1)) count))
                   (watch bump)
                   bump))
                 (def c (make-counter))",
            )
            .unwrap();
        assert_eq!(interp.eval("(c) (c) (c)").unwrap(), val(3));
        let frames = watched_frames();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].upgrade().is_some());
    }

    #[test]
    fn test_time_ceiling() {
        let limits = Limits::default()
            .with_max_instructions(u64::MAX)
            .with_timeout_ms(20);
        let interp = Interpreter::with_config(limits, HostBridge::default());
        let err = interp.eval("(def spin (lambda () (spin))) (spin)").unwrap_err();
        assert_eq!(
            err,
            Error::ResourceLimitError(LimitExceeded::Time { limit_ms: 20 })
        );
    }

    #[test]
    fn test_partial_effects_persist() {
        let interp = Interpreter::new();
        let err = interp.eval("(def before 1) (car '()) (def after 2)");
        assert!(err.is_err());
        assert_eq!(interp.eval("before").unwrap(), val(1));
        assert!(matches!(interp.eval("after"), Err(Error::UnboundVariable(_))));

        // set! inside a failing expression is not rolled back either.
        interp.eval("(def x 1)").unwrap();
        assert!(interp.eval("(begin (set! x 2) (undefined))").is_err());
        assert_eq!(interp.eval("x").unwrap(), val(2));

        // A syntax error anywhere means nothing ran.
        assert!(interp.eval("(def y 1) (oops").is_err());
        assert!(interp.eval("y").is_err());
    }

    #[test]
    fn test_bridge_calls() {
        let mut bridge = HostBridge::new();
        bridge
            .register_js("greet", |args| match args.as_slice() {
                [Value::String(name)] => Ok(Value::String(format!("hello {name}"))),
                _ => Err(Error::TypeError("greet expects a name".into())),
            })
            .register_wasm("math", "square", |args| match args.as_slice() {
                [Value::Number(n)] => Ok(val(n * n)),
                _ => Err(Error::TypeError("square expects a number".into())),
            });
        let interp = Interpreter::with_config(Limits::default(), bridge);

        assert_eq!(interp.eval("(call-js \"greet\" \"ada\")").unwrap(), val("hello ada"));
        assert_eq!(interp.eval("(call-wasm 'math 'square 7)").unwrap(), val(49));
        assert!(matches!(
            interp.eval("(call-wasm \"math\" \"cube\" 2)"),
            Err(Error::BridgeLookupError(_))
        ));
        assert!(matches!(
            interp.eval("(call-js \"fs.readFile\" \"/etc/passwd\")"),
            Err(Error::BridgeLookupError(_))
        ));
    }

    fn forty_two() -> f64 {
        42.0
    }

    fn hypot(a: f64, b: f64) -> f64 {
        (a * a + b * b).sqrt()
    }

    fn shout(s: &str) -> String {
        s.to_uppercase()
    }

    fn sum_list(nums: NumIter<'_>) -> f64 {
        nums.sum()
    }

    fn count_numbers(args: ValueIter<'_>) -> usize {
        args.filter(|v| matches!(v, Value::Number(_))).count()
    }

    fn raw_len(args: &[Value]) -> Result<Value, Error> {
        Ok(val(args.len()))
    }

    #[test]
    fn test_register_builtins() {
        let interp = Interpreter::new();
        let env = interp.global_env();
        env.register_builtin_operation::<(), _>("forty-two", forty_two);
        env.register_builtin_operation::<(f64, f64), _>("hypot", hypot);
        env.register_builtin_operation::<(&str,), _>("shout", shout);
        env.register_builtin_operation::<(NumIter<'static>,), _>("sum-list", sum_list);
        env.register_variadic_builtin_operation::<(ValueIter<'static>,), _>(
            "count-numbers",
            Arity::AtLeast(1),
            count_numbers,
        );
        env.register_builtin_function("raw-len", raw_len);

        assert_eq!(interp.eval("(forty-two)").unwrap(), val(42));
        assert_eq!(interp.eval("(hypot 3 4)").unwrap(), val(5));
        assert_eq!(interp.eval("(shout \"hey\")").unwrap(), val("HEY"));
        assert_eq!(interp.eval("(sum-list (list 1 2 3 4))").unwrap(), val(10));
        assert_eq!(interp.eval("(count-numbers 1 \"x\" 2 #t)").unwrap(), val(2));
        assert!(matches!(
            interp.eval("(count-numbers)"),
            Err(Error::ArityError { expected: 1, got: 0, .. })
        ));
        assert_eq!(interp.eval("(raw-len 1 2 3)").unwrap(), val(3));
        assert!(matches!(interp.eval("(hypot 3)"), Err(Error::ArityError { .. })));
        assert!(matches!(interp.eval("(shout 1)"), Err(Error::TypeError(_))));

        let names: Vec<String> = env.get_all_bindings().into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&"hypot".to_owned()));
        assert!(names.contains(&"call-js".to_owned()));
        assert!(names.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_environment_chain() {
        let root = Environment::new();
        root.define("a", val(1));
        let child = root.child();
        child.define("b", val(2));
        assert_eq!(child.get("a"), Some(val(1)));
        assert_eq!(root.get("b"), None);

        child.set("a", val(10)).unwrap();
        assert_eq!(root.get("a"), Some(val(10)));
        assert!(child.set("zzz", val(0)).is_err());

        child.define("a", val(99));
        assert_eq!(child.get("a"), Some(val(99)));
        assert_eq!(root.get("a"), Some(val(10)));
        let visible = child.get_all_bindings();
        assert_eq!(visible, vec![("a".to_owned(), val(99)), ("b".to_owned(), val(2))]);
    }

    #[test]
    fn test_eval_in_child_environment() {
        let interp = Interpreter::new();
        let scope = interp.global_env().child();
        scope.define("local", val(5));
        let datum = crate::scheme::parse_scheme("(* local 2)").unwrap();
        assert_eq!(interp.eval_in(&datum, &scope).unwrap(), val(10));
        assert!(interp.eval("local").is_err());
    }
}
