// End-to-end tests across the interpreter, the block-language compiler and
// the Ourocode executor.

use ouro_core::ast::Value;
use ouro_core::bridge::HostBridge;
use ouro_core::dsl::{compile, compile_to_lisp};
use ouro_core::ourocode::{ExecError, Executor, IrValue, Module, parse_module};
use ouro_core::sandbox::LimitExceeded;
use ouro_core::{Error, Interpreter, Limits, Location};

// Block language → interpreter

fn run_dsl(source: &str) -> Value {
    let lisp = compile_to_lisp(source).unwrap();
    Interpreter::new().eval(&lisp).unwrap()
}

#[test]
fn test_dsl_programs_evaluate() {
    let cases = [
        ("BEGIN INTEGER i; i := 0; WHILE i < 5 DO i := i + 1; i END", 5.0),
        ("BEGIN REAL x; x := 1; IF x > 5 THEN x := 10; x END", 1.0),
        ("BEGIN REAL x; x := 7; IF x > 5 THEN x := 10 ELSE x := 0; x END", 10.0),
        (
            "BEGIN INTEGER n, acc;
               n := 10; acc := 0;
               WHILE n > 0 DO BEGIN acc := acc + n; n := n - 1 END;
               acc
             END",
            55.0,
        ),
        (
            "BEGIN INTEGER a, b, t;
               COMMENT iterative fibonacci;
               a := 0; b := 1;
               WHILE b < 100 DO BEGIN t := a + b; a := b; b := t END;
               b
             END",
            144.0,
        ),
    ];
    for (source, expected) in cases {
        assert_eq!(run_dsl(source), Value::Number(expected), "{source}");
    }
}

#[test]
fn test_dsl_string_and_boolean_results() {
    assert_eq!(
        run_dsl("BEGIN STRING s; s := \"done\"; s END"),
        Value::String("done".into())
    );
    assert_eq!(
        run_dsl("BEGIN BOOLEAN b; b := NOT (1 <> 1) AND TRUE; b END"),
        Value::Bool(true)
    );
}

#[test]
fn test_dsl_errors_reach_the_caller_as_reports() {
    let output = compile("BEGIN x := ; y := 2 +; END");
    assert!(!output.success);
    assert!(output.lisp.is_none());
    let json = serde_json::to_value(&output).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["errors"].as_array().unwrap().len(), 2);
    assert_eq!(json["errors"][0]["location"]["line"], 1);

    // Undeclared read fails at run time, not compile time.
    let lisp = compile_to_lisp("BEGIN y := z + 1 END").unwrap();
    let err = Interpreter::new().eval(&lisp).unwrap_err();
    assert!(matches!(err, Error::UnboundVariable(_)));
    assert_eq!(err.report().kind, "UnboundVariableError");
}

#[test]
fn test_dsl_loop_respects_interpreter_limits() {
    let lisp = compile_to_lisp("BEGIN INTEGER i; i := 0; WHILE TRUE DO i := i + 1 END").unwrap();
    let interpreter =
        Interpreter::with_config(Limits::default().with_max_instructions(10_000), HostBridge::new());
    let err = interpreter.eval(&lisp).unwrap_err();
    assert!(matches!(
        err,
        Error::ResourceLimitError(LimitExceeded::Instructions { limit: 10_000 })
    ));
    // The session survives and the partial count is visible.
    let i = interpreter.eval("i").unwrap();
    assert!(matches!(i, Value::Number(n) if n > 0.0));
}

// Interpreter with a host bridge

#[test]
fn test_bridge_backed_program() {
    let mut bridge = HostBridge::new();
    bridge
        .register_js("double", |args| match args.as_slice() {
            [Value::Number(n)] => Ok(Value::Number(n * 2.0)),
            _ => Err(Error::TypeError("double expects one number".into())),
        })
        .register_wasm("physics", "step", |args| match args.as_slice() {
            [Value::Number(x), Value::Number(dt)] => Ok(Value::Number(x + dt)),
            _ => Err(Error::TypeError("step expects two numbers".into())),
        });
    let interpreter = Interpreter::with_config(Limits::default(), bridge);

    assert_eq!(
        interpreter
            .eval("(def x (call-js \"double\" 4)) (call-wasm \"physics\" \"step\" x 0.5)")
            .unwrap(),
        Value::Number(8.5)
    );
    let err = interpreter.eval("(call-js \"missing\")").unwrap_err();
    assert_eq!(err.report().kind, "BridgeLookupError");
}

// Ourocode text → validator → executor

const POPULATION: &str = "
    @module population 1.0.0 python
    %Stats = type { f64, i64 }
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
    define @project(%population: f64, %years: i64) -> %Stats {
    entry:
      %r = call f64 @rate(%population)
      %growth = mul f64 %population, %r
      %next = add f64 %population, %growth
      %s = const %Stats { 0.0, 0 }
      %s1 = insert %Stats %s, 0, %next
      %s2 = insert %Stats %s1, 1, %years
      ret %s2
    }
";

#[test]
fn test_ourocode_pipeline() {
    let mut executor = Executor::new();
    assert_eq!(executor.load_text(POPULATION).unwrap(), "population");

    assert_eq!(
        executor
            .execute("population", "rate", vec![IrValue::F64(150.0)])
            .unwrap(),
        IrValue::F64(0.05)
    );
    assert_eq!(
        executor
            .execute("population", "rate", vec![IrValue::F64(50.0)])
            .unwrap(),
        IrValue::F64(0.1)
    );
    assert_eq!(
        executor
            .execute("population", "project", vec![IrValue::F64(200.0), IrValue::I64(1)])
            .unwrap(),
        IrValue::Struct {
            ty: "Stats".into(),
            fields: vec![IrValue::F64(210.0), IrValue::I64(1)],
        }
    );
}

#[test]
fn test_ourocode_text_and_bytes_round_trip() {
    let module = parse_module(POPULATION).unwrap();
    let reparsed = parse_module(&module.to_string()).unwrap();
    assert_eq!(reparsed, module);

    let bytes = module.to_bytes().unwrap();
    let decoded = Module::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, module);
    // Same module, same bytes.
    assert_eq!(decoded.to_bytes().unwrap(), bytes);

    let mut executor = Executor::new();
    executor.load(decoded).unwrap();
    assert_eq!(
        executor
            .execute("population", "rate", vec![IrValue::F64(101.0)])
            .unwrap(),
        IrValue::F64(0.05)
    );
}

#[test]
fn test_ourocode_failures_report_kind_and_location() {
    let mut executor = Executor::with_limits(Limits::default().with_max_instructions(2));

    let err = executor
        .load_text("@module bad 1.0.0 test\ndefine @f() -> i64 {\nentry:\n  jmp nowhere\n}")
        .unwrap_err();
    let report = err.report();
    assert_eq!(report.kind, "ValidationError");
    assert!(report.message.contains("nowhere"), "{report}");
    assert!(report.location.is_none());

    let err = executor.load_text("@module bad 1.0.0 test\ndefine @f( -> i64 {}").unwrap_err();
    let report = err.report();
    assert_eq!(report.kind, "SyntaxError");
    assert_eq!(report.location, Some(Location::new(2, 12)));

    executor.load_text(POPULATION).unwrap();
    let err = executor
        .execute("population", "rate", vec![IrValue::F64(1.0)])
        .unwrap_err();
    assert!(matches!(err, ExecError::ResourceLimit(_)));
    assert_eq!(err.report().kind, "ResourceLimitError");
}
