use ouro_core::ast::Value;
use ouro_core::bridge::HostBridge;
use ouro_core::dsl;
use ouro_core::evaluator::Environment;
use ouro_core::ourocode::{Executor, IrValue};
use ouro_core::{Error, Interpreter, Limits};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

/// `OURO_LIMITS` may name a TOML file with `max_instructions`,
/// `max_depth` and `timeout_ms`.
fn load_limits() -> Limits {
    let Ok(path) = std::env::var("OURO_LIMITS") else {
        return Limits::default();
    };
    match std::fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|text| Limits::from_toml_str(&text).map_err(|e| e.to_string()))
    {
        Ok(limits) => limits,
        Err(e) => {
            eprintln!("Ignoring {path}: {e}");
            Limits::default()
        }
    }
}

fn demo_bridge() -> HostBridge {
    let mut bridge = HostBridge::new();
    bridge
        .register_js("log", |args| {
            let parts: Vec<String> = args.iter().map(ToString::to_string).collect();
            println!("[js] {}", parts.join(" "));
            Ok(Value::Nil)
        })
        .register_wasm("math", "hypot", |args| match args.as_slice() {
            [Value::Number(a), Value::Number(b)] => Ok(Value::Number(a.hypot(*b))),
            _ => Err(Error::TypeError("hypot expects two numbers".into())),
        });
    bridge
}

fn run_repl() {
    println!("Ouro core REPL");
    println!("Enter S-expressions like: (+ 1 2)");
    println!("Type :dsl to switch to the block language, :help for more commands.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            eprintln!("Could not initialize REPL: {err}");
            return;
        }
    };
    let limits = load_limits();
    let interpreter = Interpreter::with_config(limits, demo_bridge());
    let mut executor = Executor::with_limits(limits);
    let mut dsl_mode = false;

    loop {
        let prompt = if dsl_mode { "dsl> " } else { "ouro> " };
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                _ = rl.add_history_entry(line);

                if let Some(command) = line.strip_prefix(':') {
                    let mut words = command.split_whitespace();
                    match words.next() {
                        Some("help") => print_help(),
                        Some("env") => print_environment(interpreter.global_env()),
                        Some("dsl") => {
                            dsl_mode = !dsl_mode;
                            if dsl_mode {
                                println!("Block-language mode: input is compiled, shown (→) and evaluated.");
                            } else {
                                println!("S-expression mode.");
                            }
                        }
                        Some("load") => match words.next() {
                            Some(path) => load_module(&mut executor, path),
                            None => println!("usage: :load <file>"),
                        },
                        Some("run") => {
                            let args: Vec<&str> = words.collect();
                            run_function(&executor, &args);
                        }
                        Some("modules") => {
                            for name in executor.module_names() {
                                println!("  {name}");
                            }
                        }
                        Some("quit" | "exit") => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => println!("Unknown command :{command}, try :help"),
                    }
                    continue;
                }

                let source = if dsl_mode {
                    match dsl::compile_to_lisp(line) {
                        Ok(lisp) => {
                            println!("→ {lisp}");
                            lisp
                        }
                        Err(errors) => {
                            for error in errors {
                                println!("{}", error.report());
                            }
                            continue;
                        }
                    }
                } else {
                    line.to_owned()
                };

                match interpreter.eval(&source) {
                    Ok(value) => println!("{value}"),
                    Err(e) => println!("{}", e.report()),
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn load_module(executor: &mut Executor, path: &str) {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            println!("Cannot read {path}: {e}");
            return;
        }
    };
    match executor.load_text(&text) {
        Ok(name) => println!("Loaded module {name}"),
        Err(e) => println!("{}", e.report()),
    }
}

fn parse_ir_value(word: &str) -> Option<IrValue> {
    match word {
        "true" => Some(IrValue::Bool(true)),
        "false" => Some(IrValue::Bool(false)),
        _ if word.contains(['.', 'e', 'E']) => word.parse().ok().map(IrValue::F64),
        _ => word.parse().ok().map(IrValue::I64),
    }
}

fn run_function(executor: &Executor, words: &[&str]) {
    let [module, function, rest @ ..] = words else {
        println!("usage: :run <module> <function> <args...>");
        return;
    };
    let mut args = Vec::with_capacity(rest.len());
    for word in rest {
        match parse_ir_value(word) {
            Some(value) => args.push(value),
            None => {
                println!("Cannot read argument '{word}' as i64, f64 or bool");
                return;
            }
        }
    }
    match executor.execute(module, function, args) {
        Ok(value) => println!("{value}"),
        Err(e) => println!("{}", e.report()),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  :help              - Show this help message");
    println!("  :env               - Show global environment bindings");
    println!("  :dsl               - Toggle block-language mode");
    println!("  :load <file>       - Load an Ourocode module from a text file");
    println!("  :run <m> <f> args  - Execute function f of loaded module m");
    println!("  :modules           - List loaded Ourocode modules");
    println!("  :quit, :exit       - Exit the REPL");
    println!();
    println!("Examples:");
    println!("  (def make-adder (lambda (n) (lambda (x) (+ x n))))");
    println!("  ((make-adder 5) 10)");
    println!("  (call-wasm \"math\" \"hypot\" 3 4)");
    println!("  :dsl");
    println!("  BEGIN INTEGER i; i := 0; WHILE i < 5 DO i := i + 1; i END");
    println!("  :run population rate 150.0");
    println!();
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();
    for (name, value) in bindings {
        match value {
            Value::BuiltinFunction { .. } => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in procedures ({}):", builtins.len());
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
