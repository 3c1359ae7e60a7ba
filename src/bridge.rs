//! Host capability tables.
//!
//! Evaluated code has no ambient access to the host. The only way out is the
//! pair of builtins `call-js` and `call-wasm`, which look a name up in the
//! [`HostBridge`] handed to the interpreter when it was built:
//!
//! ```scheme
//! (call-js "now")                  ; js table, entry "now"
//! (call-wasm "physics" "step" 0.1) ; wasm table, module "physics", entry "step"
//! ```
//!
//! A missing entry is a [`Error::BridgeLookupError`], which callers can tell
//! apart from a bug in the evaluated program.

use crate::Error;
use crate::ast::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A host function callable from evaluated code.
pub type HostFn = Arc<dyn Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync>;

#[derive(Clone, Default)]
pub struct HostBridge {
    js: HashMap<String, HostFn>,
    wasm: HashMap<String, HashMap<String, HostFn>>,
}

impl std::fmt::Debug for HostBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBridge")
            .field("js", &self.js_names())
            .field("wasm", &self.wasm_names())
            .finish()
    }
}

impl HostBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_js<F>(&mut self, name: &str, func: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.js.insert(name.to_owned(), Arc::new(func));
        self
    }

    pub fn register_wasm<F>(&mut self, module: &str, name: &str, func: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.wasm
            .entry(module.to_owned())
            .or_default()
            .insert(name.to_owned(), Arc::new(func));
        self
    }

    pub fn call_js(&self, name: &str, args: Vec<Value>) -> Result<Value, Error> {
        let func = self
            .js
            .get(name)
            .ok_or_else(|| Error::BridgeLookupError(format!("no js function '{name}'")))?;
        tracing::debug!(name, args = args.len(), "call-js");
        func(args)
    }

    pub fn call_wasm(&self, module: &str, name: &str, args: Vec<Value>) -> Result<Value, Error> {
        let table = self
            .wasm
            .get(module)
            .ok_or_else(|| Error::BridgeLookupError(format!("no wasm module '{module}'")))?;
        let func = table.get(name).ok_or_else(|| {
            Error::BridgeLookupError(format!("no function '{name}' in wasm module '{module}'"))
        })?;
        tracing::debug!(module, name, args = args.len(), "call-wasm");
        func(args)
    }

    /// Registered js names, sorted.
    pub fn js_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.js.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registered wasm entries per module, sorted.
    pub fn wasm_names(&self) -> BTreeMap<&str, Vec<&str>> {
        self.wasm
            .iter()
            .map(|(module, table)| {
                let mut names: Vec<&str> = table.keys().map(String::as_str).collect();
                names.sort_unstable();
                (module.as_str(), names)
            })
            .collect()
    }

    /// The `call-js` and `call-wasm` procedures bound to this bridge.
    pub(crate) fn procedures(bridge: &Arc<HostBridge>) -> [(&'static str, Value); 2] {
        let js = Arc::clone(bridge);
        let wasm = Arc::clone(bridge);
        [
            (
                "call-js",
                Value::BuiltinFunction {
                    id: "call-js".to_owned(),
                    func: Arc::new(move |mut args: Vec<Value>| {
                        if args.is_empty() {
                            return Err(Error::arity_error(1, 0));
                        }
                        let name = entry_name(&args[0], "call-js")?;
                        let rest = args.split_off(1);
                        js.call_js(&name, rest)
                    }),
                },
            ),
            (
                "call-wasm",
                Value::BuiltinFunction {
                    id: "call-wasm".to_owned(),
                    func: Arc::new(move |mut args: Vec<Value>| {
                        if args.len() < 2 {
                            return Err(Error::arity_error(2, args.len()));
                        }
                        let module = entry_name(&args[0], "call-wasm")?;
                        let name = entry_name(&args[1], "call-wasm")?;
                        let rest = args.split_off(2);
                        wasm.call_wasm(&module, &name, rest)
                    }),
                },
            ),
        ]
    }
}

/// Bridge entries may be named by a string or a quoted symbol.
fn entry_name(value: &Value, caller: &str) -> Result<String, Error> {
    match value {
        Value::String(s) | Value::Symbol(s) => Ok(s.clone()),
        other => Err(Error::TypeError(format!(
            "{caller} expects a name, got {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{sym, val};

    fn sample() -> HostBridge {
        let mut bridge = HostBridge::new();
        bridge
            .register_js("double", |args| match args.as_slice() {
                [Value::Number(n)] => Ok(val(n * 2.0)),
                _ => Err(Error::TypeError("double expects one number".into())),
            })
            .register_wasm("math", "answer", |_| Ok(val(42)));
        bridge
    }

    fn procedure(bridge: HostBridge, id: &str) -> HostFn {
        let [(_, js), (_, wasm)] = HostBridge::procedures(&Arc::new(bridge));
        let chosen = if id == "call-js" { js } else { wasm };
        let Value::BuiltinFunction { func, .. } = chosen else {
            panic!("not a builtin");
        };
        func
    }

    #[test]
    fn test_direct_lookup() {
        let bridge = sample();
        assert_eq!(bridge.call_js("double", vec![val(4)]).unwrap(), val(8));
        assert_eq!(bridge.call_wasm("math", "answer", vec![]).unwrap(), val(42));
        assert!(matches!(
            bridge.call_js("alert", vec![]),
            Err(Error::BridgeLookupError(msg)) if msg.contains("alert")
        ));
        assert!(matches!(
            bridge.call_wasm("physics", "step", vec![]),
            Err(Error::BridgeLookupError(msg)) if msg.contains("physics")
        ));
        assert!(matches!(
            bridge.call_wasm("math", "question", vec![]),
            Err(Error::BridgeLookupError(msg)) if msg.contains("question")
        ));
        assert_eq!(bridge.js_names(), vec!["double"]);
        assert_eq!(bridge.wasm_names()["math"], vec!["answer"]);
    }

    #[test]
    fn test_bridge_procedures() {
        let call_js = procedure(sample(), "call-js");
        assert_eq!(call_js(vec![val("double"), val(5)]).unwrap(), val(10));
        assert_eq!(call_js(vec![sym("double"), val(1)]).unwrap(), val(2));
        assert!(matches!(call_js(vec![]), Err(Error::ArityError { .. })));
        assert!(matches!(call_js(vec![val(1)]), Err(Error::TypeError(_))));
        // Host errors come back unchanged.
        assert!(matches!(
            call_js(vec![val("double"), val("x")]),
            Err(Error::TypeError(_))
        ));

        let call_wasm = procedure(sample(), "call-wasm");
        assert_eq!(call_wasm(vec![val("math"), val("answer")]).unwrap(), val(42));
        assert!(matches!(call_wasm(vec![val("math")]), Err(Error::ArityError { .. })));
    }
}
