//! Special-form analysis.
//!
//! The reader produces plain data. Before evaluation each datum is analyzed
//! into an [`Expr`], a tree with one variant per special form plus a generic
//! [`Expr::Call`]. Shape errors such as `(lambda x)` or `(let ((a)) a)` are
//! reported here, once, instead of on every evaluation.

use crate::ast::Value;
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};
use std::rc::Rc;

/// Executable form of a datum.
#[derive(Debug)]
pub enum Expr {
    /// Numbers, strings, booleans, nil and already-evaluated procedures
    Literal(Value),
    /// Variable reference
    Symbol(String),
    /// `(quote datum)` / `'datum`
    Quote(Value),
    /// `(def name expr)`, also spelled `define`
    Def(String, Rc<Expr>),
    /// `(lambda (params...) body...)`
    Lambda { params: Rc<[String]>, body: Rc<Expr> },
    /// `(if cond then else?)`
    If {
        cond: Rc<Expr>,
        then: Rc<Expr>,
        otherwise: Option<Rc<Expr>>,
    },
    /// `(let ((name expr)...) body...)`
    Let {
        bindings: Vec<(String, Rc<Expr>)>,
        body: Rc<Expr>,
    },
    /// `(set! name expr)`
    Set(String, Rc<Expr>),
    /// `(begin expr...)`
    Begin(Vec<Rc<Expr>>),
    /// `(and expr...)`, short-circuiting
    And(Vec<Rc<Expr>>),
    /// `(or expr...)`, short-circuiting
    Or(Vec<Rc<Expr>>),
    /// Procedure application
    Call { head: Rc<Expr>, args: Vec<Rc<Expr>> },
}

fn malformed(message: impl Into<String>, form: &Value) -> Error {
    Error::ParseError(ParseError::new(
        ParseErrorKind::MalformedForm,
        message,
        Some(form.to_string()),
        None,
    ))
}

impl Expr {
    /// Analyze a datum produced by the reader.
    pub fn analyze(datum: &Value) -> Result<Expr, Error> {
        analyze(datum, 0)
    }
}

fn analyze(datum: &Value, depth: usize) -> Result<Expr, Error> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(Error::ParseError(ParseError::from_message(
            ParseErrorKind::TooDeeplyNested,
            format!("expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
        )));
    }

    let items = match datum {
        Value::Symbol(name) => return Ok(Expr::Symbol(name.clone())),
        Value::List(items) if !items.is_empty() => items,
        // `()` evaluates to nil like the other self-evaluating atoms
        Value::List(_) => return Ok(Expr::Literal(Value::Nil)),
        other => return Ok(Expr::Literal(other.clone())),
    };

    let sub = |v: &Value| analyze(v, depth + 1).map(Rc::new);
    let many = |vs: &[Value]| vs.iter().map(&sub).collect::<Result<Vec<_>, _>>();

    let (head, rest) = (&items[0], &items[1..]);
    let keyword = match head {
        Value::Symbol(name) => name.as_str(),
        _ => "",
    };

    match (keyword, rest) {
        ("quote", [quoted]) => Ok(Expr::Quote(quoted.clone())),
        ("quote", _) => Err(malformed("quote expects exactly one datum", datum)),

        ("def" | "define", [Value::Symbol(name), value]) => {
            Ok(Expr::Def(name.clone(), sub(value)?))
        }
        ("def" | "define", _) => Err(malformed(
            format!("{keyword} expects a symbol and one expression"),
            datum,
        )),

        ("set!", [Value::Symbol(name), value]) => Ok(Expr::Set(name.clone(), sub(value)?)),
        ("set!", _) => Err(malformed("set! expects a symbol and one expression", datum)),

        ("lambda", [params, body @ ..]) if !body.is_empty() => {
            let params = lambda_params(params, datum)?;
            Ok(Expr::Lambda {
                params: params.into(),
                body: sequence(many(body)?),
            })
        }
        ("lambda", _) => Err(malformed(
            "lambda expects a parameter list and at least one body expression",
            datum,
        )),

        ("if", [cond, then]) => Ok(Expr::If {
            cond: sub(cond)?,
            then: sub(then)?,
            otherwise: None,
        }),
        ("if", [cond, then, otherwise]) => Ok(Expr::If {
            cond: sub(cond)?,
            then: sub(then)?,
            otherwise: Some(sub(otherwise)?),
        }),
        ("if", _) => Err(malformed(
            "if expects a condition, a consequent and an optional alternative",
            datum,
        )),

        ("let", [bindings, body @ ..]) if !body.is_empty() => {
            let bindings = let_bindings(bindings, datum)?
                .into_iter()
                .map(|(name, init)| Ok((name, sub(init)?)))
                .collect::<Result<Vec<_>, Error>>()?;
            Ok(Expr::Let {
                bindings,
                body: sequence(many(body)?),
            })
        }
        ("let", _) => Err(malformed(
            "let expects a binding list and at least one body expression",
            datum,
        )),

        ("begin", body) => Ok(Expr::Begin(many(body)?)),
        ("and", body) => Ok(Expr::And(many(body)?)),
        ("or", body) => Ok(Expr::Or(many(body)?)),

        _ => Ok(Expr::Call {
            head: sub(head)?,
            args: many(rest)?,
        }),
    }
}

/// Wrap a multi-expression body in an implicit `begin`.
fn sequence(mut body: Vec<Rc<Expr>>) -> Rc<Expr> {
    match body.len() {
        1 => body.remove(0),
        _ => Rc::new(Expr::Begin(body)),
    }
}

fn lambda_params(params: &Value, form: &Value) -> Result<Vec<String>, Error> {
    let Some(items) = params.as_list() else {
        return Err(malformed("lambda parameters must be a list", form));
    };
    let mut names: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let Value::Symbol(name) = item else {
            return Err(malformed("lambda parameters must be symbols", form));
        };
        if names.contains(name) {
            return Err(malformed(format!("duplicate parameter '{name}'"), form));
        }
        names.push(name.clone());
    }
    Ok(names)
}

fn let_bindings<'v>(bindings: &'v Value, form: &Value) -> Result<Vec<(String, &'v Value)>, Error> {
    let Some(items) = bindings.as_list() else {
        return Err(malformed("let bindings must be a list", form));
    };
    let mut out: Vec<(String, &Value)> = Vec::with_capacity(items.len());
    for item in items {
        let [Value::Symbol(name), init] = item.as_list().unwrap_or_default() else {
            return Err(malformed("each let binding must be (name expr)", form));
        };
        if out.iter().any(|(seen, _)| seen == name) {
            return Err(malformed(format!("duplicate binding '{name}'"), form));
        }
        out.push((name.clone(), init));
    }
    Ok(out)
}
