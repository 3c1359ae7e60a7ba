//! Lowering of the block-language tree to interpreter source text.
//!
//! | block language              | interpreter                                   |
//! |-----------------------------|-----------------------------------------------|
//! | top-level `BEGIN .. END`    | `(begin (def x nil) .. stmt ..)`              |
//! | inner block with decls      | `(let ((x nil) ..) stmt ..)`                  |
//! | inner block without decls   | `(begin stmt ..)`                             |
//! | `x := e`                    | `(set! x e)`, or `(def x e)` on first use     |
//! | `IF c THEN s ELSE t`        | `(if c s t)`                                  |
//! | `WHILE c DO s`              | self-recursive `__loop_N` closure, see below  |
//! | `a <> b`                    | `(not (= a b))`                               |
//! | `a + b + c`                 | `(+ a b c)`, likewise `- * / AND OR`          |
//!
//! ```scheme
//! (begin
//!   (def __loop_0 (lambda () (if c (begin s (__loop_0)) nil)))
//!   (__loop_0))
//! ```
//!
//! The recursive call is the last thing the loop body does, so the
//! evaluator runs it as a tail call.
//!
//! An assignment to a name that is neither declared nor already assigned in
//! an enclosing scope defines it in the innermost interpreter frame. A
//! `WHILE` body is a closure body, so such names are local to one iteration.
//!
//! The output must stay readable by the interpreter, so a statement whose
//! lowering nests [`MAX_PARSE_DEPTH`] lists deep is a compile error.

use super::CompileError;
use super::ast::{BinOp, Block, Expr, Literal, Stmt, UnaryOp};
use crate::MAX_PARSE_DEPTH;
use std::collections::HashSet;

/// Lists a `WHILE` body sits inside once lowered.
const LOOP_BODY_NESTING: usize = 5;

/// Generate interpreter source for a parsed program.
pub fn generate(program: &Block) -> Result<String, CompileError> {
    let mut generator = Generator::default();
    generator.top_level(program)
}

/// Names bound in one interpreter frame (global, `let`, or loop closure).
#[derive(Default)]
struct Frame {
    known: HashSet<String>,
    /// Inside an `IF` branch a first-use `def` may not run, so it does not
    /// make the name known.
    conditional: usize,
}

#[derive(Default)]
struct Generator {
    frames: Vec<Frame>,
    next_loop: usize,
    /// Lists open around the statement being lowered
    nesting: usize,
}

impl Generator {
    fn top_level(&mut self, block: &Block) -> Result<String, CompileError> {
        self.frames.push(Frame::default());
        let mut forms = Vec::new();
        for decl in &block.declarations {
            for name in &decl.names {
                self.declare(name);
                forms.push(format!("(def {name} nil)"));
            }
        }
        let statements = self.within(1, |g| g.statements(&block.statements));
        self.frames.pop();
        forms.extend(statements?);
        Ok(list("begin", &forms))
    }

    fn block(&mut self, block: &Block) -> Result<String, CompileError> {
        let names: Vec<&String> = block.declarations.iter().flat_map(|d| &d.names).collect();
        if names.is_empty() {
            let body = self.within(1, |g| g.statements(&block.statements))?;
            return Ok(list("begin", &body));
        }

        self.frames.push(Frame::default());
        let bindings: Vec<String> = names
            .iter()
            .map(|name| {
                self.declare(name);
                format!("({name} nil)")
            })
            .collect();
        let body = self.within(1, |g| g.statements(&block.statements));
        self.frames.pop();
        let mut body = body?;
        if body.is_empty() {
            body.push("nil".to_owned());
        }
        Ok(format!("(let ({}) {})", bindings.join(" "), body.join(" ")))
    }

    fn statements(&mut self, statements: &[Stmt]) -> Result<Vec<String>, CompileError> {
        statements.iter().map(|stmt| self.statement(stmt)).collect()
    }

    fn statement(&mut self, stmt: &Stmt) -> Result<String, CompileError> {
        let text = self.lower(stmt)?;
        match stmt.location() {
            Some(location) if self.nesting + nesting(&text) >= MAX_PARSE_DEPTH => {
                Err(CompileError::syntax(
                    format!(
                        "statement nests too deeply once lowered (max depth: {MAX_PARSE_DEPTH})"
                    ),
                    location,
                ))
            }
            _ => Ok(text),
        }
    }

    fn lower(&mut self, stmt: &Stmt) -> Result<String, CompileError> {
        Ok(match stmt {
            Stmt::Assign { target, value, .. } => {
                let value = expression(value);
                if self.is_known(target) {
                    format!("(set! {target} {value})")
                } else {
                    if self.current().conditional == 0 {
                        self.declare(target);
                    }
                    format!("(def {target} {value})")
                }
            }
            Stmt::If {
                cond,
                then,
                otherwise,
                ..
            } => {
                let cond = expression(cond);
                self.current_mut().conditional += 1;
                let branches = self.within(1, |g| {
                    let then = g.statement(then)?;
                    let otherwise = otherwise.as_deref().map(|stmt| g.statement(stmt)).transpose()?;
                    Ok((then, otherwise))
                });
                self.current_mut().conditional -= 1;
                match branches? {
                    (then, Some(otherwise)) => format!("(if {cond} {then} {otherwise})"),
                    (then, None) => format!("(if {cond} {then})"),
                }
            }
            Stmt::While { cond, body, .. } => {
                let helper = format!("__loop_{}", self.next_loop);
                self.next_loop += 1;
                self.frames.push(Frame::default());
                let body = self.within(LOOP_BODY_NESTING, |g| g.statement(body));
                self.frames.pop();
                format!(
                    "(begin (def {helper} (lambda () (if {} (begin {} ({helper})) nil))) ({helper}))",
                    expression(cond),
                    body?
                )
            }
            Stmt::Block(block) => self.block(block)?,
            Stmt::Expr { value, .. } => expression(value),
            Stmt::Empty => "nil".to_owned(),
        })
    }

    /// Run `f` with `extra` more lists open around its output.
    fn within<T>(&mut self, extra: usize, f: impl FnOnce(&mut Self) -> T) -> T {
        self.nesting += extra;
        let result = f(self);
        self.nesting -= extra;
        result
    }

    fn declare(&mut self, name: &str) {
        self.current_mut().known.insert(name.to_owned());
    }

    fn is_known(&self, name: &str) -> bool {
        self.frames.iter().any(|frame| frame.known.contains(name))
    }

    fn current(&self) -> &Frame {
        // top_level pushes the first frame before anything else runs
        &self.frames[self.frames.len() - 1]
    }

    fn current_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }
}

fn expression(expr: &Expr) -> String {
    match expr {
        Expr::Literal(Literal::Number(n)) => format!("{n}"),
        Expr::Literal(Literal::Str(s)) => format!("\"{s}\""),
        Expr::Literal(Literal::Bool(b)) => (if *b { "#t" } else { "#f" }).to_owned(),
        Expr::VarRef(name) => name.clone(),
        Expr::Unary { op, operand } => {
            let head = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "not",
            };
            format!("({head} {})", expression(operand))
        }
        Expr::BinOp { op, operands } => {
            let operands: Vec<String> = operands.iter().map(expression).collect();
            match op {
                BinOp::Ne => format!("(not {})", list("=", &operands)),
                _ => list(op.target_symbol(), &operands),
            }
        }
    }
}

/// Deepest list nesting in generated text. String literals have no escapes.
fn nesting(text: &str) -> usize {
    let mut depth = 0usize;
    let mut deepest = 0;
    let mut in_string = false;
    for c in text.chars() {
        match c {
            '"' => in_string = !in_string,
            '(' if !in_string => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            ')' if !in_string => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    deepest
}

fn list(head: &str, items: &[String]) -> String {
    if items.is_empty() {
        format!("({head})")
    } else {
        format!("({head} {})", items.join(" "))
    }
}
