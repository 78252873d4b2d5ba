//! Shared harness for the end-to-end tests.
//!
//! Two ways to run a generator body live here:
//!
//! - [`drive`] compiles the body and steps the resulting machine with
//!   [`Frame`], the `Evaluate` implementation over a flat variable frame;
//! - [`reference_run`] evaluates the *original* body directly, suspending
//!   cooperatively at each `yield` by collecting the value.
//!
//! Equivalence tests compare the two on the same inputs: same sequence of
//! yielded values, same terminal value.

use std::collections::HashMap;

use spindle::ast::{Expr, Value};
use spindle::{compile, CompileOptions};
use spindle_runtime::{Evaluate, Machine, MachineError};

/// One flat frame of user variables plus iterator state, evaluating the
/// expression language the tests use: literals, variables, assignment,
/// integer arithmetic and comparison, list construction, and the hidden
/// iterator protocol (`iterator`/`has_next`/`next`).
#[derive(Debug, Default)]
pub struct Frame {
    vars: HashMap<String, Value>,
    iters: Vec<(Vec<Value>, usize)>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, name: &str, value: Value) -> Self {
        self.vars.insert(name.to_string(), value);
        self
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    fn int(&mut self, expr: &Expr) -> Result<i64, String> {
        match self.eval(expr)? {
            Value::Int(v) => Ok(v),
            other => Err(format!("expected an integer, got {}", other)),
        }
    }

    fn call(&mut self, name: &str, args: &[Expr]) -> Result<Value, String> {
        match name {
            "<-" => {
                let [Expr::Sym(target), value] = args else {
                    return Err("malformed assignment".to_string());
                };
                let value = self.eval(value)?;
                self.vars.insert(target.clone(), value.clone());
                Ok(value)
            }
            "+" | "-" | "*" => {
                let [lhs, rhs] = args else {
                    return Err(format!("`{}` expects two arguments", name));
                };
                let (lhs, rhs) = (self.int(lhs)?, self.int(rhs)?);
                Ok(Value::Int(match name {
                    "+" => lhs + rhs,
                    "-" => lhs - rhs,
                    _ => lhs * rhs,
                }))
            }
            "%%" => {
                let [lhs, rhs] = args else {
                    return Err("`%%` expects two arguments".to_string());
                };
                let (lhs, rhs) = (self.int(lhs)?, self.int(rhs)?);
                if rhs == 0 {
                    return Err("modulo by zero".to_string());
                }
                Ok(Value::Int(lhs.rem_euclid(rhs)))
            }
            "==" | "!=" | "<" | "<=" | ">" | ">=" => {
                let [lhs, rhs] = args else {
                    return Err(format!("`{}` expects two arguments", name));
                };
                let (lhs, rhs) = (self.int(lhs)?, self.int(rhs)?);
                Ok(Value::Bool(match name {
                    "==" => lhs == rhs,
                    "!=" => lhs != rhs,
                    "<" => lhs < rhs,
                    "<=" => lhs <= rhs,
                    ">" => lhs > rhs,
                    _ => lhs >= rhs,
                }))
            }
            "c" => {
                let mut items = Vec::with_capacity(args.len());
                for arg in args {
                    items.push(self.eval(arg)?);
                }
                Ok(Value::List(items))
            }
            "iterator" => {
                let [seq] = args else {
                    return Err("`iterator` expects one argument".to_string());
                };
                let Value::List(items) = self.eval(seq)? else {
                    return Err("`iterator` expects a list".to_string());
                };
                let handle = self.iters.len() as i64;
                self.iters.push((items, 0));
                Ok(Value::Int(handle))
            }
            "has_next" => {
                let (items, position) = self.iter_state(args)?;
                Ok(Value::Bool(position < items.len()))
            }
            "next" => {
                let handle = self.iter_handle(args)?;
                let (items, position) = &mut self.iters[handle];
                match items.get(*position) {
                    Some(item) => {
                        let item = item.clone();
                        *position += 1;
                        Ok(item)
                    }
                    None => Err("iterator exhausted".to_string()),
                }
            }
            other => Err(format!("unknown function `{}`", other)),
        }
    }

    fn iter_handle(&mut self, args: &[Expr]) -> Result<usize, String> {
        let [handle] = args else {
            return Err("iterator accessor expects one argument".to_string());
        };
        let handle = self.int(handle)?;
        if handle < 0 || handle as usize >= self.iters.len() {
            return Err(format!("unknown iterator handle {}", handle));
        }
        Ok(handle as usize)
    }

    fn iter_state(&mut self, args: &[Expr]) -> Result<(&Vec<Value>, usize), String> {
        let handle = self.iter_handle(args)?;
        let (items, position) = &self.iters[handle];
        Ok((items, *position))
    }
}

impl Evaluate for Frame {
    type Value = Value;
    type Error = String;

    fn eval(&mut self, expr: &Expr) -> Result<Value, String> {
        match expr {
            Expr::Lit(value) => Ok(value.clone()),
            Expr::Sym(name) => self
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| format!("undefined variable `{}`", name)),
            Expr::Call { head, args } => match head.as_ref() {
                Expr::Sym(name) => self.call(name, args),
                other => Err(format!("cannot call {}", other)),
            },
            Expr::If { cond, then, orelse } => {
                let cond = self.eval(cond)?;
                if self.is_truthy(&cond)? {
                    self.eval(then)
                } else {
                    match orelse {
                        Some(orelse) => self.eval(orelse),
                        None => Ok(Value::Null),
                    }
                }
            }
            Expr::Block(exprs) => {
                let mut last = Value::Null;
                for expr in exprs {
                    last = self.eval(expr)?;
                }
                Ok(last)
            }
            Expr::Repeat { body } => loop {
                self.eval(body)?;
            },
            Expr::While { cond, body } => {
                loop {
                    let cond = self.eval(cond)?;
                    if !self.is_truthy(&cond)? {
                        break;
                    }
                    self.eval(body)?;
                }
                Ok(Value::Null)
            }
            Expr::For { var, seq, body } => {
                let Value::List(items) = self.eval(seq)? else {
                    return Err("`for` expects a list".to_string());
                };
                for item in items {
                    self.vars.insert(var.clone(), item);
                    self.eval(body)?;
                }
                Ok(Value::Null)
            }
            other => Err(format!("{} in expression position", other)),
        }
    }

    fn is_truthy(&mut self, value: &Value) -> Result<bool, String> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(v) => Ok(*v != 0),
            other => Err(format!("{} is not a condition", other)),
        }
    }
}

/// Compile `body` and drive the machine to completion in `frame`.
pub fn drive(
    body: Expr,
    frame: &mut Frame,
) -> Result<(Vec<Option<Value>>, Option<Value>), String> {
    let blocks = compile(body, &CompileOptions::default()).map_err(|e| format!("{:#}", e))?;
    let mut machine = Machine::new(blocks);
    machine.drain(frame).map_err(|e| e.to_string())
}

/// Compile `body` and collect at most `limit` resumptions; for generators
/// that never finish.
pub fn drive_bounded(
    body: Expr,
    frame: &mut Frame,
    limit: usize,
) -> Result<Vec<Option<Value>>, String> {
    let blocks = compile(body, &CompileOptions::default()).map_err(|e| format!("{:#}", e))?;
    let mut machine = Machine::new(blocks);
    let mut yielded = Vec::new();
    for _ in 0..limit {
        match machine.resume(frame) {
            Ok(spindle_runtime::Step::Yielded(value)) => yielded.push(value),
            Ok(spindle_runtime::Step::Done(_)) => break,
            Err(MachineError::Exhausted) => break,
            Err(error) => return Err(error.to_string()),
        }
    }
    Ok(yielded)
}

/// How evaluating one expression handed control back.
enum Flow {
    Val(Value),
    Break,
    Next,
    Return(Option<Value>),
}

/// Evaluate the original body directly, suspending cooperatively at each
/// `yield` by recording the value. The oracle for round-trip tests.
pub fn reference_run(
    body: &Expr,
    frame: &mut Frame,
) -> Result<(Vec<Option<Value>>, Option<Value>), String> {
    let mut yielded = Vec::new();
    let statements: Vec<&Expr> = match body {
        Expr::Block(exprs) => exprs.iter().collect(),
        other => vec![other],
    };
    let mut last: Option<(&Expr, Value)> = None;
    for statement in statements {
        match eval_flow(statement, frame, &mut yielded)? {
            Flow::Val(value) => last = Some((statement, value)),
            Flow::Return(value) => return Ok((yielded, value)),
            Flow::Break => return Err("`break` outside of a loop".to_string()),
            Flow::Next => return Err("`next` outside of a loop".to_string()),
        }
    }
    // The terminal value mirrors the compiled machine: loops, yields, and
    // anything that suspends end the body invisibly.
    let terminal = match last {
        Some((statement, value)) if !ends_invisibly(statement) => Some(value),
        _ => None,
    };
    Ok((yielded, terminal))
}

fn ends_invisibly(statement: &Expr) -> bool {
    matches!(
        statement,
        Expr::Repeat { .. } | Expr::While { .. } | Expr::For { .. } | Expr::Yield(_)
    ) || statement.suspends()
}

fn eval_flow(
    expr: &Expr,
    frame: &mut Frame,
    yielded: &mut Vec<Option<Value>>,
) -> Result<Flow, String> {
    match expr {
        Expr::Yield(value) => {
            let value = match value {
                Some(value) => Some(frame.eval(value)?),
                None => None,
            };
            yielded.push(value);
            Ok(Flow::Val(Value::Null))
        }
        Expr::Break => Ok(Flow::Break),
        Expr::Next => Ok(Flow::Next),
        Expr::Return(value) => {
            let value = match value {
                Some(value) => Some(frame.eval(value)?),
                None => None,
            };
            Ok(Flow::Return(value))
        }
        Expr::If { cond, then, orelse } => {
            let cond = frame.eval(cond)?;
            if frame.is_truthy(&cond)? {
                eval_flow(then, frame, yielded)
            } else {
                match orelse {
                    Some(orelse) => eval_flow(orelse, frame, yielded),
                    None => Ok(Flow::Val(Value::Null)),
                }
            }
        }
        Expr::Block(exprs) => {
            let mut last = Value::Null;
            for expr in exprs {
                match eval_flow(expr, frame, yielded)? {
                    Flow::Val(value) => last = value,
                    other => return Ok(other),
                }
            }
            Ok(Flow::Val(last))
        }
        Expr::Repeat { body } => loop {
            match eval_flow(body, frame, yielded)? {
                Flow::Val(_) | Flow::Next => {}
                Flow::Break => return Ok(Flow::Val(Value::Null)),
                Flow::Return(value) => return Ok(Flow::Return(value)),
            }
        },
        Expr::While { cond, body } => {
            loop {
                let cond = frame.eval(cond)?;
                if !frame.is_truthy(&cond)? {
                    break;
                }
                match eval_flow(body, frame, yielded)? {
                    Flow::Val(_) | Flow::Next => {}
                    Flow::Break => break,
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                }
            }
            Ok(Flow::Val(Value::Null))
        }
        Expr::For { var, seq, body } => {
            let Value::List(items) = frame.eval(seq)? else {
                return Err("`for` expects a list".to_string());
            };
            for item in items {
                frame.set(var, item);
                match eval_flow(body, frame, yielded)? {
                    Flow::Val(_) | Flow::Next => {}
                    Flow::Break => break,
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                }
            }
            Ok(Flow::Val(Value::Null))
        }
        other => frame.eval(other).map(Flow::Val),
    }
}
