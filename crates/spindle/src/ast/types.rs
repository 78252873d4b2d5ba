//! AST type definitions.
//!
//! The expression tree is a single tagged sum over user-written forms
//! (`Lit`, `Sym`, `Call`, `If`, `Block`, the loops, `Break`, `Next`,
//! `Return`, `Yield`) and machine forms produced by compilation (`Pause`,
//! `Goto`, `MBlock`). Compilation consumes the former and emits blocks
//! containing only the latter plus leaf expressions.

use std::fmt;

/// Opaque literal payload. The compiler never interprets these values; they
/// are carried through to the emitted blocks and evaluated by the runtime
/// driver's evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

// Rendered in the source-language notation (TRUE/FALSE/NULL, c(...) for
// lists) so that printed blocks read like the code they were compiled from.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(true) => write!(f, "TRUE"),
            Value::Bool(false) => write!(f, "FALSE"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "\"{}\"", s),
            Value::List(items) => {
                write!(f, "c(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Index of an emitted block, 1-based.
///
/// The block list is dense: block `StateId(i)` is the i-th emitted block.
/// A `StateId` doubles as a resume state — the program counter value the
/// runtime driver loads on `goto`/`pause`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub u32);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entry in the compile-time patch table standing for a block index that is
/// not yet known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(pub u32);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

/// Jump target of a `Goto` or `Pause`.
///
/// During compilation a forward target is a `Slot` into the patch table;
/// the driver resolves every slot to a concrete `State` before returning
/// the block list. Emitted output never contains `Slot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    State(StateId),
    Slot(SlotId),
}

impl Target {
    /// The resolved state, if this target has one.
    pub fn state(&self) -> Option<StateId> {
        match self {
            Target::State(s) => Some(*s),
            Target::Slot(_) => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::State(s) => write!(f, "{}", s),
            Target::Slot(s) => write!(f, "{}", s),
        }
    }
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Opaque user value.
    Lit(Value),

    /// Variable reference.
    Sym(String),

    /// Generic application, `head(args...)`. Assignment is the call `<-`.
    Call { head: Box<Expr>, args: Vec<Expr> },

    /// Conditional. `orelse` is absent for one-armed `if`.
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        orelse: Option<Box<Expr>>,
    },

    /// Sequential composition, `{ a; b; ... }`. Evaluates to the last
    /// expression's value.
    Block(Vec<Expr>),

    /// Infinite loop.
    Repeat { body: Box<Expr> },

    /// Conditional loop.
    While { cond: Box<Expr>, body: Box<Expr> },

    /// Iteration, `for (var in seq) body`.
    For {
        var: String,
        seq: Box<Expr>,
        body: Box<Expr>,
    },

    /// Exit the innermost loop.
    Break,

    /// Continue the innermost loop.
    Next,

    /// Function return. `None` is the invisible return — the function ends
    /// without a value-producing expression.
    Return(Option<Box<Expr>>),

    /// Suspension point as the user writes it. Never appears in emitted
    /// blocks; lowered to `Pause`.
    Yield(Option<Box<Expr>>),

    /// Emitted suspension: yield `value` to the driver, resume at `target`.
    Pause {
        target: Target,
        value: Option<Box<Expr>>,
    },

    /// Emitted unconditional jump.
    Goto { target: Target },

    /// Emitted machine block used inline, e.g. as the arm of a lowered
    /// conditional. Top-level blocks are [`MachineBlock`].
    MBlock(Vec<Expr>),
}

impl Expr {
    pub fn lit(v: impl Into<Value>) -> Expr {
        Expr::Lit(v.into())
    }

    pub fn sym(name: impl Into<String>) -> Expr {
        Expr::Sym(name.into())
    }

    pub fn call(head: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Call {
            head: Box::new(Expr::Sym(head.into())),
            args,
        }
    }

    /// Assignment, `target <- value`.
    pub fn assign(target: impl Into<String>, value: Expr) -> Expr {
        Expr::call("<-", vec![Expr::Sym(target.into()), value])
    }

    pub fn block(exprs: Vec<Expr>) -> Expr {
        Expr::Block(exprs)
    }

    pub fn if_(cond: Expr, then: Expr) -> Expr {
        Expr::If {
            cond: Box::new(cond),
            then: Box::new(then),
            orelse: None,
        }
    }

    pub fn if_else(cond: Expr, then: Expr, orelse: Expr) -> Expr {
        Expr::If {
            cond: Box::new(cond),
            then: Box::new(then),
            orelse: Some(Box::new(orelse)),
        }
    }

    pub fn repeat(body: Expr) -> Expr {
        Expr::Repeat {
            body: Box::new(body),
        }
    }

    pub fn while_(cond: Expr, body: Expr) -> Expr {
        Expr::While {
            cond: Box::new(cond),
            body: Box::new(body),
        }
    }

    pub fn for_(var: impl Into<String>, seq: Expr, body: Expr) -> Expr {
        Expr::For {
            var: var.into(),
            seq: Box::new(seq),
            body: Box::new(body),
        }
    }

    pub fn yield_(value: Expr) -> Expr {
        Expr::Yield(Some(Box::new(value)))
    }

    pub fn yield_nothing() -> Expr {
        Expr::Yield(None)
    }

    pub fn ret(value: Expr) -> Expr {
        Expr::Return(Some(Box::new(value)))
    }

    pub fn ret_invisible() -> Expr {
        Expr::Return(None)
    }

    pub fn goto(state: StateId) -> Expr {
        Expr::Goto {
            target: Target::State(state),
        }
    }

    pub fn pause(state: StateId, value: Expr) -> Expr {
        Expr::Pause {
            target: Target::State(state),
            value: Some(Box::new(value)),
        }
    }

    /// True if evaluating this expression can never fall through to the
    /// expression after it: a direct `Return`/`Pause`/`Goto`, an `If` both
    /// of whose arms are exiting, or a sequence whose last expression is
    /// exiting.
    pub fn is_exiting(&self) -> bool {
        match self {
            Expr::Return(_) | Expr::Pause { .. } | Expr::Goto { .. } => true,
            Expr::If {
                then,
                orelse: Some(orelse),
                ..
            } => then.is_exiting() && orelse.is_exiting(),
            Expr::Block(exprs) | Expr::MBlock(exprs) => {
                exprs.last().is_some_and(|e| e.is_exiting())
            }
            _ => false,
        }
    }

    /// Immediate child expressions, in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Lit(_) | Expr::Sym(_) | Expr::Break | Expr::Next => Vec::new(),
            Expr::Call { head, args } => {
                let mut out = vec![head.as_ref()];
                out.extend(args.iter());
                out
            }
            Expr::If { cond, then, orelse } => {
                let mut out = vec![cond.as_ref(), then.as_ref()];
                if let Some(orelse) = orelse {
                    out.push(orelse.as_ref());
                }
                out
            }
            Expr::Block(exprs) | Expr::MBlock(exprs) => exprs.iter().collect(),
            Expr::Repeat { body } => vec![body.as_ref()],
            Expr::While { cond, body } => vec![cond.as_ref(), body.as_ref()],
            Expr::For { seq, body, .. } => vec![seq.as_ref(), body.as_ref()],
            Expr::Return(value) | Expr::Yield(value) => {
                value.iter().map(|v| v.as_ref()).collect()
            }
            Expr::Pause { value, .. } => value.iter().map(|v| v.as_ref()).collect(),
            Expr::Goto { .. } => Vec::new(),
        }
    }

    /// True if lowering this expression produces machine blocks, i.e. it
    /// contains a `yield`, `break`, or `next` somewhere beneath it.
    ///
    /// Calls are opaque: a suspension buried inside call arguments cannot be
    /// split and is rejected later by output verification rather than
    /// silently kept.
    pub fn suspends(&self) -> bool {
        match self {
            Expr::Yield(_) | Expr::Break | Expr::Next => true,
            Expr::If { then, orelse, .. } => {
                then.suspends() || orelse.as_ref().is_some_and(|e| e.suspends())
            }
            Expr::Block(exprs) => exprs.iter().any(|e| e.suspends()),
            Expr::Repeat { body } => body.suspends(),
            Expr::While { body, .. } => body.suspends(),
            Expr::For { body, .. } => body.suspends(),
            _ => false,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Lit(v) => write!(f, "{}", v),
            Expr::Sym(name) => write!(f, "{}", name),
            Expr::Call { head, args } => {
                // Assignment reads better infix.
                if let Expr::Sym(name) = head.as_ref() {
                    if name == "<-" && args.len() == 2 {
                        return write!(f, "{} <- {}", args[0], args[1]);
                    }
                }
                write!(f, "{}(", head)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::If { cond, then, orelse } => {
                write!(f, "if ({}) {}", cond, then)?;
                if let Some(orelse) = orelse {
                    write!(f, " else {}", orelse)?;
                }
                Ok(())
            }
            Expr::Block(exprs) => {
                write!(f, "{{ ")?;
                for (i, expr) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", expr)?;
                }
                write!(f, " }}")
            }
            Expr::Repeat { body } => write!(f, "repeat {}", body),
            Expr::While { cond, body } => write!(f, "while ({}) {}", cond, body),
            Expr::For { var, seq, body } => write!(f, "for ({} in {}) {}", var, seq, body),
            Expr::Break => write!(f, "break"),
            Expr::Next => write!(f, "next"),
            Expr::Return(Some(v)) => write!(f, "return({})", v),
            Expr::Return(None) => write!(f, "return(invisible)"),
            Expr::Yield(Some(v)) => write!(f, "yield({})", v),
            Expr::Yield(None) => write!(f, "yield()"),
            Expr::Pause {
                target,
                value: Some(v),
            } => write!(f, "pause({}, {})", target, v),
            Expr::Pause {
                target,
                value: None,
            } => write!(f, "pause({})", target),
            Expr::Goto { target } => write!(f, "goto({})", target),
            Expr::MBlock(exprs) => {
                write!(f, "mblock(")?;
                for (i, expr) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", expr)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// One emitted basic block: a straight-line expression sequence ending in a
/// control-flow terminator (`Return`, `Pause`, `Goto`, or an `If` whose arms
/// both jump).
///
/// INVARIANT: `index` equals the block's 1-based position in the emitted
/// list; indices are dense with no gaps or duplicates.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineBlock {
    pub index: StateId,
    pub exprs: Vec<Expr>,
}

impl fmt::Display for MachineBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}:", self.index)?;
        for (i, expr) in self.exprs.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, " {}", expr)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Bool(true).to_string(), "TRUE");
        assert_eq!(Value::Bool(false).to_string(), "FALSE");
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
        assert_eq!(Value::Str("x".into()).to_string(), "\"x\"");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Int(2)]).to_string(),
            "c(1, 2)"
        );
    }

    #[test]
    fn value_conversions() {
        assert_eq!(Value::from(3i64), Value::Int(3));
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from("hi"), Value::Str("hi".into()));
        assert_eq!(Value::from(2.5), Value::Float(2.5));
    }

    #[test]
    fn expr_display_machine_forms() {
        assert_eq!(Expr::goto(StateId(2)).to_string(), "goto(2)");
        assert_eq!(
            Expr::pause(StateId(3), Expr::lit(1)).to_string(),
            "pause(3, 1)"
        );
        assert_eq!(Expr::ret_invisible().to_string(), "return(invisible)");
        assert_eq!(Expr::ret(Expr::lit("x")).to_string(), "return(\"x\")");
        assert_eq!(
            Expr::MBlock(vec![Expr::goto(StateId(4))]).to_string(),
            "mblock(goto(4))"
        );
    }

    #[test]
    fn expr_display_surface_forms() {
        assert_eq!(
            Expr::repeat(Expr::lit(Value::Null)).to_string(),
            "repeat NULL"
        );
        assert_eq!(
            Expr::while_(Expr::lit(true), Expr::yield_(Expr::lit(1))).to_string(),
            "while (TRUE) yield(1)"
        );
        assert_eq!(
            Expr::for_("i", Expr::sym("xs"), Expr::sym("i")).to_string(),
            "for (i in xs) i"
        );
        assert_eq!(
            Expr::assign("x", Expr::lit(1)).to_string(),
            "x <- 1"
        );
        assert_eq!(
            Expr::call("f", vec![Expr::lit(1), Expr::sym("y")]).to_string(),
            "f(1, y)"
        );
        assert_eq!(
            Expr::block(vec![Expr::lit(1), Expr::Break]).to_string(),
            "{ 1; break }"
        );
        assert_eq!(
            Expr::if_else(Expr::lit(true), Expr::Break, Expr::Next).to_string(),
            "if (TRUE) break else next"
        );
    }

    #[test]
    fn machine_block_display() {
        let block = MachineBlock {
            index: StateId(3),
            exprs: vec![Expr::lit("x"), Expr::goto(StateId(2))],
        };
        assert_eq!(block.to_string(), "B3: \"x\"; goto(2)");
    }

    #[test]
    fn exiting_direct_terminators() {
        assert!(Expr::ret_invisible().is_exiting());
        assert!(Expr::pause(StateId(1), Expr::lit(1)).is_exiting());
        assert!(Expr::goto(StateId(1)).is_exiting());
        assert!(!Expr::lit(1).is_exiting());
        assert!(!Expr::Break.is_exiting());
    }

    #[test]
    fn exiting_if_requires_both_arms() {
        let both = Expr::if_else(
            Expr::sym("c"),
            Expr::goto(StateId(1)),
            Expr::goto(StateId(2)),
        );
        assert!(both.is_exiting());

        let one = Expr::if_else(Expr::sym("c"), Expr::goto(StateId(1)), Expr::lit(2));
        assert!(!one.is_exiting());

        // A one-armed if can fall through when the condition is false.
        let no_else = Expr::if_(Expr::sym("c"), Expr::goto(StateId(1)));
        assert!(!no_else.is_exiting());
    }

    #[test]
    fn exiting_sequence_looks_at_last() {
        let seq = Expr::block(vec![Expr::lit(1), Expr::ret_invisible()]);
        assert!(seq.is_exiting());

        let seq = Expr::block(vec![Expr::ret_invisible(), Expr::lit(1)]);
        assert!(!seq.is_exiting());

        assert!(!Expr::block(vec![]).is_exiting());
        assert!(Expr::MBlock(vec![Expr::goto(StateId(1))]).is_exiting());
    }

    #[test]
    fn suspends_on_yield_break_next() {
        assert!(Expr::yield_(Expr::lit(1)).suspends());
        assert!(Expr::Break.suspends());
        assert!(Expr::Next.suspends());
        assert!(!Expr::lit(1).suspends());
        assert!(!Expr::ret(Expr::lit(1)).suspends());
    }

    #[test]
    fn suspends_descends_into_structure() {
        assert!(Expr::repeat(Expr::yield_(Expr::lit(1))).suspends());
        assert!(Expr::while_(Expr::lit(true), Expr::Break).suspends());
        assert!(Expr::for_("i", Expr::sym("xs"), Expr::Next).suspends());
        assert!(Expr::if_(Expr::sym("c"), Expr::yield_(Expr::lit(1))).suspends());
        assert!(Expr::block(vec![Expr::lit(1), Expr::Break]).suspends());
    }

    #[test]
    fn suspends_treats_loops_without_control_as_leaves() {
        assert!(!Expr::repeat(Expr::lit(Value::Null)).suspends());
        assert!(!Expr::while_(Expr::sym("c"), Expr::assign("x", Expr::lit(1))).suspends());
        assert!(!Expr::for_("i", Expr::sym("xs"), Expr::sym("i")).suspends());
    }

    #[test]
    fn suspends_does_not_look_into_calls() {
        // A suspension buried in call arguments cannot be split out; the
        // expression is treated as a leaf and rejected by verification.
        let call = Expr::call("f", vec![Expr::yield_(Expr::lit(1))]);
        assert!(!call.suspends());
    }

    #[test]
    fn target_state_accessor() {
        assert_eq!(
            Target::State(StateId(4)).state(),
            Some(StateId(4))
        );
        assert_eq!(Target::Slot(SlotId(0)).state(), None);
    }
}
