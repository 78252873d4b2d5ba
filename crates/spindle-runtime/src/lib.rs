//! `spindle-runtime` — runtime driver for spindle-compiled generators.
//!
//! This crate provides:
//! - [`Machine`]: steps a compiled block list, maintaining the program
//!   counter and the done flag
//! - [`Evaluate`]: the seam through which user expressions are evaluated;
//!   the driver itself never interprets literals, symbols, or calls
//! - [`Step`] / [`MachineError`] for the outcome of each resumption
//!
//! The driver's contract: evaluate a block's expressions in order; on
//! `goto(s)` set the program counter to `s` and continue; on `pause(s, v)`
//! yield `v` and remember `s`; on `return(v)` mark the machine done and
//! surface `v`. Reentering a finished machine is an error, and an evaluator
//! failure finishes the machine before propagating.

use std::fmt;

mod machine;
pub use machine::{Evaluate, Machine};

/// Outcome of one resumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<V> {
    /// The machine suspended, emitting a value (`yield()` emits none).
    Yielded(Option<V>),
    /// The machine finished. `None` is the invisible return — the body ended
    /// without a value-producing expression.
    Done(Option<V>),
}

/// Driver faults and propagated evaluator failures — no panics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineError<E> {
    /// The machine already finished; reentry is an error.
    Exhausted,
    /// Jump to a block index outside the machine.
    MissingBlock(u32),
    /// A jump target the compiler never resolved.
    UnresolvedTarget,
    /// A block ran out of expressions without reaching a terminator.
    NoTerminator,
    /// The expression evaluator failed.
    Eval(E),
}

impl<E: fmt::Display> fmt::Display for MachineError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineError::Exhausted => write!(f, "machine already finished"),
            MachineError::MissingBlock(index) => {
                write!(f, "jump to missing block {}", index)
            }
            MachineError::UnresolvedTarget => write!(f, "unresolved jump target"),
            MachineError::NoTerminator => write!(f, "block ended without a terminator"),
            MachineError::Eval(e) => write!(f, "evaluation failed: {}", e),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for MachineError<E> {}
