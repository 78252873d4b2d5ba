//! The sequence compiler: splits a straight-line expression sequence into
//! basic blocks at every suspension point.
//!
//! ## Walk
//!
//! The compiler inspects one expression at a time, keeping three notions:
//!
//! - **past** — expressions already consumed into the block in progress;
//! - **cursor** — the expression under inspection;
//! - **future** — the remainder of the sequence.
//!
//! A cursor that produces no blocks (see [`Expr::suspends`]) is appended to
//! *past* and the walk advances. A suspending cursor hands control to its
//! translator:
//!
//! - `yield`, `break`, `next` lower to a `Pause`/`Goto` appended directly to
//!   *past* — the block in progress ends with them.
//! - A suspending `if` closes the block in progress with the rewritten
//!   conditional and emits its branch blocks ([`Compiler::lower_if`]).
//! - Loops close the block in progress with a transition into the loop and
//!   leave the loop's exit block open for the future.
//!
//! When the future is non-empty after a suspension, the block for it is
//! allocated on the spot and every dangling resume target is patched to it.
//! When the future is empty, dangling targets are left on the pending lists
//! for the caller: a loop translator patches them to its head, the driver
//! patches them to the final invisibly-returning block.

use std::collections::VecDeque;

use super::core::Compiler;
use crate::ast::{Expr, StateId, Target};
use anyhow::{bail, Result};

/// Where a compiled sequence left off.
///
/// `open` is the index of the block still accumulating when the sequence
/// ended, with `past` its content so far; the caller decides the tail
/// treatment (loop tails cycle to the head, the driver appends a return).
/// `open` is `None` when the last expression closed its own block and
/// nothing follows — `past` is empty in that case.
pub(super) struct SeqEnd {
    pub(super) past: Vec<Expr>,
    pub(super) open: Option<StateId>,
}

/// A sequence is the contents of a braced block; anything else is a
/// one-expression sequence.
pub(super) fn flatten(expr: Expr) -> Vec<Expr> {
    match expr {
        Expr::Block(exprs) => exprs,
        other => vec![other],
    }
}

impl Compiler {
    /// Compile `exprs` into blocks, starting in the open block `start`
    /// whose content so far is `past`.
    pub(super) fn compile_seq(
        &mut self,
        start: StateId,
        exprs: VecDeque<Expr>,
        past: Vec<Expr>,
    ) -> Result<SeqEnd> {
        let mut at = start;
        let mut past = past;
        let mut rest = exprs;

        while let Some(cursor) = rest.pop_front() {
            if !cursor.suspends() {
                past.push(cursor);
                continue;
            }
            match cursor {
                // A suspending braced block continues the surrounding
                // sequence; its contents take the cursor's place.
                Expr::Block(exprs) => {
                    for expr in exprs.into_iter().rev() {
                        rest.push_front(expr);
                    }
                }

                Expr::Yield(value) => {
                    let slot = self.fresh_slot();
                    self.push_pause(slot);
                    past.push(Expr::Pause {
                        target: Target::Slot(slot),
                        value,
                    });
                    if rest.is_empty() {
                        return Ok(SeqEnd {
                            past,
                            open: Some(at),
                        });
                    }
                    self.flush(at, std::mem::take(&mut past))?;
                    at = self.open_resume()?;
                }

                Expr::Break => {
                    let slot = self.fresh_slot();
                    self.innermost_loop("break")?.breaks.push(slot);
                    past.push(Expr::Goto {
                        target: Target::Slot(slot),
                    });
                    if rest.is_empty() {
                        return Ok(SeqEnd {
                            past,
                            open: Some(at),
                        });
                    }
                    self.flush(at, std::mem::take(&mut past))?;
                    at = self.open_resume()?;
                }

                Expr::Next => {
                    let head = self.innermost_loop("next")?.head;
                    past.push(Expr::goto(head));
                    if rest.is_empty() {
                        return Ok(SeqEnd {
                            past,
                            open: Some(at),
                        });
                    }
                    self.flush(at, std::mem::take(&mut past))?;
                    at = self.open_resume()?;
                }

                Expr::If { cond, then, orelse } => {
                    self.lower_if(
                        at,
                        std::mem::take(&mut past),
                        *cond,
                        *then,
                        orelse.map(|e| *e),
                    )?;
                    if rest.is_empty() {
                        return Ok(SeqEnd {
                            past: Vec::new(),
                            open: None,
                        });
                    }
                    at = self.open_resume()?;
                }

                Expr::Repeat { body } => {
                    at = self.lower_repeat(at, std::mem::take(&mut past), *body)?;
                }

                Expr::While { cond, body } => {
                    at = self.lower_while(
                        at,
                        std::mem::take(&mut past),
                        *cond,
                        flatten(*body),
                    )?;
                }

                Expr::For { var, seq, body } => {
                    at = self.lower_for(at, std::mem::take(&mut past), var, *seq, *body)?;
                }

                other => bail!("internal error: unexpected suspending form {}", other),
            }
        }

        Ok(SeqEnd {
            past,
            open: Some(at),
        })
    }

    /// Open the block for the code following a suspension and patch every
    /// dangling resume target to it.
    fn open_resume(&mut self) -> Result<StateId> {
        let state = self.poke();
        self.patch_pending(state)?;
        Ok(state)
    }
}
