//! Construct translators: lowering of `if`, `repeat`, `while`, and `for`
//! into blocks plus jump stitching with the sequence compiler.
//!
//! Every translator runs with the sequence compiler's block in progress
//! (`at` + `past`) and owns closing it:
//!
//! - `repeat` appends `goto(head)` to the block in progress, so entry into
//!   the loop is a recorded transition.
//! - `while`/`for` give the condition test its own head block; when code
//!   precedes the loop it closes with `goto(head)` so re-entering the head
//!   never re-runs it.
//! - `if` rewrites itself into a terminator carrying two small jump stubs
//!   and emits suspending arms as separate blocks.
//!
//! Loops always allocate their exit block before returning, patch every
//! recorded `break` to it, and hand the exit back as the open block for
//! whatever follows the loop.

use super::core::{Compiler, LoopFrame};
use super::sequence::flatten;
use crate::ast::{Expr, SlotId, StateId, Target};
use anyhow::{anyhow, Result};

impl Compiler {
    /// Lower a conditional at least one of whose arms suspends.
    ///
    /// The rewritten `if` terminates the block in progress; each arm becomes
    /// a stub `mblock` ending in a jump. Straight-line arms stay inline in
    /// their stub and jump to the join; arms that suspend (or already exit)
    /// get their own blocks. The join block itself is not allocated here —
    /// its jumps go on the pending list and resolve to wherever the
    /// surrounding sequence continues.
    pub(super) fn lower_if(
        &mut self,
        at: StateId,
        mut past: Vec<Expr>,
        cond: Expr,
        then: Expr,
        orelse: Option<Expr>,
    ) -> Result<()> {
        let mut deferred: Vec<(SlotId, Vec<Expr>)> = Vec::new();

        let then_stub = self.branch_stub(then, &mut deferred)?;
        let else_stub = match orelse {
            Some(arm) => self.branch_stub(arm, &mut deferred)?,
            // No else: the false path falls through to the join.
            None => {
                let slot = self.fresh_slot();
                self.push_goto(slot);
                vec![Expr::Goto {
                    target: Target::Slot(slot),
                }]
            }
        };

        past.push(Expr::If {
            cond: Box::new(cond),
            then: Box::new(Expr::MBlock(then_stub)),
            orelse: Some(Box::new(Expr::MBlock(else_stub))),
        });
        self.flush(at, past)?;

        for (slot, exprs) in deferred {
            let start = self.poke();
            self.fill_slot(slot, start)?;
            let end = self.compile_seq(start, exprs.into(), Vec::new())?;
            if let Some(open) = end.open {
                let mut tail = end.past;
                if !tail.last().is_some_and(|e| e.is_exiting()) {
                    let join = self.fresh_slot();
                    self.push_goto(join);
                    tail.push(Expr::Goto {
                        target: Target::Slot(join),
                    });
                }
                self.flush(open, tail)?;
            }
        }
        Ok(())
    }

    /// Build the stub for one arm of a lowered conditional.
    fn branch_stub(
        &mut self,
        arm: Expr,
        deferred: &mut Vec<(SlotId, Vec<Expr>)>,
    ) -> Result<Vec<Expr>> {
        let exprs = flatten(arm);

        // Bare loop control lowers to the jump itself.
        if let [Expr::Break] = exprs.as_slice() {
            let slot = self.fresh_slot();
            self.innermost_loop("break")?.breaks.push(slot);
            return Ok(vec![Expr::Goto {
                target: Target::Slot(slot),
            }]);
        }
        if let [Expr::Next] = exprs.as_slice() {
            let head = self.innermost_loop("next")?.head;
            return Ok(vec![Expr::goto(head)]);
        }

        let needs_own_blocks = exprs.iter().any(|e| e.suspends())
            || exprs.last().is_some_and(|e| e.is_exiting());
        if needs_own_blocks {
            let slot = self.fresh_slot();
            deferred.push((slot, exprs));
            return Ok(vec![Expr::Goto {
                target: Target::Slot(slot),
            }]);
        }

        // Straight-line arm: keep it inline and fall through to the join.
        let mut stub = exprs;
        let join = self.fresh_slot();
        self.push_goto(join);
        stub.push(Expr::Goto {
            target: Target::Slot(join),
        });
        Ok(stub)
    }

    /// Lower `repeat { body }`.
    pub(super) fn lower_repeat(
        &mut self,
        at: StateId,
        mut past: Vec<Expr>,
        body: Expr,
    ) -> Result<StateId> {
        let head = self.poke();
        past.push(Expr::goto(head));
        self.flush(at, past)?;

        self.loops.push(LoopFrame {
            head,
            breaks: Vec::new(),
        });
        self.run_loop_body(head, flatten(body))?;
        self.close_loop()
    }

    /// Lower `while (cond) body`, equivalent to
    /// `repeat { if (cond) body else break }` with the test in its own head
    /// block.
    pub(super) fn lower_while(
        &mut self,
        at: StateId,
        past: Vec<Expr>,
        cond: Expr,
        body: Vec<Expr>,
    ) -> Result<StateId> {
        // The head must hold only the test: looping jumps back to it every
        // iteration. Code already accumulated gets its own block in front.
        let head = if past.is_empty() {
            at
        } else {
            let head = self.poke();
            let mut past = past;
            past.push(Expr::goto(head));
            self.flush(at, past)?;
            head
        };

        // The head's false arm exits the loop, exactly like a break.
        let exit_slot = self.fresh_slot();
        self.loops.push(LoopFrame {
            head,
            breaks: vec![exit_slot],
        });

        let body_slot = self.fresh_slot();
        let test = Expr::If {
            cond: Box::new(cond),
            then: Box::new(Expr::MBlock(vec![Expr::Goto {
                target: Target::Slot(body_slot),
            }])),
            orelse: Some(Box::new(Expr::MBlock(vec![Expr::Goto {
                target: Target::Slot(exit_slot),
            }]))),
        };
        self.flush(head, vec![test])?;

        let body_start = self.poke();
        self.fill_slot(body_slot, body_start)?;
        self.run_loop_body(body_start, body)?;
        self.close_loop()
    }

    /// Lower `for (var in seq) body` into a `while` over a hidden iterator
    /// variable, one per loop-nesting level.
    pub(super) fn lower_for(
        &mut self,
        at: StateId,
        mut past: Vec<Expr>,
        var: String,
        seq: Expr,
        body: Expr,
    ) -> Result<StateId> {
        let depth = self.loops.len() + 1;
        let iter_var = format!("_for_iter_{}", depth);

        past.push(Expr::assign(
            iter_var.clone(),
            Expr::call("iterator", vec![seq]),
        ));
        let cond = Expr::call("has_next", vec![Expr::sym(iter_var.clone())]);
        let mut body_exprs = vec![Expr::assign(
            var,
            Expr::call("next", vec![Expr::sym(iter_var)]),
        )];
        body_exprs.extend(flatten(body));

        self.lower_while(at, past, cond, body_exprs)
    }

    /// Compile a loop body starting in the open block `start`, cycle its
    /// tail back to the loop head, and patch trailing suspensions so they
    /// resume at the head.
    fn run_loop_body(&mut self, start: StateId, exprs: Vec<Expr>) -> Result<()> {
        let head = self
            .loops
            .last()
            .map(|frame| frame.head)
            .ok_or_else(|| anyhow!("internal error: loop body compiled without a frame"))?;
        let end = self.compile_seq(start, exprs.into(), Vec::new())?;
        if let Some(open) = end.open {
            let mut tail = end.past;
            if !tail.last().is_some_and(|e| e.is_exiting()) {
                tail.push(Expr::goto(head));
            }
            self.flush(open, tail)?;
        }
        // A suspension at the very end of the body resumes at the head,
        // starting the next iteration.
        self.patch_pending(head)
    }

    /// Allocate the loop's exit block and patch every break jump to it.
    fn close_loop(&mut self) -> Result<StateId> {
        let frame = self
            .loops
            .pop()
            .ok_or_else(|| anyhow!("internal error: loop frame missing at loop exit"))?;
        let exit = self.poke();
        for slot in frame.breaks {
            self.fill_slot(slot, exit)?;
        }
        Ok(exit)
    }
}
