//! Core compilation state: block index counter, patch table, loop stack,
//! pending suspension lists, and the emitted block sequence.
//!
//! ## Overview
//!
//! The compiler allocates block indices monotonically and emits blocks in
//! exactly allocation order, so indices are dense 1..K and a block's index
//! equals its position in the output. Forward references (a jump to a block
//! whose index is not yet known) go through the patch table: the jump holds
//! a [`SlotId`], and the slot is filled once the destination is allocated.
//! The driver resolves every slot to a concrete state before returning.
//!
//! ## The two patch channels
//!
//! - **Pending lists** (`pending_pauses`, `pending_gotos`): jumps whose
//!   destination is "whatever code comes next". A `pause` at the end of a
//!   block registers here; when the sequence compiler opens the block for
//!   the code that follows, it patches the whole list to that block. A loop
//!   translator instead patches the list to the loop head, which is how a
//!   trailing suspension inside a loop body resumes at the next iteration.
//! - **Loop frames** (`loops`): each `break` allocates a slot recorded on
//!   the innermost frame; the frame's slots are all patched to the loop's
//!   exit block when the translator finishes the loop.
//!
//! ## Invariants
//!
//! - `counter` is the index of the most recently allocated block; blocks are
//!   flushed in allocation order (enforced by [`Compiler::flush`]).
//! - Only the innermost loop frame receives `break`/`next`.
//! - Every slot is filled exactly once; an unfilled slot at the end of
//!   compilation is a hard error.

use crate::ast::{Expr, MachineBlock, SlotId, StateId, Target};
use anyhow::{bail, Result};

/// Record for the innermost surrounding loop: where `next` jumps back to,
/// and the break jumps awaiting the loop's exit block.
#[derive(Debug)]
pub(super) struct LoopFrame {
    /// Block index of the loop head; `next` jumps here directly.
    pub(super) head: StateId,

    /// Slots of every jump that must be patched to the loop exit. Holds the
    /// `break` jumps of this loop, plus the head's own exit jump for
    /// condition-tested loops.
    pub(super) breaks: Vec<SlotId>,
}

/// Mutable state for one compilation. Created by the driver, threaded
/// through every translator call, and consumed by [`Compiler::finish`].
pub(super) struct Compiler {
    /// Highest allocated block index. Starts at 1: the entry block is
    /// allocated before any expression is inspected.
    counter: u32,

    /// Patch table: slot → block index, filled as destinations materialize.
    slots: Vec<Option<StateId>>,

    /// Suspensions awaiting a resume state.
    pending_pauses: Vec<SlotId>,

    /// Jumps awaiting a destination (lowered conditional arms joining the
    /// code after the conditional).
    pending_gotos: Vec<SlotId>,

    /// Stack of surrounding loops, innermost last.
    pub(super) loops: Vec<LoopFrame>,

    /// Emitted blocks, appended left-to-right.
    pub(super) blocks: Vec<MachineBlock>,
}

impl Compiler {
    pub(super) fn new() -> Self {
        Self {
            counter: 1,
            slots: Vec::new(),
            pending_pauses: Vec::new(),
            pending_gotos: Vec::new(),
            loops: Vec::new(),
            blocks: Vec::new(),
        }
    }

    /// Current highest allocated block index.
    pub(super) fn peek(&self) -> StateId {
        StateId(self.counter)
    }

    /// Allocate the next block index.
    pub(super) fn poke(&mut self) -> StateId {
        self.counter += 1;
        StateId(self.counter)
    }

    /// Allocate an unfilled patch-table slot.
    pub(super) fn fresh_slot(&mut self) -> SlotId {
        let id = SlotId(self.slots.len() as u32);
        self.slots.push(None);
        id
    }

    /// Fill a slot with its destination block.
    pub(super) fn fill_slot(&mut self, slot: SlotId, state: StateId) -> Result<()> {
        let Some(entry) = self.slots.get_mut(slot.0 as usize) else {
            bail!("internal error: unknown patch slot {}", slot);
        };
        if let Some(prior) = *entry {
            bail!(
                "internal error: jump target {} patched twice ({} then {})",
                slot,
                prior,
                state
            );
        }
        *entry = Some(state);
        Ok(())
    }

    /// Register a suspension whose resume state is not yet known.
    pub(super) fn push_pause(&mut self, slot: SlotId) {
        self.pending_pauses.push(slot);
    }

    /// Register a jump whose destination is not yet known.
    pub(super) fn push_goto(&mut self, slot: SlotId) {
        self.pending_gotos.push(slot);
    }

    /// Patch every pending pause and goto to `state`, then clear both lists.
    pub(super) fn patch_pending(&mut self, state: StateId) -> Result<()> {
        for slot in std::mem::take(&mut self.pending_pauses) {
            self.fill_slot(slot, state)?;
        }
        for slot in std::mem::take(&mut self.pending_gotos) {
            self.fill_slot(slot, state)?;
        }
        Ok(())
    }

    pub(super) fn has_pending(&self) -> bool {
        !self.pending_pauses.is_empty() || !self.pending_gotos.is_empty()
    }

    /// The innermost loop frame, or an error naming the loop-control
    /// construct found outside any loop.
    pub(super) fn innermost_loop(&mut self, construct: &str) -> Result<&mut LoopFrame> {
        match self.loops.last_mut() {
            Some(frame) => Ok(frame),
            None => bail!("`{}` outside of a loop", construct),
        }
    }

    /// Emit a block at `index`. Blocks must be emitted in allocation order;
    /// anything else means a translator got its bookkeeping wrong.
    pub(super) fn flush(&mut self, index: StateId, exprs: Vec<Expr>) -> Result<()> {
        let expected = StateId(self.blocks.len() as u32 + 1);
        if index != expected {
            bail!(
                "internal error: block {} emitted out of order (expected {})",
                index,
                expected
            );
        }
        self.blocks.push(MachineBlock { index, exprs });
        Ok(())
    }

    /// Finish compilation: check that no patches are outstanding and rewrite
    /// every slot target to its concrete block index.
    pub(super) fn finish(mut self) -> Result<Vec<MachineBlock>> {
        if self.has_pending() {
            bail!(
                "internal error: compilation finished with {} unpatched pause(s) and {} unpatched goto(s)",
                self.pending_pauses.len(),
                self.pending_gotos.len()
            );
        }
        if !self.loops.is_empty() {
            bail!("internal error: loop frame left open at end of compilation");
        }
        let slots = self.slots;
        for block in &mut self.blocks {
            for expr in &mut block.exprs {
                resolve_targets(expr, &slots)?;
            }
        }
        Ok(self.blocks)
    }
}

/// Rewrite every `Target::Slot` beneath `expr` to the block index its slot
/// was patched with.
fn resolve_targets(expr: &mut Expr, slots: &[Option<StateId>]) -> Result<()> {
    let resolve = |target: &mut Target| -> Result<()> {
        if let Target::Slot(slot) = *target {
            match slots.get(slot.0 as usize).copied().flatten() {
                Some(state) => *target = Target::State(state),
                None => bail!("internal error: unpatched jump target {}", slot),
            }
        }
        Ok(())
    };
    match expr {
        Expr::Pause { target, value } => {
            resolve(target)?;
            if let Some(value) = value {
                resolve_targets(value, slots)?;
            }
        }
        Expr::Goto { target } => resolve(target)?,
        Expr::If { cond, then, orelse } => {
            resolve_targets(cond, slots)?;
            resolve_targets(then, slots)?;
            if let Some(orelse) = orelse {
                resolve_targets(orelse, slots)?;
            }
        }
        Expr::Block(exprs) | Expr::MBlock(exprs) => {
            for e in exprs {
                resolve_targets(e, slots)?;
            }
        }
        Expr::Call { head, args } => {
            resolve_targets(head, slots)?;
            for arg in args {
                resolve_targets(arg, slots)?;
            }
        }
        Expr::Repeat { body } => resolve_targets(body, slots)?,
        Expr::While { cond, body } => {
            resolve_targets(cond, slots)?;
            resolve_targets(body, slots)?;
        }
        Expr::For { seq, body, .. } => {
            resolve_targets(seq, slots)?;
            resolve_targets(body, slots)?;
        }
        Expr::Return(Some(value)) | Expr::Yield(Some(value)) => resolve_targets(value, slots)?,
        Expr::Lit(_) | Expr::Sym(_) | Expr::Break | Expr::Next | Expr::Return(None)
        | Expr::Yield(None) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    #[test]
    fn counter_starts_at_one_and_pokes_monotonically() {
        let mut c = Compiler::new();
        assert_eq!(c.peek(), StateId(1));
        assert_eq!(c.poke(), StateId(2));
        assert_eq!(c.poke(), StateId(3));
        assert_eq!(c.peek(), StateId(3));
    }

    #[test]
    fn slots_fill_once() {
        let mut c = Compiler::new();
        let s = c.fresh_slot();
        c.fill_slot(s, StateId(4)).unwrap();
        let err = c.fill_slot(s, StateId(5)).unwrap_err();
        assert!(err.to_string().contains("patched twice"));
    }

    #[test]
    fn patch_pending_drains_both_lists() {
        let mut c = Compiler::new();
        let p = c.fresh_slot();
        let g = c.fresh_slot();
        c.push_pause(p);
        c.push_goto(g);
        assert!(c.has_pending());
        c.patch_pending(StateId(7)).unwrap();
        assert!(!c.has_pending());

        // Both slots resolved through finish().
        c.flush(
            StateId(1),
            vec![
                Expr::Pause {
                    target: Target::Slot(p),
                    value: None,
                },
                Expr::Goto {
                    target: Target::Slot(g),
                },
            ],
        )
        .unwrap();
        let blocks = c.finish().unwrap();
        assert_eq!(
            blocks[0].exprs[0],
            Expr::Pause {
                target: Target::State(StateId(7)),
                value: None,
            }
        );
        assert_eq!(blocks[0].exprs[1], Expr::goto(StateId(7)));
    }

    #[test]
    fn flush_enforces_emission_order() {
        let mut c = Compiler::new();
        let err = c.flush(StateId(2), vec![]).unwrap_err();
        assert!(err.to_string().contains("out of order"));
        c.flush(StateId(1), vec![]).unwrap();
        c.flush(StateId(2), vec![]).unwrap();
    }

    #[test]
    fn finish_rejects_outstanding_pending() {
        let mut c = Compiler::new();
        let p = c.fresh_slot();
        c.push_pause(p);
        c.flush(
            StateId(1),
            vec![Expr::Pause {
                target: Target::Slot(p),
                value: None,
            }],
        )
        .unwrap();
        let err = c.finish().unwrap_err();
        assert!(err.to_string().contains("unpatched"));
    }

    #[test]
    fn finish_rejects_unfilled_slot_in_output() {
        let mut c = Compiler::new();
        let s = c.fresh_slot();
        // Slot referenced by an emitted jump but never registered pending
        // and never filled.
        c.flush(
            StateId(1),
            vec![Expr::Goto {
                target: Target::Slot(s),
            }],
        )
        .unwrap();
        let err = c.finish().unwrap_err();
        assert!(err.to_string().contains("unpatched jump target"));
    }

    #[test]
    fn resolve_descends_into_if_arms() {
        let mut c = Compiler::new();
        let s = c.fresh_slot();
        c.fill_slot(s, StateId(9)).unwrap();
        c.flush(
            StateId(1),
            vec![Expr::If {
                cond: Box::new(Expr::sym("c")),
                then: Box::new(Expr::MBlock(vec![Expr::Goto {
                    target: Target::Slot(s),
                }])),
                orelse: Some(Box::new(Expr::MBlock(vec![Expr::goto(StateId(1))]))),
            }],
        )
        .unwrap();
        let blocks = c.finish().unwrap();
        let Expr::If { then, .. } = &blocks[0].exprs[0] else {
            panic!("expected if");
        };
        assert_eq!(**then, Expr::MBlock(vec![Expr::goto(StateId(9))]));
    }

    #[test]
    fn innermost_loop_errors_outside_loops() {
        let mut c = Compiler::new();
        let err = c.innermost_loop("break").unwrap_err();
        assert!(err.to_string().contains("`break` outside of a loop"));
    }
}
