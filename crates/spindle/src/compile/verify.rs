//! Structural checks on compiled output.
//!
//! Every compiled block list must satisfy:
//!
//! 1. every block ends in a terminator (`Return`, `Pause`, `Goto`, or an
//!    `If` both of whose arms exit — stub `mblock`s ending in `Goto`, or
//!    arms that return);
//! 2. block indices are dense, `1..=K` in emission order;
//! 3. every jump target lands in `1..=K` and is fully resolved;
//! 4. no `yield`/`break`/`next` survives anywhere in the output — including
//!    positions the compiler cannot split, such as call arguments, which
//!    would otherwise be silently miscompiled.
//!
//! Leaf loops (no suspension inside) are legal output and are walked like
//! any other expression.

use crate::ast::{Expr, MachineBlock, StateId, Target};
use anyhow::{bail, Result};

pub(super) fn check(blocks: &[MachineBlock]) -> Result<()> {
    let count = blocks.len() as u32;
    for (position, block) in blocks.iter().enumerate() {
        let expected = position as u32 + 1;
        if block.index.0 != expected {
            bail!(
                "block at position {} carries index {}",
                expected,
                block.index
            );
        }
        match block.exprs.last() {
            Some(last) if is_terminator(last) => {}
            Some(last) => bail!("block {} does not end in a terminator: {}", block.index, last),
            None => bail!("block {} is empty", block.index),
        }
        for expr in &block.exprs {
            check_expr(block.index, expr, count)?;
        }
    }
    Ok(())
}

fn is_terminator(expr: &Expr) -> bool {
    match expr {
        Expr::Return(_) | Expr::Pause { .. } | Expr::Goto { .. } => true,
        Expr::If {
            then,
            orelse: Some(orelse),
            ..
        } => then.is_exiting() && orelse.is_exiting(),
        _ => false,
    }
}

fn check_expr(block: StateId, expr: &Expr, count: u32) -> Result<()> {
    match expr {
        Expr::Yield(_) => bail!(
            "block {} contains an unlowered `yield`; a suspension can only appear \
             as a statement, not inside a call or other opaque expression",
            block
        ),
        Expr::Break => bail!("block {} contains an unlowered `break`", block),
        Expr::Next => bail!("block {} contains an unlowered `next`", block),
        Expr::Pause { target, .. } | Expr::Goto { target } => match target {
            Target::State(state) if state.0 >= 1 && state.0 <= count => {}
            Target::State(state) => bail!(
                "block {} jumps to {} outside 1..={}",
                block,
                state,
                count
            ),
            Target::Slot(slot) => {
                bail!("block {} holds an unresolved jump target {}", block, slot)
            }
        },
        _ => {}
    }
    for child in expr.children() {
        check_expr(block, child, count)?;
    }
    Ok(())
}
