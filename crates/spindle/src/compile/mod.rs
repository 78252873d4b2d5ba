//! # Generator body compilation
//!
//! Turns the body of a generator function into a flat, dense list of
//! numbered basic blocks a runtime driver can step through, suspending and
//! resuming at recorded states.
//!
//! ## Pipeline overview
//!
//! ```text
//! Expr (user body)
//!      │
//!      ├─ reject_nested_function_yield()   nested closures over yield → error
//!      │
//!      └─ Compiler::compile_seq()          past/cursor/future walk
//!           ├── leaf cursor               → stays in the block in progress
//!           ├── yield / break / next      → Pause/Goto ends the block
//!           ├── if  (lower_if)            → terminator + stub arms + branch blocks
//!           └── repeat/while/for          → head, body blocks, exit block
//!                ─► Vec<MachineBlock>, dense, targets still slot-valued
//!      │
//!      ├─ Compiler::finish()              patch-table resolution, leak checks
//!      ├─ enforce_terminators()           every block ends in return/pause/goto
//!      └─ verify::check()                 structural output invariants
//! ```
//!
//! ## Architecture
//!
//! | Module       | Responsibility                                         |
//! |--------------|--------------------------------------------------------|
//! | `core`       | Compilation state: index counter, patch table, loop    |
//! |              | stack, pending lists, emitted blocks                   |
//! | `sequence`   | Splitting a sequence into blocks at suspension points  |
//! | `constructs` | `if`/`repeat`/`while`/`for` lowering                   |
//! | `verify`     | Structural checks on the finished block list           |

mod constructs;
mod core;
mod sequence;
mod verify;

use std::collections::VecDeque;

use self::core::Compiler;
use crate::ast::{Expr, MachineBlock, StateId};
use anyhow::{bail, Context, Result};

/// Compilation configuration.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Run the structural output checks after compilation. On by default;
    /// callers compiling trusted input in bulk can switch it off.
    pub verify: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { verify: true }
    }
}

/// Compile a generator function body into its basic-block machine.
///
/// The result is a dense list of blocks indexed 1..K. Every block ends in a
/// terminator; execution starts at block 1. The caller owns the surface
/// syntax: the body arrives as an already-built [`Expr`].
///
/// # Example
/// ```
/// use spindle::{compile, CompileOptions, Expr};
///
/// let body = Expr::repeat(Expr::yield_(Expr::lit(1)));
/// let blocks = compile(body, &CompileOptions::default()).unwrap();
/// assert_eq!(blocks.len(), 3);
/// assert_eq!(blocks[1].to_string(), "B2: pause(2, 1)");
/// ```
pub fn compile(body: Expr, options: &CompileOptions) -> Result<Vec<MachineBlock>> {
    reject_nested_function_yield(&body)?;

    let mut compiler = Compiler::new();
    let exprs: VecDeque<Expr> = sequence::flatten(body).into();
    let end = compiler
        .compile_seq(StateId(1), exprs, Vec::new())
        .context("failed to compile generator body")?;

    if let Some(open) = end.open {
        compiler.flush(open, end.past)?;
    }
    // A suspension with nothing after it resumes into the final,
    // invisibly-returning block.
    if compiler.has_pending() {
        let state = compiler.poke();
        compiler.patch_pending(state)?;
        compiler.flush(state, Vec::new())?;
    }

    let mut blocks = compiler.finish()?;
    enforce_terminators(&mut blocks);
    if options.verify {
        verify::check(&blocks).context("compiled output failed verification")?;
    }
    Ok(blocks)
}

/// Ensure every block ends in a terminator. A value-producing trailing
/// expression becomes the function's return value; loops and empty blocks
/// return invisibly.
fn enforce_terminators(blocks: &mut [MachineBlock]) {
    enum Fix {
        Keep,
        Invisible,
        WrapLast,
    }
    for block in blocks.iter_mut() {
        let fix = match block.exprs.last() {
            None => Fix::Invisible,
            Some(last) if last.is_exiting() => Fix::Keep,
            Some(Expr::Repeat { .. } | Expr::While { .. } | Expr::For { .. }) => Fix::Invisible,
            Some(_) => Fix::WrapLast,
        };
        match fix {
            Fix::Keep => {}
            Fix::Invisible => block.exprs.push(Expr::Return(None)),
            Fix::WrapLast => {
                if let Some(last) = block.exprs.pop() {
                    block.exprs.push(Expr::Return(Some(Box::new(last))));
                }
            }
        }
    }
}

/// Reject `yield` captured by a nested function definition. The suspension
/// would belong to the inner function's frame, which this compiler does not
/// model; compiling the outer function while leaving the inner yields in
/// place would miscompile silently.
fn reject_nested_function_yield(expr: &Expr) -> Result<()> {
    if let Expr::Call { head, args } = expr {
        if matches!(head.as_ref(), Expr::Sym(name) if name == "function") {
            if args.iter().any(|arg| contains_yield(arg)) {
                bail!("`yield` inside a nested function definition is not supported");
            }
            // The closure is otherwise opaque; nothing beneath it is ours.
            return Ok(());
        }
    }
    for child in expr.children() {
        reject_nested_function_yield(child)?;
    }
    Ok(())
}

fn contains_yield(expr: &Expr) -> bool {
    matches!(expr, Expr::Yield(_)) || expr.children().into_iter().any(contains_yield)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Value;

    fn rendered(body: Expr) -> Vec<String> {
        compile(body, &CompileOptions::default())
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn empty_body_returns_invisibly() {
        assert_eq!(rendered(Expr::block(vec![])), ["B1: return(invisible)"]);
    }

    #[test]
    fn trailing_expression_becomes_the_return_value() {
        let body = Expr::block(vec![Expr::lit(1), Expr::lit(2)]);
        assert_eq!(rendered(body), ["B1: 1; return(2)"]);
    }

    #[test]
    fn trailing_loop_returns_invisibly() {
        let body = Expr::repeat(Expr::lit(Value::Null));
        assert_eq!(rendered(body), ["B1: repeat NULL; return(invisible)"]);
    }

    #[test]
    fn explicit_return_is_kept() {
        let body = Expr::block(vec![Expr::lit(1), Expr::ret(Expr::lit(9))]);
        assert_eq!(rendered(body), ["B1: 1; return(9)"]);
    }

    #[test]
    fn machine_forms_pass_through_unchanged() {
        // A body already consisting of emitted forms compiles to a single
        // block preserving them.
        let body = Expr::block(vec![
            Expr::lit(1),
            Expr::pause(StateId(1), Expr::lit(2)),
        ]);
        assert_eq!(rendered(body), ["B1: 1; pause(1, 2)"]);
    }

    #[test]
    fn nested_function_with_yield_is_rejected() {
        let body = Expr::block(vec![
            Expr::assign(
                "f",
                Expr::call("function", vec![Expr::yield_(Expr::lit(1))]),
            ),
            Expr::yield_(Expr::lit(2)),
        ]);
        let err = compile(body, &CompileOptions::default()).unwrap_err();
        assert!(err
            .to_string()
            .contains("nested function definition"));
    }

    #[test]
    fn nested_function_without_yield_is_opaque() {
        let body = Expr::block(vec![
            Expr::assign("f", Expr::call("function", vec![Expr::sym("x")])),
            Expr::yield_(Expr::lit(1)),
        ]);
        assert_eq!(
            rendered(body),
            ["B1: f <- function(x); pause(2, 1)", "B2: return(invisible)"]
        );
    }

    #[test]
    fn yield_in_call_arguments_fails_verification() {
        let body = Expr::call("f", vec![Expr::yield_(Expr::lit(1))]);
        let err = compile(body, &CompileOptions::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("unlowered `yield`"));
    }

    #[test]
    fn verification_can_be_disabled() {
        let body = Expr::call("f", vec![Expr::yield_(Expr::lit(1))]);
        let options = CompileOptions { verify: false };
        // Without verification the malformed body compiles to a block that
        // still carries the embedded yield.
        let blocks = compile(body, &options).unwrap();
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn loop_with_break_but_no_yield_is_still_lowered() {
        // Loop control alone forces lowering; a suspension after the loop
        // is reachable through the break.
        let body = Expr::block(vec![
            Expr::repeat(Expr::if_else(Expr::lit(true), Expr::Break, Expr::Next)),
            Expr::yield_(Expr::lit(9)),
        ]);
        assert_eq!(
            rendered(body),
            [
                "B1: goto(2)",
                "B2: if (TRUE) mblock(goto(3)) else mblock(goto(2))",
                "B3: pause(4, 9)",
                "B4: return(invisible)"
            ]
        );
    }
}
