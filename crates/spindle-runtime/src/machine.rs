//! The machine: program counter, done flag, and the stepping loop.

use crate::{MachineError, Step};
use spindle::ast::{Expr, MachineBlock, StateId, Target};

/// Evaluates expressions on behalf of the driver.
///
/// Implementations own the single flat frame of user variables. The driver
/// calls `eval` for every expression that is not control flow, for pause
/// and return values, and for the condition of a terminal `if`.
pub trait Evaluate {
    type Value;
    type Error;

    fn eval(&mut self, expr: &Expr) -> Result<Self::Value, Self::Error>;

    fn is_truthy(&mut self, value: &Self::Value) -> Result<bool, Self::Error>;
}

/// A compiled generator mid-flight.
///
/// Execution starts at block 1. Each [`Machine::resume`] call runs blocks
/// until the machine suspends or finishes. The machine is one-shot: once
/// done, further resumption reports [`MachineError::Exhausted`].
#[derive(Debug, Clone)]
pub struct Machine {
    blocks: Vec<MachineBlock>,
    pc: u32,
    done: bool,
}

/// How a block handed control back to the stepping loop.
enum Exit<V> {
    Jump(StateId),
    Yield(StateId, Option<V>),
    Finish(Option<V>),
}

impl Machine {
    pub fn new(blocks: Vec<MachineBlock>) -> Self {
        let done = blocks.is_empty();
        Self {
            blocks,
            pc: 1,
            done,
        }
    }

    /// The state the machine will resume at next.
    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Run until the next suspension or the end of the generator.
    pub fn resume<E: Evaluate>(
        &mut self,
        evaluator: &mut E,
    ) -> Result<Step<E::Value>, MachineError<E::Error>> {
        if self.done {
            return Err(MachineError::Exhausted);
        }
        loop {
            let index = self.pc;
            let block = index
                .checked_sub(1)
                .and_then(|i| self.blocks.get(i as usize));
            let exit = match block {
                Some(block) => exec(&block.exprs, evaluator),
                None => Err(MachineError::MissingBlock(index)),
            };
            match exit {
                Ok(Exit::Jump(state)) => self.pc = state.0,
                Ok(Exit::Yield(state, value)) => {
                    self.pc = state.0;
                    return Ok(Step::Yielded(value));
                }
                Ok(Exit::Finish(value)) => {
                    self.done = true;
                    return Ok(Step::Done(value));
                }
                Err(error) => {
                    // Any fault finishes the machine; the generator cannot
                    // be resumed into a half-executed block.
                    self.done = true;
                    return Err(error);
                }
            }
        }
    }

    /// Drive the machine to completion, collecting every yielded value and
    /// the terminal value. Diverges on a generator that never finishes.
    pub fn drain<E: Evaluate>(
        &mut self,
        evaluator: &mut E,
    ) -> Result<(Vec<Option<E::Value>>, Option<E::Value>), MachineError<E::Error>> {
        let mut yielded = Vec::new();
        loop {
            match self.resume(evaluator)? {
                Step::Yielded(value) => yielded.push(value),
                Step::Done(value) => return Ok((yielded, value)),
            }
        }
    }
}

/// Evaluate one block's expressions in order until control leaves it.
fn exec<E: Evaluate>(
    exprs: &[Expr],
    evaluator: &mut E,
) -> Result<Exit<E::Value>, MachineError<E::Error>> {
    for expr in exprs {
        match expr {
            Expr::Goto { target } => return Ok(Exit::Jump(resolve(target)?)),
            Expr::Pause { target, value } => {
                let state = resolve(target)?;
                let value = eval_optional(value.as_deref(), evaluator)?;
                return Ok(Exit::Yield(state, value));
            }
            Expr::Return(value) => {
                let value = eval_optional(value.as_deref(), evaluator)?;
                return Ok(Exit::Finish(value));
            }
            Expr::If {
                cond,
                then,
                orelse: Some(orelse),
            } if expr.is_exiting() => {
                let value = evaluator.eval(cond).map_err(MachineError::Eval)?;
                let arm = if evaluator.is_truthy(&value).map_err(MachineError::Eval)? {
                    then.as_ref()
                } else {
                    orelse.as_ref()
                };
                let arm_exprs = match arm {
                    Expr::MBlock(exprs) => exprs.as_slice(),
                    other => std::slice::from_ref(other),
                };
                return exec(arm_exprs, evaluator);
            }
            // Anything else is plain user code; leaf conditionals and loops
            // included.
            other => {
                evaluator.eval(other).map_err(MachineError::Eval)?;
            }
        }
    }
    Err(MachineError::NoTerminator)
}

fn eval_optional<E: Evaluate>(
    expr: Option<&Expr>,
    evaluator: &mut E,
) -> Result<Option<E::Value>, MachineError<E::Error>> {
    match expr {
        Some(expr) => evaluator.eval(expr).map(Some).map_err(MachineError::Eval),
        None => Ok(None),
    }
}

fn resolve<E>(target: &Target) -> Result<StateId, MachineError<E>> {
    match target {
        Target::State(state) => Ok(*state),
        Target::Slot(_) => Err(MachineError::UnresolvedTarget),
    }
}


// ── Bounded model-checking harnesses ─────────────────────────────────────────
// Verified with Kani. Run with: cargo kani -p spindle-runtime

#[cfg(kani)]
mod proofs {
    use super::*;

    struct NoEval;

    impl Evaluate for NoEval {
        type Value = ();
        type Error = ();

        fn eval(&mut self, _: &Expr) -> Result<(), ()> {
            Ok(())
        }

        fn is_truthy(&mut self, _: &()) -> Result<bool, ()> {
            Ok(false)
        }
    }

    /// Proof: an empty machine is born done and resume never panics, it
    /// reports Exhausted.
    #[kani::proof]
    #[kani::unwind(2)]
    fn empty_machine_rejects_resume() {
        let mut machine = Machine::new(Vec::new());
        let mut evaluator = NoEval;
        kani::assert(machine.is_done(), "empty machine starts done");
        let result = machine.resume(&mut evaluator);
        kani::assert(
            matches!(result, Err(MachineError::Exhausted)),
            "resuming a done machine reports Exhausted",
        );
    }

    /// Proof: a jump outside the block list faults and finishes the machine
    /// for any target value.
    #[kani::proof]
    #[kani::unwind(4)]
    fn out_of_range_jump_faults_and_finishes() {
        let target: u32 = kani::any();
        kani::assume(target != 1);
        let blocks = vec![MachineBlock {
            index: StateId(1),
            exprs: vec![Expr::goto(StateId(target))],
        }];
        let mut machine = Machine::new(blocks);
        let mut evaluator = NoEval;
        let result = machine.resume(&mut evaluator);
        kani::assert(
            matches!(result, Err(MachineError::MissingBlock(_))),
            "jump outside the machine reports the missing block",
        );
        kani::assert(machine.is_done(), "a fault finishes the machine");
    }

    /// Proof: a returning machine finishes exactly once.
    #[kani::proof]
    #[kani::unwind(3)]
    fn returning_machine_is_one_shot() {
        let blocks = vec![MachineBlock {
            index: StateId(1),
            exprs: vec![Expr::Return(None)],
        }];
        let mut machine = Machine::new(blocks);
        let mut evaluator = NoEval;
        let first = machine.resume(&mut evaluator);
        kani::assert(
            matches!(first, Ok(Step::Done(None))),
            "first resume finishes invisibly",
        );
        let second = machine.resume(&mut evaluator);
        kani::assert(
            matches!(second, Err(MachineError::Exhausted)),
            "second resume reports Exhausted",
        );
    }
}
