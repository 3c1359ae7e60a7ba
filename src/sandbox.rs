//! Per-call execution budget.
//!
//! A [`Budget`] is created at the start of every top-level interpreter `eval`
//! and every Ourocode `execute`, and is charged at each evaluation step. Once a
//! ceiling is crossed the budget stays exhausted: every later charge returns
//! the same [`LimitExceeded`], so nothing below the failing step can resume.

use crate::MAX_EVAL_DEPTH;
use crate::config::Limits;
use std::time::Instant;
use thiserror::Error;

/// Which ceiling was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LimitExceeded {
    #[error("instruction limit exceeded (max: {limit})")]
    Instructions { limit: u64 },
    #[error("recursion depth limit exceeded (max: {limit})")]
    Depth { limit: usize },
    #[error("time limit exceeded (max: {limit_ms} ms)")]
    Time { limit_ms: u64 },
}

/// Only look at the clock every this many steps.
const CLOCK_INTERVAL: u64 = 64;

#[derive(Debug)]
pub struct Budget {
    limits: Limits,
    instructions: u64,
    depth: usize,
    started: Instant,
    exhausted: Option<LimitExceeded>,
}

impl Budget {
    /// A fresh budget. A `max_depth` above [`MAX_EVAL_DEPTH`] is lowered to it.
    pub fn new(limits: Limits) -> Self {
        Budget {
            limits: limits.with_max_depth(limits.max_depth.min(MAX_EVAL_DEPTH)),
            instructions: 0,
            depth: 0,
            started: Instant::now(),
            exhausted: None,
        }
    }

    /// Charge one step.
    pub fn tick(&mut self) -> Result<(), LimitExceeded> {
        if let Some(exceeded) = self.exhausted {
            return Err(exceeded);
        }
        self.instructions += 1;
        if self.instructions > self.limits.max_instructions {
            return self.trip(LimitExceeded::Instructions {
                limit: self.limits.max_instructions,
            });
        }
        if self.instructions % CLOCK_INTERVAL == 0 {
            self.check_clock()?;
        }
        Ok(())
    }

    /// Enter one level of nesting. Pair with [`Budget::leave`].
    pub fn enter(&mut self) -> Result<(), LimitExceeded> {
        if let Some(exceeded) = self.exhausted {
            return Err(exceeded);
        }
        if self.depth >= self.limits.max_depth {
            return self.trip(LimitExceeded::Depth {
                limit: self.limits.max_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn check_clock(&mut self) -> Result<(), LimitExceeded> {
        if self.started.elapsed() > self.limits.timeout() {
            return self.trip(LimitExceeded::Time {
                limit_ms: self.limits.timeout_ms,
            });
        }
        Ok(())
    }

    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    fn trip(&mut self, exceeded: LimitExceeded) -> Result<(), LimitExceeded> {
        tracing::warn!(%exceeded, instructions = self.instructions, "execution budget exhausted");
        self.exhausted = Some(exceeded);
        Err(exceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_ceiling_is_sticky() {
        let mut budget = Budget::new(Limits::default().with_max_instructions(3));
        for _ in 0..3 {
            assert!(budget.tick().is_ok());
        }
        let err = budget.tick();
        assert_eq!(err, Err(LimitExceeded::Instructions { limit: 3 }));
        // Depth is fine, but the budget is already spent.
        assert_eq!(budget.enter(), Err(LimitExceeded::Instructions { limit: 3 }));
    }

    #[test]
    fn test_depth_ceiling() {
        let mut budget = Budget::new(Limits::default().with_max_depth(2));
        assert!(budget.enter().is_ok());
        assert!(budget.enter().is_ok());
        assert_eq!(budget.enter(), Err(LimitExceeded::Depth { limit: 2 }));
        assert_eq!(budget.depth(), 2);
    }

    #[test]
    fn test_depth_is_clamped_to_the_hard_ceiling() {
        let limits = Limits {
            max_depth: 1_000_000,
            ..Limits::default()
        };
        let mut budget = Budget::new(limits);
        for _ in 0..MAX_EVAL_DEPTH {
            assert!(budget.enter().is_ok());
        }
        assert_eq!(
            budget.enter(),
            Err(LimitExceeded::Depth {
                limit: MAX_EVAL_DEPTH
            })
        );
    }

    #[test]
    fn test_leave_restores_depth() {
        let mut budget = Budget::new(Limits::default().with_max_depth(1));
        assert!(budget.enter().is_ok());
        budget.leave();
        assert!(budget.enter().is_ok());
    }
}
