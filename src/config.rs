//! Execution ceilings shared by the interpreter and the Ourocode executor.

use crate::MAX_EVAL_DEPTH;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading a [`Limits`] document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid limits document: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("limit `{0}` must be greater than zero")]
    Zero(&'static str),
    #[error("limit `max_depth` is {0}, above the ceiling of {ceiling}", ceiling = MAX_EVAL_DEPTH)]
    DepthAboveCeiling(usize),
}

/// Per-call execution ceilings.
///
/// Loaded from TOML like:
///
/// ```toml
/// max_instructions = 50000
/// max_depth = 32
/// timeout_ms = 250
/// ```
///
/// Missing keys fall back to [`Limits::default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Evaluation steps (interpreter) or executed instructions (IR) per top-level call
    pub max_instructions: u64,
    /// Non-tail evaluation nesting (interpreter) or call depth (IR), at most
    /// [`MAX_EVAL_DEPTH`]
    pub max_depth: usize,
    /// Wall-clock budget per top-level call, in milliseconds
    pub timeout_ms: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_instructions: 1_000_000,
            max_depth: MAX_EVAL_DEPTH,
            timeout_ms: 5_000,
        }
    }
}

impl Limits {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let limits: Limits = toml::from_str(input)?;
        limits.check()?;
        Ok(limits)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_max_instructions(mut self, max_instructions: u64) -> Self {
        self.max_instructions = max_instructions;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.max_instructions == 0 {
            return Err(ConfigError::Zero("max_instructions"));
        }
        if self.max_depth == 0 {
            return Err(ConfigError::Zero("max_depth"));
        }
        if self.max_depth > MAX_EVAL_DEPTH {
            return Err(ConfigError::DepthAboveCeiling(self.max_depth));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Zero("timeout_ms"));
        }
        Ok(())
    }
}
