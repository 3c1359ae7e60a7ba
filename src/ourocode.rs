//! Ourocode: a typed, block-structured IR that front ends for several
//! source languages lower into.
//!
//! A module goes through three stages:
//!
//! 1. built by a front end, read from text with [`parse_module`], or decoded
//!    with [`Module::from_bytes`]
//! 2. checked once by [`validate`]
//! 3. run by an [`Executor`], which refuses modules that fail validation
//!
//! ```
//! use ouro_core::ourocode::{Executor, IrValue};
//!
//! let mut executor = Executor::new();
//! executor
//!     .load_text(
//!         "@module demo 1.0.0 rust
//!          define @double(%x: i64) -> i64 {
//!          entry:
//!            %y = add i64 %x, %x
//!            ret %y
//!          }",
//!     )
//!     .unwrap();
//! let result = executor.execute("demo", "double", vec![IrValue::I64(21)]).unwrap();
//! assert_eq!(result, IrValue::I64(42));
//! ```

pub mod exec;
pub mod module;
pub mod text;
pub mod validate;

pub use exec::{ExecError, Executor, IrValue};
pub use module::{Block, Constant, Function, Instruction, Module, Operand, Type};
pub use text::{SyntaxError, parse_module};
pub use validate::{ValidationError, validate};
