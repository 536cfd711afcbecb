//! Volt Runtime
//!
//! Tree-walking interpreter for the Volt language: lexical environments
//! backed by a frame pool, a byte-addressable simulated memory arena, and
//! emulated MCU peripherals (UART, GPIO, timer). The compiler crate drives
//! this through [`Interpreter::run`]; hosts can rebind the UART and inspect
//! peripheral state through [`Peripherals`].

pub mod env;
pub mod interpreter;
pub mod memory;
pub mod peripherals;

pub use env::{Environment, Slot};
pub use interpreter::{Interpreter, RunOptions};
pub use memory::{Memory, MemoryFault};
pub use peripherals::{Peripherals, UartSink, intrinsic_arity};
