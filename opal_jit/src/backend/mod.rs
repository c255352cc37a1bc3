//! Code generation backends.
//!
//! This module provides architecture-specific code emission:
//! - `riscv`: RV64 with the 128-bit permute extension

pub mod riscv;

pub use riscv::*;
