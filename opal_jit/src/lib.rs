//! Machine-code emission layer for the Opal runtime.
//!
//! RV64 code generation with a 128-bit permute extension:
//! - Instruction encoding and a label-resolving code buffer
//! - Constant materialization and addressing-mode macros
//! - Collector write-barrier fast paths and shared slow stubs
//! - Vector SHA-256/512 compression generators
//! - A reference simulator for testing emitted code off-target
#![deny(unsafe_op_in_unsafe_fn)]
pub mod backend;
pub mod gc;
pub mod intrinsics;
pub mod runtime;
pub mod sim;
