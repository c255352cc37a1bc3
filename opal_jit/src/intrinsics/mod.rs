//! Vector intrinsic generators.
//!
//! Hand-scheduled routines built on the 128-bit permute extension. Each
//! generator emits a complete callable routine into an [`crate::backend::Assembler`];
//! the round-constant tables the routines read live in [`tables`].

pub mod sha256;
pub mod sha512;
pub mod tables;

pub use sha256::emit_sha256_compress;
pub use sha512::emit_sha512_compress;
pub use tables::IntrinsicTables;
