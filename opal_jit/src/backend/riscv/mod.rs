//! RV64 backend modules.
pub mod assembler;
pub mod encoder;
pub mod memory;
pub mod registers;
pub mod simd;

pub use assembler::{Assembler, Label, MemOrder, RegisterOrConstant};
pub use memory::{CodeBlob, ExecutableBuffer};
pub use registers::{CallingConvention, Gpr, GprSet, Vr, VrSet};
