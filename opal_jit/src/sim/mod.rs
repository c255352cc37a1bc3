//! Reference simulator for the emitted instruction subset.
//!
//! The emitters in this crate target an RV64 core with the 128-bit permute
//! extension; no host we run on executes that encoding. This module closes
//! the loop: a small interpreter over guest memory that executes exactly the
//! subset the assembler can produce, with the vector semantics written down
//! in `backend::riscv::simd`.
//!
//! The simulator is a test oracle, not a performance vehicle. Decode builds
//! a tagged [`decode::Instr`] per word and execution is one dense match.
//! Calls out of generated code (barrier refills, bulk-array runtime entries)
//! are intercepted by guest address: a host closure registered at that
//! address runs against the machine state and execution resumes at the
//! return address, exactly like a trampoline would.

pub mod decode;
pub mod machine;

pub use decode::Instr;
pub use machine::{GuestMemory, HostCall, Machine, SimError, Simulator, RETURN_TO_HOST};
