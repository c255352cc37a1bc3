//! Write-barrier support structures.
//!
//! The generated barriers interact with two structures owned by this module:
//! the card table that the post-barrier dirties, and the per-thread log
//! buffers that both barriers append to. Everything here is host-side; the
//! emission layer only consumes the layout descriptors.

pub mod card_table;
pub mod queue;
