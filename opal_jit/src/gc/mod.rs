//! Collector barrier code generation.
//!
//! Emits the SATB pre-barrier and card-marking post-barrier fast paths
//! around reference stores, plus the shared out-of-line slow stubs the fast
//! paths call when a log buffer runs dry. The collector-side structures the
//! generated code talks to live in `opal_gc`; this module only needs their
//! layout descriptors.

pub mod stubs;
pub mod write_barrier;

pub use write_barrier::{AccessFlags, BarrierRuntime, BarrierSet, BarrierStubs, NarrowRefLayout};
