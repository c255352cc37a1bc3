//! Runtime services for generated code.

pub mod stub_cache;

pub use stub_cache::{StubCache, StubId};
