//! Lazy, shared cache of generated runtime stubs.
//!
//! Stubs are emitted once per process configuration and shared across every
//! compilation thread. Lookup is lock-free on the hit path; a miss emits the
//! routine outside any map lock, so two threads racing on the same cold stub
//! may both emit and one copy wins.

use std::io;
use std::sync::Arc;

use dashmap::DashMap;

use crate::backend::riscv::assembler::Assembler;
use crate::backend::riscv::memory::CodeBlob;
use crate::gc::{BarrierSet, BarrierStubs};
use crate::intrinsics::{emit_sha256_compress, emit_sha512_compress, IntrinsicTables};

/// Identity of a cached stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StubId {
    /// SHA-256 block compression.
    Sha256Compress {
        /// Loop over consecutive blocks instead of compressing one.
        multi_block: bool,
    },
    /// SHA-512 block compression.
    Sha512Compress {
        /// Loop over consecutive blocks instead of compressing one.
        multi_block: bool,
    },
    /// SATB pre-barrier slow path.
    PreBarrierSlow,
    /// Card-marking post-barrier slow path.
    PostBarrierSlow,
}

impl StubId {
    fn name(self) -> &'static str {
        match self {
            StubId::Sha256Compress { multi_block: false } => "sha256_compress",
            StubId::Sha256Compress { multi_block: true } => "sha256_compress_mb",
            StubId::Sha512Compress { multi_block: false } => "sha512_compress",
            StubId::Sha512Compress { multi_block: true } => "sha512_compress_mb",
            StubId::PreBarrierSlow => "pre_barrier_slow",
            StubId::PostBarrierSlow => "post_barrier_slow",
        }
    }
}

/// One emitted stub: the blob and the routine's entry offset within it.
struct CachedStub {
    blob: CodeBlob,
    entry: usize,
}

/// Process-wide stub cache for one barrier and table configuration.
pub struct StubCache {
    barriers: BarrierSet,
    tables: IntrinsicTables,
    stubs: DashMap<StubId, Arc<CachedStub>>,
}

impl StubCache {
    /// Creates an empty cache for the given configuration.
    pub fn new(barriers: BarrierSet, tables: IntrinsicTables) -> Self {
        StubCache { barriers, tables, stubs: DashMap::new() }
    }

    /// The barrier configuration stubs are generated against.
    pub fn barriers(&self) -> &BarrierSet {
        &self.barriers
    }

    /// Number of stubs generated so far.
    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    /// Whether no stub has been generated yet.
    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    /// Entry address of `id`, generating the stub on first use.
    pub fn entry(&self, id: StubId) -> io::Result<u64> {
        let stub = self.get_or_emit(id)?;
        Ok(stub.blob.entry(stub.entry) as u64)
    }

    /// Both barrier slow-path entries, for wiring into inline emitters.
    pub fn barrier_stubs(&self) -> io::Result<BarrierStubs> {
        Ok(BarrierStubs {
            pre_slow: self.entry(StubId::PreBarrierSlow)?,
            post_slow: self.entry(StubId::PostBarrierSlow)?,
        })
    }

    fn get_or_emit(&self, id: StubId) -> io::Result<Arc<CachedStub>> {
        if let Some(stub) = self.stubs.get(&id) {
            return Ok(stub.clone());
        }
        let stub = Arc::new(self.emit(id)?);
        let entry = self.stubs.entry(id).or_insert(stub);
        Ok(Arc::clone(&entry))
    }

    fn emit(&self, id: StubId) -> io::Result<CachedStub> {
        let mut asm = Assembler::new();
        let entry = match id {
            StubId::Sha256Compress { multi_block } => {
                emit_sha256_compress(&mut asm, &self.tables, multi_block)
            }
            StubId::Sha512Compress { multi_block } => {
                emit_sha512_compress(&mut asm, &self.tables, multi_block)
            }
            StubId::PreBarrierSlow => self.barriers.emit_pre_barrier_slow_stub(&mut asm),
            StubId::PostBarrierSlow => self.barriers.emit_post_barrier_slow_stub(&mut asm),
        };
        let blob = CodeBlob::new(id.name(), &asm.finish())?;
        Ok(CachedStub { blob, entry })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::BarrierRuntime;
    use opal_gc::{CardTableLayout, ThreadLocalLayout, CARD_DIRTY, CARD_SHIFT, CARD_YOUNG};

    fn test_cache() -> StubCache {
        let barriers = BarrierSet {
            thread: ThreadLocalLayout::standard(),
            card: CardTableLayout {
                biased_base: 0x7000_0000,
                card_shift: CARD_SHIFT,
                young: CARD_YOUNG,
                dirty: CARD_DIRTY,
            },
            region_shift: 22,
            narrow: None,
            runtime: BarrierRuntime {
                satb_refill: 0x1000,
                card_refill: 0x2000,
                array_pre: 0x3000,
                array_post: 0x4000,
            },
        };
        StubCache::new(barriers, IntrinsicTables::new(0x5000, 0x6000))
    }

    #[test]
    fn generates_each_stub_once() {
        let cache = test_cache();
        assert!(cache.is_empty());
        let first = cache.entry(StubId::Sha256Compress { multi_block: true }).unwrap();
        let again = cache.entry(StubId::Sha256Compress { multi_block: true }).unwrap();
        assert_eq!(first, again);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_ids_get_distinct_blobs() {
        let cache = test_cache();
        let single = cache.entry(StubId::Sha512Compress { multi_block: false }).unwrap();
        let multi = cache.entry(StubId::Sha512Compress { multi_block: true }).unwrap();
        assert_ne!(single, multi);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn barrier_stubs_resolve() {
        let cache = test_cache();
        let stubs = cache.barrier_stubs().unwrap();
        assert_ne!(stubs.pre_slow, 0);
        assert_ne!(stubs.post_slow, 0);
        assert_ne!(stubs.pre_slow, stubs.post_slow);
        assert_eq!(cache.len(), 2);
    }
}
