//! Emission throughput benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use opal_gc::{CardTableLayout, ThreadLocalLayout, CARD_DIRTY, CARD_SHIFT, CARD_YOUNG};
use opal_jit::backend::riscv::assembler::{Assembler, RegisterOrConstant};
use opal_jit::backend::riscv::registers::Gpr;
use opal_jit::gc::{AccessFlags, BarrierRuntime, BarrierSet, BarrierStubs};
use opal_jit::intrinsics::{emit_sha256_compress, emit_sha512_compress, IntrinsicTables};

fn barrier_set() -> BarrierSet {
    BarrierSet {
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
            satb_refill: 0x2000_0000,
            card_refill: 0x2000_0100,
            array_pre: 0x2000_0200,
            array_post: 0x2000_0300,
        },
    }
}

fn bench_materialize(c: &mut Criterion) {
    let constants: Vec<i64> = (0..64)
        .map(|i| 0x0123_4567_89ab_cdefi64.rotate_left(i) ^ (i as i64) << 13)
        .collect();
    c.bench_function("li_64bit_mixed", |b| {
        b.iter(|| {
            let mut asm = Assembler::with_capacity(4096);
            for &imm in &constants {
                asm.li(Gpr::A0, black_box(imm));
            }
            black_box(asm.finish())
        })
    });
}

fn bench_ref_store(c: &mut Criterion) {
    let set = barrier_set();
    let stubs = BarrierStubs { pre_slow: 0x3000_0000, post_slow: 0x3000_0400 };
    c.bench_function("emit_ref_store", |b| {
        b.iter(|| {
            let mut asm = Assembler::with_capacity(1024);
            set.emit_ref_store(
                &mut asm,
                stubs,
                Gpr::A0,
                RegisterOrConstant::Constant(16),
                Some(Gpr::A1),
                Gpr::T0,
                Gpr::T1,
                Gpr::T2,
                AccessFlags::NONE,
            );
            black_box(asm.finish())
        })
    });
}

fn bench_sha_generators(c: &mut Criterion) {
    let tables = IntrinsicTables::new(0x5000, 0x6000);
    c.bench_function("emit_sha256_compress", |b| {
        b.iter(|| {
            let mut asm = Assembler::with_capacity(16 * 1024);
            emit_sha256_compress(&mut asm, &tables, true);
            black_box(asm.finish())
        })
    });
    c.bench_function("emit_sha512_compress", |b| {
        b.iter(|| {
            let mut asm = Assembler::with_capacity(16 * 1024);
            emit_sha512_compress(&mut asm, &tables, true);
            black_box(asm.finish())
        })
    });
}

criterion_group!(benches, bench_materialize, bench_ref_store, bench_sha_generators);
criterion_main!(benches);
