//! Benchmarks for segment validation.
//!
//! Tests validation throughput for the segment shapes that dominate real
//! loads:
//! - Straight-line baseline code (no transfers)
//! - Code dense with guarded indirect transfers
//! - Code dense with direct branches (exercises the target sweep)
//! - Decoding alone, without rule checks

extern crate sandcage;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use sandcage::decoder::decode;
use sandcage::validator::{CpuFeatures, Validator};
use std::hint::black_box;

const BUNDLE: usize = 32;
const SEGMENT_BUNDLES: usize = 2048;

/// One bundle of `mov eax, imm32; add eax, ebx` pairs, ending flush.
fn straight_line_segment() -> Vec<u8> {
    let mut code = Vec::with_capacity(SEGMENT_BUNDLES * BUNDLE);
    for i in 0..SEGMENT_BUNDLES {
        for _ in 0..4 {
            code.extend_from_slice(&[0xB8]); // mov eax, imm32
            code.extend_from_slice(&(i as u32).to_le_bytes());
            code.extend_from_slice(&[0x01, 0xD8]); // add eax, ebx
            code.push(0x90);
        }
    }
    code
}

/// Bundles that each end in a masked indirect jump through EDX.
fn indirect_transfer_segment() -> Vec<u8> {
    let mut code = Vec::with_capacity(SEGMENT_BUNDLES * BUNDLE);
    for _ in 0..SEGMENT_BUNDLES {
        code.extend_from_slice(&[0x90; BUNDLE - 5]);
        code.extend_from_slice(&[0x83, 0xE2, 0xE0]); // and edx, -32
        code.extend_from_slice(&[0xFF, 0xE2]); // jmp rdx
    }
    code
}

/// Bundles of short forward jumps, every one of which the end-of-pass sweep
/// must resolve.
fn direct_branch_segment() -> Vec<u8> {
    let mut code = Vec::with_capacity(SEGMENT_BUNDLES * BUNDLE);
    for _ in 0..SEGMENT_BUNDLES {
        for _ in 0..BUNDLE / 4 {
            code.extend_from_slice(&[0xEB, 0x02, 0x90, 0x90]); // jmp +2
        }
    }
    code
}

fn bench_validate_straight_line(c: &mut Criterion) {
    let validator = Validator::new(BUNDLE).unwrap();
    let cpu = CpuFeatures::baseline();
    let code = straight_line_segment();

    let mut group = c.benchmark_group("validate");
    group.throughput(Throughput::Bytes(code.len() as u64));
    group.bench_function("straight_line", |b| {
        b.iter(|| {
            let report = validator.validate_segment(black_box(&code), 0, cpu);
            assert!(report.ok());
            black_box(report)
        });
    });
    group.finish();
}

fn bench_validate_indirect_transfers(c: &mut Criterion) {
    let validator = Validator::new(BUNDLE).unwrap();
    let cpu = CpuFeatures::baseline();
    let code = indirect_transfer_segment();

    let mut group = c.benchmark_group("validate");
    group.throughput(Throughput::Bytes(code.len() as u64));
    group.bench_function("indirect_transfers", |b| {
        b.iter(|| {
            let report = validator.validate_segment(black_box(&code), 0, cpu);
            assert!(report.ok());
            black_box(report)
        });
    });
    group.finish();
}

fn bench_validate_direct_branches(c: &mut Criterion) {
    let validator = Validator::new(BUNDLE).unwrap();
    let cpu = CpuFeatures::baseline();
    let code = direct_branch_segment();

    let mut group = c.benchmark_group("validate");
    group.throughput(Throughput::Bytes(code.len() as u64));
    group.bench_function("direct_branches", |b| {
        b.iter(|| {
            let report = validator.validate_segment(black_box(&code), 0, cpu);
            assert!(report.ok());
            black_box(report)
        });
    });
    group.finish();
}

fn bench_decode_only(c: &mut Criterion) {
    let code = straight_line_segment();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(code.len() as u64));
    group.bench_function("straight_line", |b| {
        b.iter(|| {
            let mut offset = 0usize;
            while offset < code.len() {
                let inst = decode(black_box(&code), offset).unwrap();
                offset = inst.end();
                black_box(&inst);
            }
            offset
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_validate_straight_line,
    bench_validate_indirect_transfers,
    bench_validate_direct_branches,
    bench_decode_only,
);
criterion_main!(benches);
