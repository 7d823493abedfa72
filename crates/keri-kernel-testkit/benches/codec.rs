//! Codec and routing benchmarks.
//!
//! - Canonical serialization of events in JSON and CBOR
//! - Parsing signed messages off the wire
//! - Verifying whole logs through a router

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use keri_kernel::{Habitat, KernelConfig};
use keri_kernel_core::{
    parse_message, serialize_event, EventRouter, RouterConfig, SerialKind, Signer,
};

fn chain(kind: SerialKind, interactions: usize) -> Habitat {
    let signers = (0..3u8).map(|i| Signer::from_seed(&[i; 32], true)).collect();
    let config = KernelConfig::default().with_kind(kind);
    let mut hab = Habitat::new(signers, &config).unwrap();
    hab.rotate().unwrap();
    for _ in 0..interactions {
        hab.interact(Vec::new()).unwrap();
    }
    hab
}

fn bench_serialize(c: &mut Criterion) {
    for kind in [SerialKind::Json, SerialKind::Cbor] {
        let hab = chain(kind, 0);
        let event = hab.kel()[0].inner().clone();
        c.bench_with_input(
            BenchmarkId::new("serialize_inception", kind.tag()),
            &event,
            |b, event| b.iter(|| black_box(serialize_event(event, kind).unwrap())),
        );
    }
}

fn bench_parse(c: &mut Criterion) {
    for kind in [SerialKind::Json, SerialKind::Cbor] {
        let hab = chain(kind, 0);
        let bytes = hab.kel()[0].to_bytes().unwrap();
        c.bench_with_input(
            BenchmarkId::new("parse_message", kind.tag()),
            &bytes,
            |b, bytes| b.iter(|| black_box(parse_message(bytes).unwrap())),
        );
    }
}

fn bench_router(c: &mut Criterion) {
    for size in [10usize, 100] {
        let wire = chain(SerialKind::Json, size).kel_messages().unwrap();
        c.bench_with_input(BenchmarkId::new("router_stream", size), &wire, |b, wire| {
            b.iter(|| {
                let mut router = EventRouter::new(RouterConfig::default());
                let mut buf = BytesMut::from(&wire[..]);
                black_box(router.process_stream(&mut buf))
            })
        });
    }
}

criterion_group!(benches, bench_serialize, bench_parse, bench_router);
criterion_main!(benches);
