use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use dataway_writer::sender::{BodySegmenter, MAX_BODY_BYTES, build_bodies};
use dataway_writer::{PayloadEncoding, Point};
use std::hint::black_box;

fn create_points(n: usize) -> Vec<Point> {
    (0..n)
        .map(|i| {
            Bytes::from(format!(
                "cpu,host=web-{},cpu=cpu{} usage_idle={}.5,usage_user=1.2 1700000000000000000",
                i % 16,
                i % 8,
                i % 100
            ))
        })
        .collect()
}

fn bench_build_bodies(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_bodies");

    for &count in &[1_000usize, 10_000, 100_000] {
        let points = create_points(count);
        let bytes: usize = points.iter().map(Bytes::len).sum();
        group.throughput(Throughput::Bytes(bytes as u64));

        for encoding in [
            PayloadEncoding::LineProtocol,
            PayloadEncoding::Protobuf,
            PayloadEncoding::Json,
        ] {
            group.bench_with_input(
                BenchmarkId::new(format!("{encoding:?}"), count),
                &points,
                |b, points| {
                    b.iter(|| {
                        build_bodies(black_box(points), encoding, MAX_BODY_BYTES, false)
                            .expect("segmentation failed")
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_small_bodies(c: &mut Criterion) {
    let mut group = c.benchmark_group("small_bodies");
    let points = create_points(10_000);

    for &max in &[4 * 1024usize, 64 * 1024, 1024 * 1024] {
        group.bench_with_input(BenchmarkId::new("lazy", max), &max, |b, &max| {
            b.iter(|| {
                BodySegmenter::new(black_box(&points), PayloadEncoding::LineProtocol, max, false)
                    .map(|body| body.expect("segmentation failed").npts)
                    .sum::<usize>()
            });
        });
    }

    group.finish();
}

fn bench_gzip(c: &mut Criterion) {
    let mut group = c.benchmark_group("gzip");
    let points = create_points(10_000);

    for gzip in [false, true] {
        group.bench_with_input(BenchmarkId::new("line_protocol", gzip), &gzip, |b, &gzip| {
            b.iter(|| {
                build_bodies(
                    black_box(&points),
                    PayloadEncoding::LineProtocol,
                    MAX_BODY_BYTES,
                    gzip,
                )
                .expect("segmentation failed")
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build_bodies, bench_small_bodies, bench_gzip);
criterion_main!(benches);
