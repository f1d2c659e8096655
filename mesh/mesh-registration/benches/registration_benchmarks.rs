//! Benchmarks for mesh-registration stages.
//!
//! Run with: cargo bench -p mesh-registration
//!
//! To compare against baseline:
//! 1. First run: cargo bench -p mesh-registration -- --save-baseline main
//! 2. After changes: cargo bench -p mesh-registration -- --baseline main

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use mesh_registration::{
    Correspondence, IcpParams, PointSet, RansacOptions, RigidTransform, compute_fpfh,
    estimate_transform, refine_point_to_plane,
};
use nalgebra::{Point3, UnitQuaternion, Vector3};
use rand::prelude::*;

// =============================================================================
// Test Geometry
// =============================================================================

/// Points on a bumpy unit sphere with radial normals.
fn bumpy_sphere(count: usize, seed: u64) -> PointSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut points = Vec::with_capacity(count);
    let mut normals = Vec::with_capacity(count);
    while points.len() < count {
        let v = Vector3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let Some(dir) = v.try_normalize(1e-6) else {
            continue;
        };
        let r = 1.0 + 0.2 * (3.0 * dir.x).sin() * (2.0 * dir.y).cos();
        points.push(Point3::from(dir * r));
        normals.push(dir);
    }
    PointSet::new(points, normals).unwrap()
}

fn motion() -> RigidTransform {
    RigidTransform::new(
        UnitQuaternion::from_euler_angles(0.05, -0.03, 0.08),
        Vector3::new(0.02, 0.01, -0.03),
    )
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_fpfh(c: &mut Criterion) {
    let mut group = c.benchmark_group("FPFH");

    for count in [1_000, 4_000] {
        let set = bumpy_sphere(count, 1);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("compute", count), &set, |b, set| {
            b.iter(|| compute_fpfh(black_box(set), 0.25, 100));
        });
    }

    group.finish();
}

fn bench_ransac(c: &mut Criterion) {
    let mut group = c.benchmark_group("RANSAC");
    group.sample_size(20);

    for count in [500, 2_000] {
        let source = bumpy_sphere(count, 2);
        let mut target = motion().transform_points(source.points());
        // Half of the pairs are outliers.
        let mut rng = StdRng::seed_from_u64(3);
        for p in target.iter_mut().step_by(2) {
            *p += Vector3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), 0.5);
        }
        let pairs: Vec<_> = (0..count).map(|i| Correspondence::new(i, i)).collect();
        let options = RansacOptions::new()
            .with_max_iterations(10_000)
            .with_inlier_distance(0.01)
            .with_seed(4);

        group.bench_with_input(
            BenchmarkId::new("estimate", count),
            &(source, target, pairs),
            |b, (source, target, pairs)| {
                b.iter(|| {
                    estimate_transform(
                        black_box(source.points()),
                        black_box(target),
                        black_box(pairs),
                        &options,
                    )
                });
            },
        );
    }

    group.finish();
}

fn bench_icp(c: &mut Criterion) {
    let mut group = c.benchmark_group("ICP");
    group.sample_size(20);

    let target = bumpy_sphere(5_000, 5);
    let source = target.transformed(&motion().inverse());
    group.bench_function("point_to_plane_5000", |b| {
        b.iter(|| refine_point_to_plane(black_box(&source), black_box(&target), &IcpParams::default()));
    });

    group.finish();
}

// =============================================================================
// Criterion Setup
// =============================================================================

criterion_group!(benches, bench_fpfh, bench_ransac, bench_icp);
criterion_main!(benches);
