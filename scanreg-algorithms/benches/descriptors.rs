//! Benchmarks of FPFH and SHOT descriptor computation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use scanreg_algorithms::{compute_fpfh_descriptor, compute_shot_descriptor, FpfhParams, ShotParams};
use scanreg_core::{Point3d, PointCloud, Vector3d};

/// Samples of a wavy sheet with analytic normals
fn generate_surface(size: usize) -> PointCloud {
    let mut points = Vec::with_capacity(size * size);
    let mut normals = Vec::with_capacity(size * size);
    for y in 0..size {
        for x in 0..size {
            let fx = x as f64 / (size - 1) as f64;
            let fy = y as f64 / (size - 1) as f64;
            let z = 0.1 * (6.0 * fx).sin() * (4.0 * fy).cos();
            let dzdx = 0.6 * (6.0 * fx).cos() * (4.0 * fy).cos();
            let dzdy = -0.4 * (6.0 * fx).sin() * (4.0 * fy).sin();
            points.push(Point3d::new(fx, fy, z));
            normals.push(Vector3d::new(-dzdx, -dzdy, 1.0).normalize());
        }
    }
    PointCloud::new(points, normals).unwrap()
}

fn bench_descriptors(c: &mut Criterion) {
    let mut group = c.benchmark_group("descriptors");

    for &size in &[30, 60, 100] {
        let cloud = generate_surface(size);
        let queries: Vec<usize> = (0..cloud.len()).step_by(10).collect();
        let spacing = 1.0 / (size - 1) as f64;

        let fpfh = FpfhParams {
            radius: 4.0 * spacing,
            ..FpfhParams::default()
        };
        group.bench_with_input(
            BenchmarkId::new("fpfh", format!("{}pts", cloud.len())),
            &(&cloud, &queries),
            |b, &(cloud, queries)| {
                b.iter(|| {
                    let d = compute_fpfh_descriptor(black_box(queries), cloud, &fpfh).unwrap();
                    black_box(d);
                });
            },
        );

        let shot = ShotParams {
            radius: 6.0 * spacing,
            ..ShotParams::default()
        };
        group.bench_with_input(
            BenchmarkId::new("shot", format!("{}pts", cloud.len())),
            &(&cloud, &queries),
            |b, &(cloud, queries)| {
                b.iter(|| {
                    let d = compute_shot_descriptor(black_box(queries), cloud, &shot).unwrap();
                    black_box(d);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_descriptors);
criterion_main!(benches);
