//! Seeded fixtures shared by the unit tests

use rand::prelude::*;
use scanreg_core::{Point3d, PointCloud, RigidTransform, Vector3d};

pub fn random_points(n: usize, seed: u64) -> Vec<Point3d> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| Point3d::new(rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()))
        .collect()
}

/// Points scattered over the unit square at z = 0
pub fn flat_points(n: usize, seed: u64) -> Vec<Point3d> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| Point3d::new(rng.gen::<f64>(), rng.gen::<f64>(), 0.0))
        .collect()
}

pub fn random_unit_vector(rng: &mut StdRng) -> Vector3d {
    loop {
        let v = Vector3d::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let norm = v.norm();
        if norm > 0.1 && norm <= 1.0 {
            return v / norm;
        }
    }
}

/// Anisotropic blob (extents 1.0 x 0.6 x 0.3) with random unit normals
pub fn random_cloud(n: usize, seed: u64) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);
    let points = (0..n)
        .map(|_| {
            Point3d::new(
                rng.gen::<f64>(),
                0.6 * rng.gen::<f64>(),
                0.3 * rng.gen::<f64>(),
            )
        })
        .collect();
    let normals = (0..n).map(|_| random_unit_vector(&mut rng)).collect();
    PointCloud::new(points, normals).unwrap()
}

pub fn sample_transform() -> RigidTransform {
    RigidTransform::from_axis_angle(
        &nalgebra::Unit::new_normalize(Vector3d::new(0.3, -0.5, 0.8)),
        0.7,
        Vector3d::new(0.4, -1.2, 2.5),
    )
}
