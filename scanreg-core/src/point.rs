//! Point and vector aliases

use nalgebra::{Point3, Vector3};

/// A 3D point with double precision coordinates
pub type Point3d = Point3<f64>;

/// A 3D vector with double precision components
pub type Vector3d = Vector3<f64>;

/// Tolerance on the length of a unit normal
pub const NORMAL_TOLERANCE: f64 = 1e-6;

/// Convert a point to the fixed-size array layout used by spatial indices
#[inline]
pub fn to_array(point: &Point3d) -> [f64; 3] {
    [point.x, point.y, point.z]
}

/// Centroid of a non-empty point slice
pub fn centroid(points: &[Point3d]) -> Point3d {
    let n = points.len().max(1) as f64;
    let sum = points
        .iter()
        .fold(Vector3d::zeros(), |acc, p| acc + p.coords);
    Point3d::from(sum / n)
}
