//! Rigid transformation utilities

use crate::point::{Point3d, Vector3d};
use nalgebra::{Isometry3, Matrix3, Matrix4, Rotation3, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};

/// A rotation followed by a translation: `p' = R * p + t`
///
/// The rotation is kept as a plain matrix because it is produced directly by
/// the SVD solver. Constructors coming from that solver guarantee it is
/// orthonormal with determinant +1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3d,
}

impl RigidTransform {
    /// Create an identity transformation
    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3d::zeros(),
        }
    }

    /// Create a transformation from its rotation matrix and translation
    pub fn new(rotation: Matrix3<f64>, translation: Vector3d) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Create a pure translation
    pub fn from_translation(translation: Vector3d) -> Self {
        Self::new(Matrix3::identity(), translation)
    }

    /// Create a transformation from a unit quaternion and a translation
    pub fn from_quaternion(rotation: UnitQuaternion<f64>, translation: Vector3d) -> Self {
        Self::new(rotation.to_rotation_matrix().into_inner(), translation)
    }

    /// Create a transformation from an axis-angle rotation and a translation
    pub fn from_axis_angle(axis: &nalgebra::Unit<Vector3d>, angle: f64, translation: Vector3d) -> Self {
        Self::new(Rotation3::from_axis_angle(axis, angle).into_inner(), translation)
    }

    /// Apply the transformation to a point
    #[inline]
    pub fn transform_point(&self, point: &Point3d) -> Point3d {
        Point3d::from(self.rotation * point.coords + self.translation)
    }

    /// Apply the rotation part to a vector (normals, directions)
    #[inline]
    pub fn transform_vector(&self, vector: &Vector3d) -> Vector3d {
        self.rotation * vector
    }

    /// Apply the transformation to every point of a slice
    pub fn transform_points(&self, points: &[Point3d]) -> Vec<Point3d> {
        points.iter().map(|p| self.transform_point(p)).collect()
    }

    /// Compose with another transformation; `other` is applied first
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Inverse of a rigid transformation
    pub fn inverse(&self) -> Self {
        let rotation_t = self.rotation.transpose();
        Self {
            rotation: rotation_t,
            translation: -(rotation_t * self.translation),
        }
    }

    /// Angle of the relative rotation between `self` and `other`, in degrees
    pub fn rotation_error_degrees(&self, other: &Self) -> f64 {
        let r = self.rotation.transpose() * other.rotation;
        // atan2 keeps precision for small angles where acos does not
        let sin = 0.5
            * Vector3d::new(r[(2, 1)] - r[(1, 2)], r[(0, 2)] - r[(2, 0)], r[(1, 0)] - r[(0, 1)])
                .norm();
        let cos = (r.trace() - 1.0) / 2.0;
        sin.atan2(cos).to_degrees()
    }

    /// Euclidean distance between the two translations
    pub fn translation_error(&self, other: &Self) -> f64 {
        (self.translation - other.translation).norm()
    }

    /// Check that the rotation part is orthonormal with determinant +1
    pub fn is_proper(&self, epsilon: f64) -> bool {
        let orthogonality = (self.rotation.transpose() * self.rotation - Matrix3::identity()).norm();
        orthogonality < epsilon && (self.rotation.determinant() - 1.0).abs() < epsilon
    }

    /// Homogeneous 4x4 matrix
    pub fn to_homogeneous(&self) -> Matrix4<f64> {
        let mut matrix = Matrix4::identity();
        matrix.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        matrix
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul for RigidTransform {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        self.compose(&rhs)
    }
}

impl From<Isometry3<f64>> for RigidTransform {
    fn from(isometry: Isometry3<f64>) -> Self {
        Self::from_quaternion(isometry.rotation, isometry.translation.vector)
    }
}

impl From<RigidTransform> for Isometry3<f64> {
    fn from(transform: RigidTransform) -> Self {
        let rotation = Rotation3::from_matrix(&transform.rotation);
        Isometry3::from_parts(
            Translation3::from(transform.translation),
            UnitQuaternion::from_rotation_matrix(&rotation),
        )
    }
}
