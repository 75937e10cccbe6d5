//! Point cloud data structures and functionality

use crate::error::{Error, Result};
use crate::point::{Point3d, Vector3d, NORMAL_TOLERANCE};
use crate::transform::RigidTransform;
use serde::{Deserialize, Serialize};

/// An ordered set of points paired one-to-one with unit normals
///
/// The two vectors always have the same length and ordering; constructors
/// reject anything else, so downstream code can index both with the same
/// position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    points: Vec<Point3d>,
    normals: Vec<Vector3d>,
}

impl PointCloud {
    /// Create a point cloud, checking counts and normal lengths
    pub fn new(points: Vec<Point3d>, normals: Vec<Vector3d>) -> Result<Self> {
        if points.len() != normals.len() {
            return Err(Error::MalformedPointCloud(format!(
                "{} points but {} normals",
                points.len(),
                normals.len()
            )));
        }

        if let Some(index) = normals
            .iter()
            .position(|n| (n.norm() - 1.0).abs() > NORMAL_TOLERANCE)
        {
            return Err(Error::MalformedPointCloud(format!(
                "normal {} is not unit length (norm {})",
                index,
                normals[index].norm()
            )));
        }

        Ok(Self { points, normals })
    }

    /// Create a point cloud after rescaling every normal to unit length
    ///
    /// Zero or non-finite normals cannot be rescaled and are rejected.
    pub fn with_normalized_normals(points: Vec<Point3d>, normals: Vec<Vector3d>) -> Result<Self> {
        let normals = normals
            .into_iter()
            .enumerate()
            .map(|(index, n)| {
                n.try_normalize(f64::EPSILON).ok_or_else(|| {
                    Error::MalformedPointCloud(format!("normal {} cannot be normalized", index))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(points, normals)
    }

    /// Create an empty point cloud
    pub fn empty() -> Self {
        Self {
            points: Vec::new(),
            normals: Vec::new(),
        }
    }

    /// Get the number of points in the cloud
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point3d] {
        &self.points
    }

    pub fn normals(&self) -> &[Vector3d] {
        &self.normals
    }

    /// Point and normal at `index`
    pub fn get(&self, index: usize) -> Option<(&Point3d, &Vector3d)> {
        Some((self.points.get(index)?, self.normals.get(index)?))
    }

    /// Iterate over `(point, normal)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&Point3d, &Vector3d)> + '_ {
        self.points.iter().zip(self.normals.iter())
    }

    /// Gather the points at `indices`
    pub fn select_points(&self, indices: &[usize]) -> Result<Vec<Point3d>> {
        indices
            .iter()
            .map(|&i| {
                self.points.get(i).copied().ok_or_else(|| {
                    Error::invalid(format!("index {} out of range for {} points", i, self.len()))
                })
            })
            .collect()
    }

    /// Sub-cloud made of the entries at `indices`, in the given order
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        let points = self.select_points(indices)?;
        let normals = indices.iter().map(|&i| self.normals[i]).collect();
        Ok(Self { points, normals })
    }

    /// Copy of the cloud with points and normals moved by `transform`
    pub fn transformed(&self, transform: &RigidTransform) -> Self {
        Self {
            points: transform.transform_points(&self.points),
            normals: self
                .normals
                .iter()
                .map(|n| transform.transform_vector(n))
                .collect(),
        }
    }

    /// Replace the point positions while keeping normals, e.g. after alignment
    pub fn with_points(&self, points: Vec<Point3d>) -> Result<Self> {
        if points.len() != self.len() {
            return Err(Error::MalformedPointCloud(format!(
                "expected {} points, got {}",
                self.len(),
                points.len()
            )));
        }
        Ok(Self {
            points,
            normals: self.normals.clone(),
        })
    }

    /// Split into the underlying vectors
    pub fn into_parts(self) -> (Vec<Point3d>, Vec<Vector3d>) {
        (self.points, self.normals)
    }
}

impl Default for PointCloud {
    fn default() -> Self {
        Self::empty()
    }
}
