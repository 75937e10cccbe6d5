//! Signature of Histograms of OrienTations (SHOT)
//!
//! Each query gets a repeatable local reference frame; the spherical support
//! is split into azimuth, elevation and radial volumes, and every volume
//! holds a histogram of the cosine between neighbor normals and the frame's
//! z axis.

use super::{bin_index, validate_queries, DescriptorKind, Descriptors};
use crate::nearest_neighbor::KdTree;
use nalgebra::{Matrix3, SymmetricEigen};
use rayon::prelude::*;
use scanreg_core::{
    require_neighbors, Error, NearestNeighborSearch, Point3d, PointCloud, Result, Vector3d,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

pub const SHOT_AZIMUTH_BINS: usize = 8;
pub const SHOT_ELEVATION_BINS: usize = 2;
pub const SHOT_RADIAL_BINS: usize = 2;
pub const SHOT_COSINE_BINS: usize = 11;
pub const SHOT_DIMENSION: usize =
    SHOT_AZIMUTH_BINS * SHOT_ELEVATION_BINS * SHOT_RADIAL_BINS * SHOT_COSINE_BINS;

/// A reference frame needs a covariance of rank 3
const MIN_SHOT_NEIGHBORS: usize = 3;

const COINCIDENT_DISTANCE: f64 = 1e-12;

/// Parameters of the SHOT descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotParams {
    /// Radius of the spherical support
    pub radius: f64,
    /// Cap on the support size
    pub max_neighbors: Option<usize>,
}

impl Default for ShotParams {
    fn default() -> Self {
        Self {
            radius: 1e-1,
            max_neighbors: None,
        }
    }
}

impl ShotParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(Error::invalid(format!("SHOT radius must be positive, got {}", self.radius)));
        }
        if self.max_neighbors == Some(0) {
            return Err(Error::invalid("SHOT max_neighbors must be positive"));
        }
        Ok(())
    }
}

/// Local reference frame as rows `[x; y; z]`
fn local_reference_frame(
    offsets: &[(Vector3d, f64)],
    normal: &Vector3d,
    radius: f64,
) -> Option<Matrix3<f64>> {
    let mut covariance = Matrix3::zeros();
    let mut total_weight = 0.0;
    for (offset, distance) in offsets {
        let weight = radius - distance;
        covariance += weight * offset * offset.transpose();
        total_weight += weight;
    }
    if total_weight <= 0.0 {
        return None;
    }
    covariance /= total_weight;

    let eigen = SymmetricEigen::new(covariance);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let mut x: Vector3d = eigen.eigenvectors.column(order[0]).into_owned();
    let mut z: Vector3d = eigen.eigenvectors.column(order[2]).into_owned();

    // Sign disambiguation: x towards the bulk of the support, z along the normal
    let x_votes: f64 = offsets.iter().map(|(o, _)| o.dot(&x)).sum();
    if x_votes < 0.0 {
        x = -x;
    }
    let z_alignment = z.dot(normal);
    let z_flip = if z_alignment.abs() > COINCIDENT_DISTANCE {
        z_alignment < 0.0
    } else {
        offsets.iter().map(|(o, _)| o.dot(&z)).sum::<f64>() < 0.0
    };
    if z_flip {
        z = -z;
    }
    let y = z.cross(&x);

    Some(Matrix3::from_rows(&[x.transpose(), y.transpose(), z.transpose()]))
}

/// SHOT histogram of a single query; `None` when the support is too small
fn compute_shot_at(
    index: usize,
    cloud: &PointCloud,
    tree: &KdTree,
    params: &ShotParams,
) -> Option<Vec<f64>> {
    let point = &cloud.points()[index];
    let normal = &cloud.normals()[index];

    let support: Vec<(usize, Vector3d, f64)> = tree
        .find_radius_neighbors_bounded(point, params.radius, params.max_neighbors.map(|m| m + 1))
        .into_iter()
        .filter(|&(j, d)| j != index && d > COINCIDENT_DISTANCE)
        .map(|(j, d)| (j, cloud.points()[j] - point, d))
        .collect();

    if let Err(e) = require_neighbors(index, support.len(), MIN_SHOT_NEIGHBORS) {
        log::trace!("SHOT: {}", e);
        return None;
    }

    let offsets: Vec<(Vector3d, f64)> = support.iter().map(|(_, o, d)| (*o, *d)).collect();
    let frame = local_reference_frame(&offsets, normal, params.radius)?;
    let z_axis: Vector3d = frame.row(2).transpose();

    let mut histogram = vec![0.0; SHOT_DIMENSION];
    for (j, offset, distance) in &support {
        let local = frame * offset;
        let azimuth = local.y.atan2(local.x);
        let sector = bin_index(azimuth, -PI, PI, SHOT_AZIMUTH_BINS);
        let elevation = usize::from(local.z >= 0.0);
        let shell = usize::from(*distance >= params.radius / 2.0);
        let volume = (sector * SHOT_ELEVATION_BINS + elevation) * SHOT_RADIAL_BINS + shell;

        let cosine = cloud.normals()[*j].dot(&z_axis).clamp(-1.0, 1.0);
        let cosine_bin = bin_index(cosine, -1.0, 1.0, SHOT_COSINE_BINS);
        histogram[volume * SHOT_COSINE_BINS + cosine_bin] += 1.0;
    }

    let count = support.len() as f64;
    histogram.iter_mut().for_each(|h| *h /= count);
    Some(histogram)
}

/// Compute SHOT descriptors at `query_indices` of `cloud`
///
/// Queries with fewer than three neighbors in the support get an all-zero
/// descriptor and are listed in [`Descriptors::degraded`].
pub fn compute_shot_descriptor(
    query_indices: &[usize],
    cloud: &PointCloud,
    params: &ShotParams,
) -> Result<Descriptors> {
    params.validate()?;
    validate_queries(query_indices, cloud)?;

    let tree = KdTree::new(cloud.points());
    let rows: Vec<Option<Vec<f64>>> = query_indices
        .par_iter()
        .map(|&q| compute_shot_at(q, cloud, &tree, params))
        .collect();

    let mut data = Vec::with_capacity(rows.len() * SHOT_DIMENSION);
    let mut degraded = Vec::new();
    for (position, row) in rows.into_iter().enumerate() {
        match row {
            Some(histogram) => data.extend(histogram),
            None => {
                degraded.push(position);
                data.extend(std::iter::repeat(0.0).take(SHOT_DIMENSION));
            }
        }
    }

    log::debug!("SHOT: {} queries, radius {}", query_indices.len(), params.radius);
    if !degraded.is_empty() {
        log::warn!(
            "SHOT: {} of {} queries have fewer than {} neighbors",
            degraded.len(),
            query_indices.len(),
            MIN_SHOT_NEIGHBORS
        );
    }

    Descriptors::from_flat(DescriptorKind::Shot, SHOT_DIMENSION, data, degraded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{random_cloud, sample_transform};
    use approx::assert_relative_eq;

    fn params() -> ShotParams {
        ShotParams {
            radius: 0.25,
            max_neighbors: None,
        }
    }

    #[test]
    fn test_invalid_radius() {
        let cloud = random_cloud(20, 1);
        for radius in [0.0, -0.5, f64::NAN] {
            let result = compute_shot_descriptor(&[0], &cloud, &ShotParams { radius, max_neighbors: None });
            assert!(matches!(result, Err(Error::InvalidParameter(_))));
        }
    }

    #[test]
    fn test_descriptor_sums_to_one() {
        let cloud = random_cloud(400, 21);
        let queries: Vec<usize> = (0..400).step_by(17).collect();
        let d = compute_shot_descriptor(&queries, &cloud, &params()).unwrap();
        assert_eq!(d.dimension(), SHOT_DIMENSION);
        assert!(d.degraded().is_empty());
        for row in d.rows() {
            assert_relative_eq!(row.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
            assert!(row.iter().all(|v| *v >= 0.0));
        }
    }

    #[test]
    fn test_frame_is_orthonormal_and_right_handed() {
        let cloud = random_cloud(400, 22);
        let point = cloud.points()[0];
        let offsets: Vec<(Vector3d, f64)> = cloud.points()[1..60]
            .iter()
            .map(|p| (p - point, (p - point).norm()))
            .collect();
        let radius = offsets.iter().map(|o| o.1).fold(0.0, f64::max) + 0.01;
        let frame = local_reference_frame(&offsets, &cloud.normals()[0], radius).unwrap();
        assert_relative_eq!(frame * frame.transpose(), Matrix3::identity(), epsilon = 1e-9);
        assert_relative_eq!(frame.determinant(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sparse_support_is_degraded() {
        let points = vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(0.1, 0.0, 0.0),
            Point3d::new(5.0, 0.0, 0.0),
        ];
        let cloud = PointCloud::new(points, vec![Vector3d::z(); 3]).unwrap();
        let d = compute_shot_descriptor(&[0, 2], &cloud, &params()).unwrap();
        assert_eq!(d.degraded(), &[0, 1]);
        assert!(d.as_slice().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_rigid_invariance() {
        let cloud = random_cloud(500, 23);
        let moved = cloud.transformed(&sample_transform());
        let queries: Vec<usize> = (0..500).step_by(19).collect();

        let a = compute_shot_descriptor(&queries, &cloud, &params()).unwrap();
        let b = compute_shot_descriptor(&queries, &moved, &params()).unwrap();
        for (ra, rb) in a.rows().zip(b.rows()) {
            for (x, y) in ra.iter().zip(rb.iter()) {
                assert_relative_eq!(x, y, epsilon = 1e-6);
            }
        }
    }
}
