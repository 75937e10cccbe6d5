//! Rigid registration: closed-form solver, alignment error and ICP

use crate::nearest_neighbor::KdTree;
use nalgebra::Matrix3;
use rayon::prelude::*;
use scanreg_core::{centroid, Error, NearestNeighborSearch, Point3d, Result, RigidTransform};
use serde::{Deserialize, Serialize};

/// Relative size of the second singular value below which the scan is
/// considered collinear or coincident
const DEGENERACY_RATIO: f64 = 1e-12;

/// Least-squares rigid transform mapping `scan[i]` onto `reference[i]`
///
/// Kabsch algorithm: both sets are centered on their centroids, the
/// cross-covariance `H = sum (s - s̄)(r - r̄)^T` is decomposed as
/// `U S V^T`, and the rotation is `V U^T`. When that product is a reflection
/// the last row of `U^T` is negated before recomputing it.
///
/// Returns `InvalidParameter` for sets of different lengths, fewer than
/// three pairs, or a collinear/coincident scan.
pub fn solver_point_to_point(scan: &[Point3d], reference: &[Point3d]) -> Result<RigidTransform> {
    if scan.len() != reference.len() {
        return Err(Error::invalid(format!(
            "point correspondence mismatch: {} scan points, {} reference points",
            scan.len(),
            reference.len()
        )));
    }
    if scan.len() < 3 {
        return Err(Error::invalid(format!(
            "need at least 3 corresponding points, got {}",
            scan.len()
        )));
    }

    let scan_centroid = centroid(scan);
    let reference_centroid = centroid(reference);

    let mut scatter = Matrix3::zeros();
    let mut covariance = Matrix3::zeros();
    for (s, r) in scan.iter().zip(reference.iter()) {
        let p = s - scan_centroid;
        let q = r - reference_centroid;
        scatter += p * p.transpose();
        covariance += p * q.transpose();
    }

    let spread = scatter.singular_values();
    if !(spread[1] > DEGENERACY_RATIO * spread[0]) {
        return Err(Error::invalid("scan points are collinear or coincident"));
    }

    let svd = covariance.svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| Error::Algorithm("SVD U matrix not available".to_string()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| Error::Algorithm("SVD V^T matrix not available".to_string()))?;

    let mut u_t = u.transpose();
    let mut rotation = v_t.transpose() * u_t;

    // Ensure proper rotation (det(R) = 1)
    if rotation.determinant() < 0.0 {
        let last = -u_t.row(2);
        u_t.set_row(2, &last);
        rotation = v_t.transpose() * u_t;
    }

    let translation = reference_centroid.coords - rotation * scan_centroid.coords;
    Ok(RigidTransform::new(rotation, translation))
}

/// Nearest reference neighbor of every point, in parallel
fn nearest_neighbors(points: &[Point3d], index: &KdTree) -> Vec<(usize, f64)> {
    points
        .par_iter()
        .map(|p| index.find_nearest(p).unwrap_or((0, f64::INFINITY)))
        .collect()
}

/// Root mean square of per-coordinate residuals: `sqrt(sum |r|^2 / (3 N))`
fn rms_of(squared_norms: impl Iterator<Item = f64>, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    (squared_norms.sum::<f64>() / (3.0 * count as f64)).sqrt()
}

/// Alignment error of `scan` moved by `transform` against `reference`
///
/// Every transformed point is paired with its nearest reference point.
/// Returns the RMS residual and the transformed points.
pub fn compute_point_to_point_error(
    scan: &[Point3d],
    reference: &[Point3d],
    transform: &RigidTransform,
) -> Result<(f64, Vec<Point3d>)> {
    if reference.is_empty() {
        return Err(Error::invalid("reference point set is empty"));
    }
    let index = KdTree::new(reference);
    Ok(point_to_point_error_with_index(scan, &index, transform))
}

/// Same as [`compute_point_to_point_error`] against a prebuilt index
pub fn point_to_point_error_with_index(
    scan: &[Point3d],
    index: &KdTree,
    transform: &RigidTransform,
) -> (f64, Vec<Point3d>) {
    let transformed = transform.transform_points(scan);
    let neighbors = nearest_neighbors(&transformed, index);
    let rms = rms_of(neighbors.iter().map(|(_, d)| d * d), transformed.len());
    (rms, transformed)
}

/// Parameters of the point-to-point ICP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcpParams {
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Convergence is declared when the RMS changes by less than this
    pub rms_tolerance: f64,
    /// Pairs farther apart than this are ignored (None = no limit)
    pub max_correspondence_distance: Option<f64>,
}

impl Default for IcpParams {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            rms_tolerance: 1e-6,
            max_correspondence_distance: None,
        }
    }
}

impl IcpParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::invalid("max iterations must be positive"));
        }
        if !(self.rms_tolerance.is_finite() && self.rms_tolerance > 0.0) {
            return Err(Error::invalid("RMS tolerance must be positive"));
        }
        if let Some(d) = self.max_correspondence_distance {
            if !(d > 0.0) {
                return Err(Error::invalid("max correspondence distance must be positive"));
            }
        }
        Ok(())
    }
}

/// Terminal state of an ICP run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IcpStatus {
    /// The RMS stopped changing
    Converged,
    /// The iteration budget ran out first; a normal outcome, not an error
    MaxIterationsReached,
}

/// Result of ICP registration
#[derive(Debug, Clone)]
pub struct IcpResult {
    /// Scan points after the final alignment
    pub aligned: Vec<Point3d>,
    /// Cumulative transformation applied to the input scan
    pub transform: RigidTransform,
    /// Final RMS residual
    pub rms: f64,
    /// Number of iterations performed
    pub iterations: usize,
    pub status: IcpStatus,
}

impl IcpResult {
    pub fn converged(&self) -> bool {
        self.status == IcpStatus::Converged
    }
}

/// Point-to-point ICP refining the alignment of `scan` onto `reference`
///
/// Each iteration pairs every aligned scan point with its closest reference
/// point, solves the rigid transform for those pairs, composes it into the
/// cumulative alignment and measures the new RMS. The run stops when the
/// RMS changes by less than `rms_tolerance` or after `max_iterations`.
pub fn icp_point_to_point(
    scan: &[Point3d],
    reference: &[Point3d],
    params: &IcpParams,
) -> Result<IcpResult> {
    params.validate()?;
    if scan.len() < 3 || reference.is_empty() {
        return Err(Error::invalid(format!(
            "ICP needs at least 3 scan points and a non-empty reference, got {} and {}",
            scan.len(),
            reference.len()
        )));
    }

    let index = KdTree::new(reference);
    let mut aligned = scan.to_vec();
    let mut cumulative = RigidTransform::identity();
    let mut previous_rms = rms_of(
        nearest_neighbors(&aligned, &index).iter().map(|(_, d)| d * d),
        aligned.len(),
    );

    for iteration in 1..=params.max_iterations {
        let neighbors = nearest_neighbors(&aligned, &index);

        let (source, target): (Vec<Point3d>, Vec<Point3d>) = aligned
            .iter()
            .zip(neighbors.iter())
            .filter(|(_, (_, d))| match params.max_correspondence_distance {
                Some(max) => *d <= max,
                None => true,
            })
            .map(|(p, (j, _))| (*p, reference[*j]))
            .unzip();

        if source.len() < 3 {
            return Err(Error::Algorithm(format!(
                "insufficient correspondences at iteration {}: {}",
                iteration,
                source.len()
            )));
        }

        let step = solver_point_to_point(&source, &target)?;
        cumulative = step.compose(&cumulative);
        let (rms, moved) = point_to_point_error_with_index(&aligned, &index, &step);
        aligned = moved;

        log::debug!("ICP iteration {}: rms {:.6e}", iteration, rms);

        if (previous_rms - rms).abs() < params.rms_tolerance {
            return Ok(IcpResult {
                aligned,
                transform: cumulative,
                rms,
                iterations: iteration,
                status: IcpStatus::Converged,
            });
        }
        previous_rms = rms;
    }

    log::warn!(
        "ICP stopped after {} iterations without converging (rms {:.6e})",
        params.max_iterations,
        previous_rms
    );
    Ok(IcpResult {
        aligned,
        transform: cumulative,
        rms: previous_rms,
        iterations: params.max_iterations,
        status: IcpStatus::MaxIterationsReached,
    })
}
