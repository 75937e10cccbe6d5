//! Fast Point Feature Histograms
//!
//! Follows R. B. Rusu, N. Blodow and M. Beetz, "Fast Point Feature
//! Histograms (FPFH) for 3D registration", ICRA 2009.

use super::{bin_index, validate_queries, DescriptorKind, Descriptors};
use crate::nearest_neighbor::KdTree;
use rayon::prelude::*;
use scanreg_core::{
    require_neighbors, Error, NearestNeighborSearch, Point3d, PointCloud, Result, Vector3d,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

/// Neighbors closer than this are treated as the query point itself
const COINCIDENT_DISTANCE: f64 = 1e-12;

/// Parameters of the FPFH descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FpfhParams {
    /// Radius of the SPFH neighborhood
    pub radius: f64,
    /// Bins per angular feature; descriptors have `n_bins^3` entries
    pub n_bins: usize,
    /// Number of nearest neighbors whose SPFH is blended into the FPFH
    pub k: usize,
    /// Cap on the SPFH neighborhood size
    pub max_neighbors: Option<usize>,
}

impl Default for FpfhParams {
    fn default() -> Self {
        Self {
            radius: 1e-2,
            n_bins: 5,
            k: 10,
            max_neighbors: None,
        }
    }
}

impl FpfhParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(Error::invalid(format!("FPFH radius must be positive, got {}", self.radius)));
        }
        if self.n_bins == 0 {
            return Err(Error::invalid("FPFH n_bins must be positive"));
        }
        if self.k == 0 {
            return Err(Error::invalid("FPFH k must be positive"));
        }
        if self.max_neighbors == Some(0) {
            return Err(Error::invalid("FPFH max_neighbors must be positive"));
        }
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.n_bins * self.n_bins * self.n_bins
    }
}

/// The three Darboux-frame angles between a point and one neighbor
fn pair_features(
    point: &Point3d,
    normal: &Vector3d,
    neighbor: &Point3d,
    neighbor_normal: &Vector3d,
    distance: f64,
) -> (f64, f64, f64) {
    let direction = (neighbor - point) / distance;
    let u = normal;
    let phi = u.dot(&direction);

    match u.cross(&direction).try_normalize(COINCIDENT_DISTANCE) {
        Some(v) => {
            let w = u.cross(&v);
            let alpha = v.dot(neighbor_normal);
            let theta = w.dot(neighbor_normal).atan2(u.dot(neighbor_normal));
            (alpha, phi, theta)
        }
        // Neighbor lies along the normal: v and w are undefined
        None => (0.0, phi, 0.0f64.atan2(u.dot(neighbor_normal))),
    }
}

/// Simplified Point Feature Histogram of one cloud point
///
/// Returns the histogram and whether the neighborhood was non-empty.
fn compute_spfh(
    index: usize,
    cloud: &PointCloud,
    tree: &KdTree,
    params: &FpfhParams,
) -> (Vec<f64>, bool) {
    let n_bins = params.n_bins;
    let mut histogram = vec![0.0; params.dimension()];
    let point = &cloud.points()[index];
    let normal = &cloud.normals()[index];

    let neighbors: Vec<(usize, f64)> = tree
        .find_radius_neighbors_bounded(point, params.radius, params.max_neighbors.map(|m| m + 1))
        .into_iter()
        .filter(|&(j, d)| j != index && d > COINCIDENT_DISTANCE)
        .collect();

    if let Err(e) = require_neighbors(index, neighbors.len(), 1) {
        log::trace!("SPFH: {}", e);
        return (histogram, false);
    }

    for &(j, distance) in &neighbors {
        let (alpha, phi, theta) = pair_features(
            point,
            normal,
            &cloud.points()[j],
            &cloud.normals()[j],
            distance,
        );
        let a = bin_index(alpha, -1.0, 1.0, n_bins);
        let p = bin_index(phi, -1.0, 1.0, n_bins);
        let t = bin_index(theta, -FRAC_PI_2, FRAC_PI_2, n_bins);
        histogram[(a * n_bins + p) * n_bins + t] += 1.0;
    }

    let count = neighbors.len() as f64;
    histogram.iter_mut().for_each(|h| *h /= count);
    (histogram, true)
}

/// SPFH entry of cloud point `i`; every looked-up index is present in `needed`
fn spfh_of<'a>(needed: &[usize], spfh: &'a [(Vec<f64>, bool)], i: usize) -> &'a (Vec<f64>, bool) {
    let position = needed.binary_search(&i).unwrap_or_else(|position| position);
    &spfh[position]
}

/// Compute FPFH descriptors at `query_indices` of `cloud`
///
/// SPFH histograms are built for the queries and for their `k` nearest
/// neighbors, then blended as
/// `FPFH(q) = SPFH(q) + 1/n * sum_i SPFH(p_i) / ||p_i - q||`,
/// where `n <= k` is the number of neighbors found.
/// A query without radius neighbors keeps an all-zero own histogram and is
/// listed in [`Descriptors::degraded`].
pub fn compute_fpfh_descriptor(
    query_indices: &[usize],
    cloud: &PointCloud,
    params: &FpfhParams,
) -> Result<Descriptors> {
    params.validate()?;
    validate_queries(query_indices, cloud)?;

    let dimension = params.dimension();
    let tree = KdTree::new(cloud.points());

    // k nearest neighbors of each query, excluding the query itself
    let knn: Vec<Vec<(usize, f64)>> = query_indices
        .par_iter()
        .map(|&q| {
            tree.find_k_nearest(&cloud.points()[q], params.k + 1)
                .into_iter()
                .filter(|&(j, d)| j != q && d > COINCIDENT_DISTANCE)
                .take(params.k)
                .collect()
        })
        .collect();

    let mut needed: Vec<usize> = query_indices
        .iter()
        .copied()
        .chain(knn.iter().flatten().map(|&(j, _)| j))
        .collect();
    needed.sort_unstable();
    needed.dedup();

    let spfh: Vec<(Vec<f64>, bool)> = needed
        .par_iter()
        .map(|&i| compute_spfh(i, cloud, &tree, params))
        .collect();
    let lookup = |i: usize| spfh_of(&needed, &spfh, i);

    let rows: Vec<(Vec<f64>, bool)> = query_indices
        .par_iter()
        .zip(knn.par_iter())
        .map(|(&q, neighbors)| {
            let (own, ok) = lookup(q);
            let mut fpfh = own.clone();
            for &(j, distance) in neighbors {
                let weight = 1.0 / (distance * neighbors.len() as f64);
                for (f, s) in fpfh.iter_mut().zip(lookup(j).0.iter()) {
                    *f += weight * s;
                }
            }
            (fpfh, *ok)
        })
        .collect();

    let mut data = Vec::with_capacity(rows.len() * dimension);
    let mut degraded = Vec::new();
    for (position, (row, ok)) in rows.into_iter().enumerate() {
        if !ok {
            degraded.push(position);
        }
        data.extend(row);
    }

    log::debug!(
        "FPFH: {} queries, {} SPFH histograms, {} bins",
        query_indices.len(),
        needed.len(),
        dimension
    );
    if !degraded.is_empty() {
        log::warn!(
            "FPFH: {} of {} queries have no neighbor within radius {}",
            degraded.len(),
            query_indices.len(),
            params.radius
        );
    }

    Descriptors::from_flat(DescriptorKind::Fpfh, dimension, data, degraded)
}
