//! Local shape descriptors
//!
//! Both descriptor families are neighborhood histograms computed around a
//! set of query points (keypoints) of a cloud with normals. Computation is
//! a pure function of its inputs and runs data-parallel over the queries.

mod fpfh;
mod shot;

pub use fpfh::*;
pub use shot::*;

use scanreg_core::{Error, PointCloud, Result};
use serde::{Deserialize, Serialize};

/// Which descriptor family produced a descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DescriptorKind {
    Fpfh,
    Shot,
}

impl DescriptorKind {
    pub fn name(&self) -> &'static str {
        match self {
            DescriptorKind::Fpfh => "FPFH",
            DescriptorKind::Shot => "SHOT",
        }
    }
}

impl std::fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-size descriptors stored row-major, one row per query point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptors {
    kind: DescriptorKind,
    dimension: usize,
    data: Vec<f64>,
    /// Query positions whose neighborhood was too small; their rows are zero
    degraded: Vec<usize>,
}

impl Descriptors {
    /// Wrap a flat row-major buffer
    pub fn from_flat(
        kind: DescriptorKind,
        dimension: usize,
        data: Vec<f64>,
        degraded: Vec<usize>,
    ) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::invalid("descriptor dimension must be positive"));
        }
        if data.len() % dimension != 0 {
            return Err(Error::invalid(format!(
                "buffer of {} values is not a multiple of dimension {}",
                data.len(),
                dimension
            )));
        }
        Ok(Self {
            kind,
            dimension,
            data,
            degraded,
        })
    }

    /// Build from individual rows, which must all have the same length
    pub fn from_rows(kind: DescriptorKind, rows: Vec<Vec<f64>>) -> Result<Self> {
        let dimension = rows.first().map(|r| r.len()).unwrap_or(1);
        if let Some(bad) = rows.iter().position(|r| r.len() != dimension) {
            return Err(Error::invalid(format!(
                "row {} has {} values, expected {}",
                bad,
                rows[bad].len(),
                dimension
            )));
        }
        Self::from_flat(kind, dimension, rows.concat(), Vec::new())
    }

    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of descriptors
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, index: usize) -> &[f64] {
        &self.data[index * self.dimension..(index + 1) * self.dimension]
    }

    pub fn rows(&self) -> std::slice::ChunksExact<'_, f64> {
        self.data.chunks_exact(self.dimension)
    }

    pub fn degraded(&self) -> &[usize] {
        &self.degraded
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

/// Compute descriptors of the requested family at `query_indices`
pub fn compute_descriptors(
    kind: DescriptorKind,
    query_indices: &[usize],
    cloud: &PointCloud,
    fpfh: &FpfhParams,
    shot: &ShotParams,
) -> Result<Descriptors> {
    match kind {
        DescriptorKind::Fpfh => compute_fpfh_descriptor(query_indices, cloud, fpfh),
        DescriptorKind::Shot => compute_shot_descriptor(query_indices, cloud, shot),
    }
}

/// Check that every query index addresses a point of the cloud
pub(crate) fn validate_queries(query_indices: &[usize], cloud: &PointCloud) -> Result<()> {
    match query_indices.iter().find(|&&i| i >= cloud.len()) {
        Some(i) => Err(Error::invalid(format!(
            "query index {} out of range for {} points",
            i,
            cloud.len()
        ))),
        None => Ok(()),
    }
}

/// Histogram bin of `value` over `[low, high]`; out-of-range values land in
/// the edge bins
#[inline]
pub(crate) fn bin_index(value: f64, low: f64, high: f64, n_bins: usize) -> usize {
    let scaled = ((value - low) / (high - low) * n_bins as f64).floor();
    if scaled.is_nan() || scaled < 0.0 {
        0
    } else {
        (scaled as usize).min(n_bins - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_index_edges() {
        assert_eq!(bin_index(-1.0, -1.0, 1.0, 5), 0);
        assert_eq!(bin_index(1.0, -1.0, 1.0, 5), 4);
        assert_eq!(bin_index(0.0, -1.0, 1.0, 5), 2);
        assert_eq!(bin_index(-3.0, -1.0, 1.0, 5), 0);
        assert_eq!(bin_index(9.0, -1.0, 1.0, 5), 4);
        assert_eq!(bin_index(f64::NAN, -1.0, 1.0, 5), 0);
    }

    #[test]
    fn test_rows_layout() {
        let d = Descriptors::from_rows(
            DescriptorKind::Fpfh,
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]],
        )
        .unwrap();
        assert_eq!(d.len(), 3);
        assert_eq!(d.dimension(), 2);
        assert_eq!(d.row(2), &[0.5, 0.5]);
        assert_eq!(d.rows().count(), 3);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let result = Descriptors::from_rows(DescriptorKind::Shot, vec![vec![1.0], vec![1.0, 2.0]]);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }
}
