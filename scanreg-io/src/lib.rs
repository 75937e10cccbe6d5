//! I/O operations for scans
//!
//! Point clouds with normals are read from and written to PLY files; scan
//! poses come from calibration manifests.

pub mod calibration;
pub mod ply;

pub use calibration::{ground_truth_transform, read_calibration, Calibration};
pub use ply::{write_ply, PlyColumn, PlyReader, PlyWriter};

use scanreg_core::{Error, PointCloud, Result};
use std::path::Path;

/// Trait for reading point clouds from files
pub trait PointCloudReader {
    fn read_point_cloud<P: AsRef<Path>>(path: P) -> Result<PointCloud>;
}

/// Trait for writing point clouds to files
pub trait PointCloudWriter {
    fn write_point_cloud<P: AsRef<Path>>(cloud: &PointCloud, path: P) -> Result<()>;
}

fn check_extension(path: &Path) -> Result<()> {
    match path.extension().and_then(|s| s.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("ply") => Ok(()),
        other => Err(Error::UnsupportedFormat(format!(
            "unsupported point cloud format: {:?}",
            other
        ))),
    }
}

/// Auto-detect format and read point cloud
pub fn read_point_cloud<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    check_extension(path)?;
    PlyReader::read_point_cloud(path)
}

/// Auto-detect format and write point cloud with its normals
pub fn write_point_cloud<P: AsRef<Path>>(cloud: &PointCloud, path: P) -> Result<()> {
    let path = path.as_ref();
    check_extension(path)?;
    PlyWriter::write_point_cloud(cloud, path)
}
