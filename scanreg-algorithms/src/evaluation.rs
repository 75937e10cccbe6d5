//! Match quality against a known transform

use scanreg_core::{Error, Point3d, Result, RigidTransform};

/// Distance under which a matched pair counts as correct
pub const DEFAULT_MATCH_TOLERANCE: f64 = 0.1;

/// Number of pairs `(data[i], reference[i])` that `transform` brings closer
/// than `tolerance`
pub fn count_correct_matches(
    data: &[Point3d],
    reference: &[Point3d],
    transform: &RigidTransform,
    tolerance: f64,
) -> Result<usize> {
    if data.len() != reference.len() {
        return Err(Error::invalid(format!(
            "matched sets differ in length: {} vs {}",
            data.len(),
            reference.len()
        )));
    }
    Ok(data
        .iter()
        .zip(reference)
        .filter(|(p, q)| (transform.transform_point(p) - *q).norm() < tolerance)
        .count())
}
