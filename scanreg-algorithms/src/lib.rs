//! # scanreg algorithms
//!
//! Pairwise rigid registration of 3D scans: spatial indexing, keypoint
//! selection, FPFH and SHOT descriptors, descriptor matching, RANSAC,
//! closed-form rigid fitting and ICP refinement.

pub mod evaluation;
pub mod features;
pub mod keypoints;
pub mod matching;
pub mod nearest_neighbor;
pub mod pipeline;
pub mod ransac;
pub mod registration;

#[cfg(test)]
mod test_utils;

// Re-export commonly used items
pub use evaluation::*;
pub use features::*;
pub use keypoints::*;
pub use matching::*;
pub use nearest_neighbor::*;
pub use pipeline::*;
pub use ransac::*;
pub use registration::*;
