//! End-to-end registration: descriptors, matching, coarse alignment and ICP

use crate::evaluation::{count_correct_matches, DEFAULT_MATCH_TOLERANCE};
use crate::features::{compute_descriptors, DescriptorKind, Descriptors, FpfhParams, ShotParams};
use crate::keypoints::{select_keypoints, KeypointParams};
use crate::matching::{
    basic_correspondences, double_correspondences, Correspondence, MatchingStrategy,
};
use crate::ransac::{ransac_matching, RansacParams};
use crate::registration::{
    compute_point_to_point_error, icp_point_to_point, solver_point_to_point, IcpParams,
};
use scanreg_core::{
    checkpoint, Error, Instrumentation, Point3d, PointCloud, Result, RigidTransform,
};
use serde::{Deserialize, Serialize};

/// Full configuration of a [`RegistrationPipeline`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub keypoints: KeypointParams,
    pub matching: MatchingStrategy,
    pub fpfh: FpfhParams,
    pub shot: ShotParams,
    /// Ratio test threshold of double matching
    pub reject_threshold: f64,
    pub ransac: RansacParams,
    pub icp: IcpParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            keypoints: KeypointParams::default(),
            matching: MatchingStrategy::Simple,
            fpfh: FpfhParams::default(),
            shot: ShotParams::default(),
            reject_threshold: 0.8,
            ransac: RansacParams::default(),
            icp: IcpParams::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        self.keypoints.validate()?;
        self.fpfh.validate()?;
        self.shot.validate()?;
        self.icp.validate()?;
        match self.matching {
            MatchingStrategy::Simple => {}
            MatchingStrategy::Double => {
                if !(self.reject_threshold.is_finite() && self.reject_threshold > 0.0) {
                    return Err(Error::invalid(format!(
                        "reject threshold must be positive, got {}",
                        self.reject_threshold
                    )));
                }
            }
            MatchingStrategy::Ransac => self.ransac.validate()?,
        }
        Ok(())
    }
}

/// Alignment obtained from descriptor matches alone
#[derive(Debug, Clone)]
pub struct CoarseAlignment {
    pub transform: RigidTransform,
    /// RMS of the whole source cloud against the reference
    pub rms: f64,
    /// False when too few matches survived or RANSAC failed
    pub reliable: bool,
}

/// Final state of a registration attempt
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    /// Source cloud moved into the reference frame
    pub aligned: PointCloud,
    /// Coarse alignment followed by the ICP refinement
    pub transform: RigidTransform,
    pub rms: f64,
    pub converged: bool,
    pub iterations: usize,
    pub reliable: bool,
}

/// Everything produced by [`RegistrationPipeline::register`]
#[derive(Debug, Clone)]
pub struct RegistrationReport {
    pub descriptor: DescriptorKind,
    /// Matched keypoint positions; RANSAC reports its candidate matches
    pub matches: Vec<Correspondence>,
    pub coarse: CoarseAlignment,
    pub refined: RegistrationResult,
}

impl RegistrationReport {
    /// Matches that `truth` maps within the evaluation tolerance
    pub fn correct_matches(
        &self,
        source_keypoints: &[Point3d],
        reference_keypoints: &[Point3d],
        truth: &RigidTransform,
    ) -> Result<usize> {
        let (data, reference) =
            matched_points(&self.matches, source_keypoints, reference_keypoints)?;
        count_correct_matches(&data, &reference, truth, DEFAULT_MATCH_TOLERANCE)
    }
}

fn matched_points(
    matches: &[Correspondence],
    source_keypoints: &[Point3d],
    reference_keypoints: &[Point3d],
) -> Result<(Vec<Point3d>, Vec<Point3d>)> {
    let mut data = Vec::with_capacity(matches.len());
    let mut reference = Vec::with_capacity(matches.len());
    for c in matches {
        match (source_keypoints.get(c.source), reference_keypoints.get(c.target)) {
            (Some(p), Some(q)) => {
                data.push(*p);
                reference.push(*q);
            }
            _ => {
                return Err(Error::invalid(format!(
                    "match ({}, {}) out of range for {} source and {} reference keypoints",
                    c.source,
                    c.target,
                    source_keypoints.len(),
                    reference_keypoints.len()
                )))
            }
        }
    }
    Ok((data, reference))
}

/// Registration pipeline with its configuration validated up front
#[derive(Debug, Clone)]
pub struct RegistrationPipeline {
    config: PipelineConfig,
}

impl RegistrationPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Keypoint indices of `cloud` for the configured strategy
    pub fn select_keypoints(&self, cloud: &PointCloud) -> Result<Vec<usize>> {
        select_keypoints(cloud, &self.config.keypoints)
    }

    /// Register `source` onto `reference` with one descriptor family
    ///
    /// Structural problems (bad indices, empty clouds) are errors. Weak
    /// matches are not: the report is then flagged unreliable.
    pub fn register(
        &self,
        kind: DescriptorKind,
        source: &PointCloud,
        source_keypoints: &[usize],
        reference: &PointCloud,
        reference_keypoints: &[usize],
        mut instrumentation: Option<&mut Instrumentation>,
    ) -> Result<RegistrationReport> {
        if source.is_empty() || reference.is_empty() {
            return Err(Error::invalid("cannot register empty point clouds"));
        }
        let source_positions = source.select_points(source_keypoints)?;
        let reference_positions = reference.select_points(reference_keypoints)?;

        let descriptors = self.describe(kind, source_keypoints, source)?;
        checkpoint(
            &mut instrumentation,
            &format!("{} descriptors of the source cloud ({} points)", kind, source.len()),
        );
        let reference_descriptors = self.describe(kind, reference_keypoints, reference)?;
        checkpoint(
            &mut instrumentation,
            &format!("{} descriptors of the reference cloud ({} points)", kind, reference.len()),
        );

        let (matches, coarse) = match self.config.matching {
            MatchingStrategy::Simple => {
                let matches = basic_correspondences(&descriptors, &reference_descriptors)?;
                let coarse = self.align_matches(
                    &matches,
                    &source_positions,
                    &reference_positions,
                    source,
                    reference,
                )?;
                (matches, coarse)
            }
            MatchingStrategy::Double => {
                let matches = double_correspondences(
                    &descriptors,
                    &reference_descriptors,
                    self.config.reject_threshold,
                )?;
                let coarse = self.align_matches(
                    &matches,
                    &source_positions,
                    &reference_positions,
                    source,
                    reference,
                )?;
                (matches, coarse)
            }
            MatchingStrategy::Ransac => {
                let result = ransac_matching(
                    &descriptors,
                    source.points(),
                    &source_positions,
                    &reference_descriptors,
                    reference.points(),
                    &reference_positions,
                    &self.config.ransac,
                )?;
                let matches = basic_correspondences(&descriptors, &reference_descriptors)?;
                let coarse = CoarseAlignment {
                    transform: result.transform,
                    rms: result.rms,
                    reliable: result.succeeded(),
                };
                (matches, coarse)
            }
        };
        checkpoint(&mut instrumentation, &format!("{} matching and coarse alignment", kind));
        log::info!(
            "{}: {} matches, coarse rms {:.6e}{}",
            kind,
            matches.len(),
            coarse.rms,
            if coarse.reliable { "" } else { " (unreliable)" }
        );

        let coarse_points = coarse.transform.transform_points(source.points());
        let icp = icp_point_to_point(&coarse_points, reference.points(), &self.config.icp)?;
        if let Some(instr) = instrumentation.as_deref_mut() {
            instr.progress("ICP", icp.iterations, self.config.icp.max_iterations);
        }
        checkpoint(&mut instrumentation, &format!("{} ICP", kind));

        let transform = icp.transform.compose(&coarse.transform);
        let refined = RegistrationResult {
            aligned: source.transformed(&transform),
            transform,
            rms: icp.rms,
            converged: icp.converged(),
            iterations: icp.iterations,
            reliable: coarse.reliable,
        };

        Ok(RegistrationReport {
            descriptor: kind,
            matches,
            coarse,
            refined,
        })
    }

    fn describe(
        &self,
        kind: DescriptorKind,
        keypoints: &[usize],
        cloud: &PointCloud,
    ) -> Result<Descriptors> {
        compute_descriptors(kind, keypoints, cloud, &self.config.fpfh, &self.config.shot)
    }

    /// Kabsch fit on matched keypoints; falls back to the identity when
    /// the matches cannot determine a transform
    fn align_matches(
        &self,
        matches: &[Correspondence],
        source_positions: &[Point3d],
        reference_positions: &[Point3d],
        source: &PointCloud,
        reference: &PointCloud,
    ) -> Result<CoarseAlignment> {
        let (scan, target) = matched_points(matches, source_positions, reference_positions)?;
        let (transform, reliable) = match solver_point_to_point(&scan, &target) {
            Ok(transform) => (transform, true),
            Err(e) => {
                log::warn!("coarse alignment from {} matches failed: {}", matches.len(), e);
                (RigidTransform::identity(), false)
            }
        };
        let (rms, _) =
            compute_point_to_point_error(source.points(), reference.points(), &transform)?;
        Ok(CoarseAlignment {
            transform,
            rms,
            reliable,
        })
    }
}
