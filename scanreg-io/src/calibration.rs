//! Calibration manifests in the Stanford 3D Scanning Repository `.conf` format
//!
//! Lines starting with `bmesh` give the pose of one scan in a common frame:
//! `bmesh <name>.ply tx ty tz qw qx qy qz`. All other lines are ignored.

use nalgebra::{Quaternion, UnitQuaternion};
use scanreg_core::{Error, Result, RigidTransform, Vector3d};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const POSE_MARKER: &str = "bmesh";

/// Scan poses keyed by file stem
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calibration {
    poses: HashMap<String, RigidTransform>,
}

impl Calibration {
    pub fn parse(text: &str) -> Result<Self> {
        let mut poses = HashMap::new();
        for (line_number, line) in text.lines().enumerate() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.first() != Some(&POSE_MARKER) {
                continue;
            }
            if tokens.len() < 9 {
                return Err(Error::invalid(format!(
                    "calibration line {}: expected a name and 7 numbers",
                    line_number + 1
                )));
            }

            let mut values = [0.0; 7];
            for (value, token) in values.iter_mut().zip(&tokens[2..9]) {
                *value = token.parse().map_err(|_| {
                    Error::invalid(format!(
                        "calibration line {}: invalid number '{}'",
                        line_number + 1,
                        token
                    ))
                })?;
            }

            let [tx, ty, tz, qw, qx, qy, qz] = values;
            let quaternion = Quaternion::new(qw, qx, qy, qz);
            if !(quaternion.norm() > 0.0) {
                return Err(Error::invalid(format!(
                    "calibration line {}: zero quaternion",
                    line_number + 1
                )));
            }
            let pose = RigidTransform::from_quaternion(
                UnitQuaternion::from_quaternion(quaternion),
                Vector3d::new(tx, ty, tz),
            );
            poses.insert(scan_key(tokens[1]), pose);
        }
        Ok(Self { poses })
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    /// Pose of a scan, looked up by path, file name or stem
    pub fn pose(&self, scan: &str) -> Result<&RigidTransform> {
        let key = scan_key(scan);
        self.poses
            .get(&key)
            .ok_or(Error::MissingCalibration(key))
    }

    /// Transform taking scan `file` onto scan `reference_file`
    pub fn ground_truth(&self, file: &str, reference_file: &str) -> Result<RigidTransform> {
        let pose = self.pose(file)?;
        let reference_pose = self.pose(reference_file)?;
        Ok(reference_pose.inverse().compose(pose))
    }
}

/// Read a calibration manifest from disk
pub fn read_calibration<P: AsRef<Path>>(path: P) -> Result<Calibration> {
    let text = fs::read_to_string(path)?;
    let calibration = Calibration::parse(&text)?;
    log::debug!("read {} calibrated poses", calibration.len());
    Ok(calibration)
}

/// Ground-truth transform from `file` to `reference_file` under `calibration`
pub fn ground_truth_transform(
    calibration: &Calibration,
    file: &str,
    reference_file: &str,
) -> Result<RigidTransform> {
    calibration.ground_truth(file, reference_file)
}

/// Final path component without its `.ply` extension
fn scan_key(scan: &str) -> String {
    let name = scan.rsplit(['/', '\\']).next().unwrap_or(scan);
    name.strip_suffix(".ply").unwrap_or(name).to_string()
}
