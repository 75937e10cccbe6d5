//! Core data structures and traits for scanreg
//!
//! This crate provides the fundamental types shared by the registration
//! pipeline: point clouds with normals, rigid transforms, the spatial index
//! interface, errors and the instrumentation context.

pub mod error;
pub mod instrument;
pub mod point;
pub mod point_cloud;
pub mod traits;
pub mod transform;

pub use error::*;
pub use instrument::*;
pub use point::*;
pub use point_cloud::*;
pub use traits::*;
pub use transform::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Matrix3, Point3, Vector3, UnitQuaternion};
