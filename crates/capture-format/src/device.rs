//! Physical camera identity

use serde::{Deserialize, Serialize};

/// Which way a camera points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Facing {
    Front,
    Back,
}

/// Identity of one physical camera: its enumeration index, facing, and the
/// mount orientation of the sensor in degrees.
///
/// Created by the catalog at enumeration time and never mutated; owned by the
/// lifecycle controller for the duration of one open/close cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureDeviceHandle {
    pub index: usize,
    pub name: String,
    pub facing: Facing,
    pub orientation_degrees: u32,
}
