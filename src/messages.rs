// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::kinematics::{BendVector, Pose, SectionShape};

// Tendon feedback from hardware or simulation -> runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TendonFeedback {
    /// Tendon lengths in meters, sections 1, 2, 3 in order
    pub lengths: [f64; 9],
}

// One section of the estimated shape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectionState {
    pub config: BendVector,
    /// Base-frame tip pose
    pub tip: Pose,
}

impl From<&SectionShape> for SectionState {
    fn from(shape: &SectionShape) -> Self {
        Self {
            config: shape.config,
            tip: shape.pose,
        }
    }
}

// Shape estimate published by runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShapeState {
    pub lengths: [f64; 9],
    pub sections: Vec<SectionState>,
    /// Backbone points along the whole arm, base frame
    pub backbone: Vec<[f64; 3]>,
}

// Section orientation measured by the IMUs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectionOrientation {
    /// Quaternion [w, x, y, z] relative to the body below, in the section's tendon frame
    pub quaternion: [f64; 4],
    /// ZYX Euler angles [yaw, pitch, roll] in degrees
    pub euler_zyx_deg: [f64; 3],
    /// Bend vector reconstructed from the relative rotation
    pub reconstructed: BendVector,
}

// Orientation estimate published by runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OrientationState {
    pub sections: Vec<SectionOrientation>,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    FeedbackStale,
}
