// Kinematics core for the tendon-driven soft arm
//
// Provides:
// - Quaternion / rotation-matrix / Euler-angle conversions
// - Tendon lengths -> configuration (three PCC parameterizations)
// - Configuration -> pose, single section and the three-section robot
// - Shape reconstruction from a measured orientation
//
// Everything in here is pure: no I/O, no shared state.

pub mod config_to_pose;
pub mod length_to_config;
pub mod multi_section;
pub mod real_robot;
pub mod rotation;

pub use config_to_pose::{BendVector, Configuration, Parameterization, Pose};
pub use length_to_config::TENDON_OFFSET;
pub use multi_section::{MultiSectionComposer, SectionShape, SECTION_COUNT, SECTION_TWIST};
pub use real_robot::real_robot_fk;
pub use rotation::{EulerAngles, EulerOrder, Quaternion};

/// Error types for the kinematics core
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KinematicsError {
    #[error("Degenerate input: {reason}")]
    DegenerateInput { reason: String },

    #[error("Invalid parameter: {reason}")]
    InvalidParameter { reason: String },
}

impl KinematicsError {
    pub(crate) fn degenerate(reason: impl Into<String>) -> Self {
        Self::DegenerateInput {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, KinematicsError>;
