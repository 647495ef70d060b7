// Three-section composition for the stacked soft arm
// Chains per-section poses base to tip, with each section's tendons
// mounted at a fixed twist relative to the section below.

use std::f64::consts::FRAC_PI_6;

use nalgebra::{SMatrix, Vector3};
use serde::{Deserialize, Serialize};

use super::config_to_pose::{BendVector, Pose};
use super::length_to_config::{fk_l2s_three_sections, TENDON_OFFSET};
use super::real_robot::real_robot_fk;
use super::rotation::Quaternion;
use super::Result;

/// Number of stacked sections on the arm
pub const SECTION_COUNT: usize = 3;

/// Tendon mounting twist between consecutive sections (radians)
pub const SECTION_TWIST: f64 = FRAC_PI_6;

/// One section's configuration with its base-frame tip pose
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectionShape {
    pub config: BendVector,
    pub pose: Pose,
}

/// Section `index`'s pose in the frame of the section below
///
/// The local arc is conjugated by the mounting twist so that its bend
/// vector is read in the section's own tendon frame.
pub fn section_transform(index: usize, config: &BendVector) -> Pose {
    let twist = index as f64 * SECTION_TWIST;
    Pose::twist(-twist)
        .compose(&config.pose())
        .compose(&Pose::twist(twist))
}

/// Rotation of section `index` relative to the section below, read in its
/// own tendon frame
///
/// Removes the mounting twist that [`section_transform`] applies, so the
/// result is the bare arc rotation of [`BendVector::pose`].
pub fn untwist(index: usize, relative: &Quaternion) -> Quaternion {
    let twist = Pose::twist(index as f64 * SECTION_TWIST).orientation();
    twist * *relative * twist.inverse()
}

/// Base-frame tip pose of every section
pub fn compose_sections(sections: &[BendVector; SECTION_COUNT]) -> [Pose; SECTION_COUNT] {
    let mut out = [Pose::identity(); SECTION_COUNT];
    let mut base = Pose::identity();
    for (i, config) in sections.iter().enumerate() {
        base = base.compose(&section_transform(i, config));
        out[i] = base;
    }
    out
}

/// Stack the homogeneous transforms of all sections into a 12x4 matrix
pub fn stack_homogeneous(poses: &[Pose; SECTION_COUNT]) -> SMatrix<f64, 12, 4> {
    let mut m = SMatrix::<f64, 12, 4>::zeros();
    for (i, pose) in poses.iter().enumerate() {
        m.fixed_view_mut::<4, 4>(4 * i, 0)
            .copy_from(&pose.to_homogeneous());
    }
    m
}

/// Backbone points of the whole arm in the base frame
///
/// `n` points per section; the last point of a section coincides with the
/// first point of the next, so it is emitted once.
pub fn compose_backbone(sections: &[BendVector; SECTION_COUNT], n: usize) -> Vec<Vector3<f64>> {
    let mut points = Vec::with_capacity(SECTION_COUNT * n);
    let mut base = Pose::identity();
    for (i, config) in sections.iter().enumerate() {
        let twist = Pose::twist(-(i as f64) * SECTION_TWIST);
        let frame = base.compose(&twist);
        let skip = usize::from(i > 0 && n > 0);
        points.extend(
            config
                .backbone(n)
                .iter()
                .skip(skip)
                .map(|p| frame.transform_point(p)),
        );
        base = base.compose(&section_transform(i, config));
    }
    points
}

/// Shape estimator for the three-section arm
///
/// Takes the nine tendon lengths (sections 1, 2, 3 in order) and produces
/// section configurations and poses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultiSectionComposer {
    /// Tendon distance from the section axis
    pub d: f64,
}

impl Default for MultiSectionComposer {
    fn default() -> Self {
        Self::new(TENDON_OFFSET)
    }
}

impl MultiSectionComposer {
    pub fn new(d: f64) -> Self {
        Self { d }
    }

    /// Bend vector of every section
    pub fn sections_from_lengths(&self, lengths: &[f64; 9]) -> Result<[BendVector; SECTION_COUNT]> {
        let raw = fk_l2s_three_sections(lengths, self.d)?;
        Ok([
            BendVector::new(raw[0], raw[1], raw[2]),
            BendVector::new(raw[3], raw[4], raw[5]),
            BendVector::new(raw[6], raw[7], raw[8]),
        ])
    }

    /// Configuration and base-frame pose of every section
    pub fn shape(&self, lengths: &[f64; 9]) -> Result<[SectionShape; SECTION_COUNT]> {
        let sections = self.sections_from_lengths(lengths)?;
        let poses = compose_sections(&sections);
        Ok([0, 1, 2].map(|i| SectionShape {
            config: sections[i],
            pose: poses[i],
        }))
    }

    /// Stacked homogeneous transforms T1, T2, T3 via the closed form
    pub fn real_robot(&self, lengths: &[f64; 9]) -> Result<SMatrix<f64, 12, 4>> {
        let sections = self.sections_from_lengths(lengths)?;
        let s = sections.map(|c| c.s);
        let dx = sections.map(|c| c.deltax);
        let dy = sections.map(|c| c.deltay);
        Ok(real_robot_fk(&s, &dx, &dy))
    }

    /// Backbone points along the whole arm
    pub fn backbone(&self, lengths: &[f64; 9], n: usize) -> Result<Vec<Vector3<f64>>> {
        let sections = self.sections_from_lengths(lengths)?;
        Ok(compose_backbone(&sections, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample() -> [BendVector; SECTION_COUNT] {
        [
            BendVector::new(0.456, 1.1, 2.1),
            BendVector::new(0.789, 1.2, 2.2),
            BendVector::new(0.123, 1.3, 2.3),
        ]
    }

    #[test]
    fn test_first_section_has_no_twist() {
        let sections = sample();
        let poses = compose_sections(&sections);
        let single = sections[0].pose();
        assert_relative_eq!(poses[0].rotation, single.rotation, epsilon = 1e-14);
        assert_relative_eq!(poses[0].position, single.position, epsilon = 1e-14);
    }

    #[test]
    fn test_untwist_recovers_arc_rotation() {
        for (i, config) in sample().iter().enumerate() {
            let relative = section_transform(i, config).orientation();
            let local = untwist(i, &relative).to_rotation_matrix().unwrap();
            assert_relative_eq!(local, config.pose().rotation, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_stacked_tip_rows() {
        let m = stack_homogeneous(&compose_sections(&sample()));
        assert_relative_eq!(m[(0, 3)], -0.15326975877166546, epsilon = 1e-12);
        assert_relative_eq!(m[(4, 0)], 0.20392547345487155, epsilon = 1e-12);
        assert_relative_eq!(m[(4, 3)], -0.3105160608278003, epsilon = 1e-12);
        assert_relative_eq!(m[(8, 1)], -0.968636612927772, epsilon = 1e-12);
        assert_relative_eq!(m[(8, 3)], -0.32402308884508163, epsilon = 1e-12);
        for row in [3, 7, 11] {
            assert_eq!(m[(row, 0)], 0.0);
            assert_eq!(m[(row, 1)], 0.0);
            assert_eq!(m[(row, 2)], 0.0);
            assert_eq!(m[(row, 3)], 1.0);
        }
    }

    #[test]
    fn test_straight_arm_stacks_lengths() {
        let sections = [
            BendVector::straight(0.1),
            BendVector::straight(0.2),
            BendVector::straight(0.3),
        ];
        let poses = compose_sections(&sections);
        assert_relative_eq!(poses[2].position, Vector3::new(0.0, 0.0, 0.6), epsilon = 1e-15);
        assert_relative_eq!(poses[2].rotation, nalgebra::Matrix3::identity(), epsilon = 1e-15);
    }

    #[test]
    fn test_backbone_joins_sections() {
        let sections = sample();
        let poses = compose_sections(&sections);
        let points = compose_backbone(&sections, 5);
        // 5 + 4 + 4 after dropping shared joints
        assert_eq!(points.len(), 13);
        assert_relative_eq!(points[0], Vector3::zeros(), epsilon = 1e-15);
        assert_relative_eq!(points[4], poses[0].position, epsilon = 1e-12);
        assert_relative_eq!(points[8], poses[1].position, epsilon = 1e-12);
        assert_relative_eq!(points[12], poses[2].position, epsilon = 1e-12);
    }

    #[test]
    fn test_composer_equal_lengths_is_straight() {
        let composer = MultiSectionComposer::default();
        let lengths = [0.1, 0.1, 0.1, 0.2, 0.2, 0.2, 0.15, 0.15, 0.15];
        let shape = composer.shape(&lengths).unwrap();
        assert_relative_eq!(shape[2].pose.position, Vector3::new(0.0, 0.0, 0.45), epsilon = 1e-12);
        for section in &shape {
            assert_eq!(section.config.deltax, 0.0);
            assert_eq!(section.config.deltay, 0.0);
        }
    }

    #[test]
    fn test_composer_closed_form_matches_chain() {
        let composer = MultiSectionComposer::default();
        let lengths = [0.100, 0.104, 0.098, 0.120, 0.115, 0.118, 0.090, 0.093, 0.095];
        let shape = composer.shape(&lengths).unwrap();
        let stacked = composer.real_robot(&lengths).unwrap();
        let poses = shape.map(|s| s.pose);
        assert_relative_eq!(stacked, stack_homogeneous(&poses), epsilon = 1e-12);
    }

    #[test]
    fn test_composer_rejects_zero_sum() {
        let composer = MultiSectionComposer::default();
        let mut lengths = [0.1; 9];
        lengths[3..6].copy_from_slice(&[0.0, 0.0, 0.0]);
        assert!(composer.shape(&lengths).is_err());
    }
}
