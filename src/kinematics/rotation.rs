// Quaternion, rotation-matrix and Euler-angle conversions
//
// Quaternions are stored as (w, x, y, z). Rotation matrices are nalgebra
// `Matrix3<f64>` whose columns are the images of the basis axes.

use std::f64::consts::FRAC_PI_2;
use std::fmt;
use std::ops::Mul;
use std::str::FromStr;

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{KinematicsError, Result};

/// Tolerance used to detect the Gimbal-lock boundary in Euler extraction
pub const GIMBAL_TOLERANCE: f64 = 1e-12;

/// Below this scalar part the trace formula divides by a near-zero value
pub const UNSTABLE_W: f64 = 1e-3;

/// Quaternion (w, x, y, z) with real scalar part `w`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl fmt::Display for Quaternion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[w: {:.6}, x: {:.6}, y: {:.6}, z: {:.6}]",
            self.w, self.x, self.y, self.z
        )
    }
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    pub fn from_array(q: [f64; 4]) -> Self {
        Self::new(q[0], q[1], q[2], q[3])
    }

    /// Returns components as array [w, x, y, z]
    pub fn as_array(&self) -> [f64; 4] {
        [self.w, self.x, self.y, self.z]
    }

    /// Euclidean norm of all four components
    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Scale to unit length
    ///
    /// Fails on an exactly zero quaternion. See [`normalize_batch`] for the
    /// batch variant, which does not.
    pub fn normalize(&self) -> Result<Self> {
        let norm = self.norm();
        if norm == 0.0 {
            return Err(KinematicsError::degenerate(
                "zero vector cannot be normalized as a quaternion",
            ));
        }
        Ok(self.scaled(1.0 / norm))
    }

    fn scaled(&self, factor: f64) -> Self {
        Self::new(
            self.w * factor,
            self.x * factor,
            self.y * factor,
            self.z * factor,
        )
    }

    /// Conjugate: negated vector part, same scalar part
    pub fn inverse(&self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Hamilton product `self * rhs`
    ///
    /// The result rotates by `rhs` first, then by `self`:
    /// `R(a.multiply(b)) == R(a) * R(b)`.
    pub fn multiply(&self, rhs: &Self) -> Self {
        let (w1, x1, y1, z1) = (self.w, self.x, self.y, self.z);
        let (w2, x2, y2, z2) = (rhs.w, rhs.x, rhs.y, rhs.z);

        Self {
            w: w1 * w2 - x1 * x2 - y1 * y2 - z1 * z2,
            x: w1 * x2 + x1 * w2 + y1 * z2 - z1 * y2,
            y: w1 * y2 - x1 * z2 + y1 * w2 + z1 * x2,
            z: w1 * z2 + x1 * y2 - y1 * x2 + z1 * w2,
        }
    }

    /// Orientation of `self` expressed in the frame of `base`
    ///
    /// Used to get the tip orientation relative to the arm base when both
    /// come from the same world-frame sensor read.
    pub fn relative_to(&self, base: &Self) -> Self {
        base.inverse().multiply(self)
    }

    /// Convert to a rotation matrix (normalizes first)
    pub fn to_rotation_matrix(&self) -> Result<Matrix3<f64>> {
        let Self { w, x, y, z } = self.normalize()?;

        Ok(Matrix3::new(
            1.0 - 2.0 * y * y - 2.0 * z * z,
            2.0 * x * y - 2.0 * w * z,
            2.0 * x * z + 2.0 * w * y,
            2.0 * x * y + 2.0 * w * z,
            1.0 - 2.0 * x * x - 2.0 * z * z,
            2.0 * y * z - 2.0 * w * x,
            2.0 * x * z - 2.0 * w * y,
            2.0 * y * z + 2.0 * w * x,
            1.0 - 2.0 * x * x - 2.0 * y * y,
        ))
    }

    /// Convert a rotation matrix with the trace formula
    ///
    /// Assumes `w` is the dominant component. Rotations close to 180 degrees
    /// have `w` near zero; those still convert but lose precision and log a
    /// warning. A matrix with `1 + trace <= 0` has no answer here and fails.
    /// [`Quaternion::from_rotation_matrix_robust`] handles every rotation.
    pub fn from_rotation_matrix(r: &Matrix3<f64>) -> Result<Self> {
        let radicand = 1.0 + r[(0, 0)] + r[(1, 1)] + r[(2, 2)];
        if radicand.is_nan() || radicand <= 0.0 {
            return Err(KinematicsError::degenerate(format!(
                "trace formula undefined for 1 + trace = {radicand}"
            )));
        }

        let w = radicand.sqrt() / 2.0;
        if w < UNSTABLE_W {
            warn!("Rotation near 180 degrees (w = {:.3e}), quaternion is unstable", w);
        }

        Ok(Self {
            w,
            x: (r[(2, 1)] - r[(1, 2)]) / (4.0 * w),
            y: (r[(0, 2)] - r[(2, 0)]) / (4.0 * w),
            z: (r[(1, 0)] - r[(0, 1)]) / (4.0 * w),
        })
    }

    /// Convert a rotation matrix picking the largest of w², x², y², z²
    ///
    /// The result has a non-negative `w`.
    pub fn from_rotation_matrix_robust(r: &Matrix3<f64>) -> Self {
        let (m00, m11, m22) = (r[(0, 0)], r[(1, 1)], r[(2, 2)]);
        let trace = m00 + m11 + m22;

        let q = if trace > 0.0 {
            let s = (trace + 1.0).sqrt() * 2.0;
            Self::new(
                0.25 * s,
                (r[(2, 1)] - r[(1, 2)]) / s,
                (r[(0, 2)] - r[(2, 0)]) / s,
                (r[(1, 0)] - r[(0, 1)]) / s,
            )
        } else if m00 > m11 && m00 > m22 {
            let s = (1.0 + m00 - m11 - m22).sqrt() * 2.0;
            Self::new(
                (r[(2, 1)] - r[(1, 2)]) / s,
                0.25 * s,
                (r[(0, 1)] + r[(1, 0)]) / s,
                (r[(0, 2)] + r[(2, 0)]) / s,
            )
        } else if m11 > m22 {
            let s = (1.0 + m11 - m00 - m22).sqrt() * 2.0;
            Self::new(
                (r[(0, 2)] - r[(2, 0)]) / s,
                (r[(0, 1)] + r[(1, 0)]) / s,
                0.25 * s,
                (r[(1, 2)] + r[(2, 1)]) / s,
            )
        } else {
            let s = (1.0 + m22 - m00 - m11).sqrt() * 2.0;
            Self::new(
                (r[(1, 0)] - r[(0, 1)]) / s,
                (r[(0, 2)] + r[(2, 0)]) / s,
                (r[(1, 2)] + r[(2, 1)]) / s,
                0.25 * s,
            )
        };

        if q.w < 0.0 { q.scaled(-1.0) } else { q }
    }

    /// Euler angles of this orientation in the given order
    pub fn to_euler(&self, order: EulerOrder) -> Result<EulerAngles> {
        Ok(rotation_to_euler(&self.to_rotation_matrix()?, order))
    }

    /// Quaternion from Euler angles, through the rotation matrix
    pub fn from_euler(euler: &EulerAngles) -> Result<Self> {
        Self::from_rotation_matrix(&euler_to_rotation(euler))
    }
}

impl Mul for Quaternion {
    type Output = Quaternion;

    fn mul(self, rhs: Quaternion) -> Quaternion {
        self.multiply(&rhs)
    }
}

/// Normalize many quaternions at once
///
/// Unlike [`Quaternion::normalize`] a zero-norm entry does not fail: its norm
/// is taken as 1 and it passes through unchanged.
pub fn normalize_batch(quaternions: &[Quaternion]) -> Vec<Quaternion> {
    quaternions
        .iter()
        .map(|q| {
            let norm = q.norm();
            let norm = if norm == 0.0 { 1.0 } else { norm };
            q.scaled(1.0 / norm)
        })
        .collect()
}

/// Axis sequence of an Euler-angle triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EulerOrder {
    /// `[roll, pitch, yaw]`, R = Rx * Ry * Rz
    Xyz,
    /// `[yaw, pitch, roll]`, R = Rz * Ry * Rx
    Zyx,
}

impl FromStr for EulerOrder {
    type Err = KinematicsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "XYZ" => Ok(Self::Xyz),
            "ZYX" => Ok(Self::Zyx),
            other => Err(KinematicsError::invalid(format!(
                "unsupported rotation order '{other}', expected 'XYZ' or 'ZYX'"
            ))),
        }
    }
}

impl fmt::Display for EulerOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xyz => write!(f, "XYZ"),
            Self::Zyx => write!(f, "ZYX"),
        }
    }
}

/// Euler angles in radians, tagged with the order that gives them meaning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EulerAngles {
    pub order: EulerOrder,
    pub angles: [f64; 3],
}

impl EulerAngles {
    pub fn new(order: EulerOrder, angles: [f64; 3]) -> Self {
        Self { order, angles }
    }

    pub fn zyx(yaw: f64, pitch: f64, roll: f64) -> Self {
        Self::new(EulerOrder::Zyx, [yaw, pitch, roll])
    }

    pub fn xyz(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self::new(EulerOrder::Xyz, [roll, pitch, yaw])
    }

    pub fn roll(&self) -> f64 {
        match self.order {
            EulerOrder::Xyz => self.angles[0],
            EulerOrder::Zyx => self.angles[2],
        }
    }

    pub fn pitch(&self) -> f64 {
        self.angles[1]
    }

    pub fn yaw(&self) -> f64 {
        match self.order {
            EulerOrder::Xyz => self.angles[2],
            EulerOrder::Zyx => self.angles[0],
        }
    }

    /// Angles converted to degrees, order unchanged
    pub fn to_degrees(&self) -> [f64; 3] {
        self.angles.map(f64::to_degrees)
    }
}

/// Elementary rotation about X
pub fn rot_x(angle: f64) -> Matrix3<f64> {
    let (s, c) = angle.sin_cos();
    Matrix3::new(1.0, 0.0, 0.0, 0.0, c, -s, 0.0, s, c)
}

/// Elementary rotation about Y
pub fn rot_y(angle: f64) -> Matrix3<f64> {
    let (s, c) = angle.sin_cos();
    Matrix3::new(c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c)
}

/// Elementary rotation about Z
pub fn rot_z(angle: f64) -> Matrix3<f64> {
    let (s, c) = angle.sin_cos();
    Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0)
}

/// Build a rotation matrix from Euler angles
pub fn euler_to_rotation(euler: &EulerAngles) -> Matrix3<f64> {
    let [a, b, c] = euler.angles;
    match euler.order {
        EulerOrder::Xyz => rot_x(a) * rot_y(b) * rot_z(c),
        EulerOrder::Zyx => rot_z(a) * rot_y(b) * rot_x(c),
    }
}

/// Extract Euler angles from a rotation matrix
///
/// At the boundary element reaching +-1 (`R[2,0]` for ZYX, `R[2,2]` for XYZ)
/// the lost degree of freedom is assigned to one angle and the other is
/// forced to zero.
pub fn rotation_to_euler(r: &Matrix3<f64>, order: EulerOrder) -> EulerAngles {
    match order {
        EulerOrder::Xyz => {
            let r22 = r[(2, 2)];
            // R[2,2] = +-1 also holds for any pure rotation about z, whose
            // angles then do not reconstruct the matrix
            let (roll, pitch, yaw) = if r22 >= 1.0 - GIMBAL_TOLERANCE {
                warn!("XYZ extraction at R[2,2] = {:.3}, yaw forced to zero", r22);
                (r[(0, 1)].atan2(r[(0, 0)]), FRAC_PI_2, 0.0)
            } else if r22 <= -1.0 + GIMBAL_TOLERANCE {
                warn!("XYZ extraction at R[2,2] = {:.3}, yaw forced to zero", r22);
                (-r[(0, 1)].atan2(r[(0, 0)]), -FRAC_PI_2, 0.0)
            } else {
                (
                    (-r[(1, 2)]).atan2(r22),
                    r[(0, 2)].clamp(-1.0, 1.0).asin(),
                    (-r[(0, 1)]).atan2(r[(0, 0)]),
                )
            };
            EulerAngles::xyz(roll, pitch, yaw)
        }
        EulerOrder::Zyx => {
            let r20 = r[(2, 0)];
            let (yaw, pitch, roll) = if r20 >= 1.0 - GIMBAL_TOLERANCE {
                ((-r[(1, 2)]).atan2(r[(1, 1)]), -FRAC_PI_2, 0.0)
            } else if r20 <= -1.0 + GIMBAL_TOLERANCE {
                (-(-r[(1, 2)]).atan2(r[(1, 1)]), FRAC_PI_2, 0.0)
            } else {
                (
                    r[(1, 0)].atan2(r[(0, 0)]),
                    (-r20).asin(),
                    r[(2, 1)].atan2(r[(2, 2)]),
                )
            };
            EulerAngles::zyx(yaw, pitch, roll)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    /// Deterministic spread of unit quaternions with |w| > 0.1
    fn sample_quaternions() -> Vec<Quaternion> {
        let mut out = Vec::new();
        for i in 0..6 {
            for j in 0..6 {
                let w = 0.15 + 0.15 * i as f64;
                let q = Quaternion::new(
                    w,
                    (j as f64 * 0.9).sin(),
                    (j as f64 * 1.7 + 0.3).cos(),
                    0.4 - 0.2 * j as f64,
                );
                out.push(q.normalize().unwrap());
            }
        }
        out
    }

    fn assert_orthonormal(r: &Matrix3<f64>) {
        assert_relative_eq!(r.transpose() * r, Matrix3::identity(), epsilon = 1e-12);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_normalize_idempotent() {
        let q = Quaternion::new(1.0, -2.0, 3.5, 0.25);
        let once = q.normalize().unwrap();
        let twice = once.normalize().unwrap();
        assert_relative_eq!(once.norm(), 1.0, epsilon = 1e-12);
        for (a, b) in once.as_array().iter().zip(twice.as_array()) {
            assert_relative_eq!(*a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_normalize_zero_fails() {
        let err = Quaternion::new(0.0, 0.0, 0.0, 0.0).normalize().unwrap_err();
        assert!(matches!(err, KinematicsError::DegenerateInput { .. }));
    }

    #[test]
    fn test_batch_normalize_passes_zero_through() {
        // The batch path does not fail on a zero row, unlike the single path.
        let batch = [
            Quaternion::new(0.0, 0.0, 0.0, 0.0),
            Quaternion::new(0.0, 3.0, 0.0, 4.0),
        ];
        let out = normalize_batch(&batch);
        assert_eq!(out[0], Quaternion::new(0.0, 0.0, 0.0, 0.0));
        assert_relative_eq!(out[1].x, 0.6, epsilon = 1e-12);
        assert_relative_eq!(out[1].z, 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_multiply_by_inverse_is_identity() {
        for q in sample_quaternions() {
            let id = q.multiply(&q.inverse());
            assert_relative_eq!(id.w, 1.0, epsilon = 1e-12);
            assert_relative_eq!(id.x, 0.0, epsilon = 1e-12);
            assert_relative_eq!(id.y, 0.0, epsilon = 1e-12);
            assert_relative_eq!(id.z, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_multiply_matches_matrix_composition() {
        let samples = sample_quaternions();
        for pair in samples.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let composed = (a * b).to_rotation_matrix().unwrap();
            let expected = a.to_rotation_matrix().unwrap() * b.to_rotation_matrix().unwrap();
            assert_relative_eq!(composed, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_multiply_is_not_commutative() {
        let a = Quaternion::from_euler(&EulerAngles::zyx(0.3, 0.0, 0.0)).unwrap();
        let b = Quaternion::from_euler(&EulerAngles::zyx(0.0, 0.0, 0.7)).unwrap();
        assert!(((a * b).x - (b * a).x).abs() > 1e-3 || ((a * b).y - (b * a).y).abs() > 1e-3);
    }

    #[test]
    fn test_rotation_matrix_is_orthonormal_for_unnormalized_input() {
        let r = Quaternion::new(2.0, -1.0, 0.5, 3.0).to_rotation_matrix().unwrap();
        assert_orthonormal(&r);
        assert!(Quaternion::new(0.0, 0.0, 0.0, 0.0).to_rotation_matrix().is_err());
    }

    #[test]
    fn test_quaternion_matrix_round_trip() {
        for q in sample_quaternions() {
            let back = Quaternion::from_rotation_matrix(&q.to_rotation_matrix().unwrap()).unwrap();
            // q and -q are the same rotation
            let sign = if back.w * q.w < 0.0 { -1.0 } else { 1.0 };
            for (a, b) in q.as_array().iter().zip(back.as_array()) {
                assert_relative_eq!(*a, sign * b, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_trace_formula_fails_at_half_turn() {
        // 180 degrees about X: w = 0, the trace formula divides by zero
        let r = rot_x(PI);
        assert!(Quaternion::from_rotation_matrix(&r).is_err());

        let q = Quaternion::from_rotation_matrix_robust(&r);
        assert_relative_eq!(q.x.abs(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(q.to_rotation_matrix().unwrap(), r, epsilon = 1e-12);
    }

    #[test]
    fn test_trace_formula_near_half_turn_still_converts() {
        let r = rot_x(PI - 1e-4);
        let q = Quaternion::from_rotation_matrix(&r).unwrap();
        assert!(q.w > 0.0 && q.w < UNSTABLE_W);
        assert_relative_eq!(q.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(q.to_rotation_matrix().unwrap(), r, epsilon = 1e-6);
    }

    #[test]
    fn test_robust_conversion_agrees_with_trace_formula() {
        for q in sample_quaternions() {
            let r = q.to_rotation_matrix().unwrap();
            let robust = Quaternion::from_rotation_matrix_robust(&r);
            let trace = Quaternion::from_rotation_matrix(&r).unwrap();
            for (a, b) in robust.as_array().iter().zip(trace.as_array()) {
                assert_relative_eq!(*a, b, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_euler_round_trip_both_orders() {
        let cases = [
            [0.3, -0.4, 1.2],
            [-2.5, 0.9, 0.1],
            [1.0, 1.2, -3.0],
            [0.05, -1.3, 2.2],
        ];
        for order in [EulerOrder::Zyx, EulerOrder::Xyz] {
            for angles in cases {
                let e = EulerAngles::new(order, angles);
                let back = rotation_to_euler(&euler_to_rotation(&e), order);
                assert_eq!(back.order, order);
                for (a, b) in angles.iter().zip(back.angles) {
                    assert_relative_eq!(*a, b, epsilon = 1e-9);
                }
            }
        }
    }

    #[test]
    fn test_zyx_composition_order() {
        let e = EulerAngles::zyx(0.4, 0.2, -0.6);
        let expected = rot_z(0.4) * rot_y(0.2) * rot_x(-0.6);
        assert_relative_eq!(euler_to_rotation(&e), expected, epsilon = 1e-15);

        let e = EulerAngles::xyz(0.4, 0.2, -0.6);
        let expected = rot_x(0.4) * rot_y(0.2) * rot_z(-0.6);
        assert_relative_eq!(euler_to_rotation(&e), expected, epsilon = 1e-15);
    }

    #[test]
    fn test_zyx_gimbal_lock_branches() {
        // pitch = -pi/2 gives R[2,0] = 1
        let r = euler_to_rotation(&EulerAngles::zyx(0.7, -FRAC_PI_2, 0.0));
        assert_eq!(r[(2, 0)], 1.0);
        let e = rotation_to_euler(&r, EulerOrder::Zyx);
        assert_eq!(e.pitch(), -FRAC_PI_2);
        assert_eq!(e.roll(), 0.0);
        assert!(e.yaw().is_finite());
        assert_relative_eq!(euler_to_rotation(&e), r, epsilon = 1e-12);

        // pitch = pi/2 gives R[2,0] = -1
        let r = euler_to_rotation(&EulerAngles::zyx(-0.3, FRAC_PI_2, 0.0));
        assert_eq!(r[(2, 0)], -1.0);
        let e = rotation_to_euler(&r, EulerOrder::Zyx);
        assert_eq!(e.pitch(), FRAC_PI_2);
        assert_eq!(e.roll(), 0.0);
        assert!(e.yaw().is_finite());
    }

    #[test]
    fn test_xyz_boundary_tests_r22() {
        // The XYZ boundary looks at R[2,2]: any pure yaw lands on it.
        let r = rot_z(0.5);
        let e = rotation_to_euler(&r, EulerOrder::Xyz);
        assert_relative_eq!(e.roll(), -0.5, epsilon = 1e-12);
        assert_eq!(e.pitch(), FRAC_PI_2);
        assert_eq!(e.yaw(), 0.0);

        // the boundary angles do not rebuild the yaw
        let rebuilt = euler_to_rotation(&e);
        assert!((rebuilt - r).norm() > 0.5);

        let e = rotation_to_euler(&rot_x(PI), EulerOrder::Xyz);
        assert_eq!(e.pitch(), -FRAC_PI_2);
        assert_eq!(e.yaw(), 0.0);
    }

    #[test]
    fn test_quaternion_euler_round_trip() {
        for order in [EulerOrder::Zyx, EulerOrder::Xyz] {
            let e = EulerAngles::new(order, [0.2, 0.3, -0.9]);
            let q = Quaternion::from_euler(&e).unwrap();
            let back = q.to_euler(order).unwrap();
            for (a, b) in e.angles.iter().zip(back.angles) {
                assert_relative_eq!(*a, b, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_order_parsing() {
        assert_eq!("ZYX".parse::<EulerOrder>().unwrap(), EulerOrder::Zyx);
        assert_eq!("XYZ".parse::<EulerOrder>().unwrap(), EulerOrder::Xyz);
        let err = "ZXZ".parse::<EulerOrder>().unwrap_err();
        assert!(matches!(err, KinematicsError::InvalidParameter { .. }));
    }

    #[test]
    fn test_relative_orientation() {
        let base = Quaternion::from_euler(&EulerAngles::zyx(0.5, 0.1, 0.0)).unwrap();
        let local = Quaternion::from_euler(&EulerAngles::zyx(0.0, 0.3, 0.2)).unwrap();
        let tip = base * local;
        let rel = tip.relative_to(&base);
        for (a, b) in rel.as_array().iter().zip(local.as_array()) {
            assert_relative_eq!(*a, b, epsilon = 1e-12);
        }
    }
}
