// Configuration space -> pose for one piecewise-constant-curvature section
//
// Three parameterizations describe the same circular arc:
// - Curvature   (s, k, phi):           arc length, curvature, bend-plane angle
// - BendAngle   (s, phi, theta):       arc length, bend-plane angle, bend angle
// - BendVector  (s, deltax, deltay):   arc length, bend vector
//
// The bend-vector form is canonical. The other two convert into it, and the
// per-parameterization closed forms are kept next to it as
// `fk_s2x_*` so their exact numeric behavior stays available.

use std::f64::consts::{PI, TAU};
use std::fmt;
use std::str::FromStr;

use nalgebra::{Matrix3, Matrix3x4, Matrix4, Vector3};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::rotation::Quaternion;
use super::{KinematicsError, Result};

/// Below this bend angle sin(x)/x and (1 - cos x)/x^2 use their series
const SERIES_THRESHOLD: f64 = 1e-6;

/// sin(x) / x, continuous through 0
fn sinc(x: f64) -> f64 {
    if x.abs() < SERIES_THRESHOLD {
        1.0 - x * x / 6.0
    } else {
        x.sin() / x
    }
}

/// (1 - cos x) / x^2, continuous through 0 (limit 1/2)
fn versine_ratio(x: f64) -> f64 {
    if x.abs() < SERIES_THRESHOLD {
        0.5 - x * x / 24.0
    } else {
        // 1 - cos x = 2 sin^2(x/2) keeps precision for small x
        let half = (x / 2.0).sin();
        2.0 * half * half / (x * x)
    }
}

/// Rigid pose: rotation block plus position column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub rotation: Matrix3<f64>,
    pub position: Vector3<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    pub fn new(rotation: Matrix3<f64>, position: Vector3<f64>) -> Self {
        Self { rotation, position }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity(), Vector3::zeros())
    }

    /// Straight section of arc length `s` along +z
    pub fn straight(s: f64) -> Self {
        Self::new(Matrix3::identity(), Vector3::new(0.0, 0.0, s))
    }

    /// Pure rotation about z
    pub fn twist(angle: f64) -> Self {
        Self::new(super::rotation::rot_z(angle), Vector3::zeros())
    }

    /// Build from a flat list read column by column: [rotX, rotY, rotZ, position]
    pub fn from_column_major(data: &[f64; 12]) -> Self {
        let m = Matrix3x4::from_column_slice(data);
        Self::from_matrix(&m)
    }

    pub fn from_matrix(m: &Matrix3x4<f64>) -> Self {
        Self::new(
            m.fixed_view::<3, 3>(0, 0).into_owned(),
            m.fixed_view::<3, 1>(0, 3).into_owned(),
        )
    }

    /// 3x4 matrix [R | p]
    pub fn to_matrix(&self) -> Matrix3x4<f64> {
        let mut m = Matrix3x4::zeros();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.position);
        m
    }

    /// 4x4 homogeneous transform
    pub fn to_homogeneous(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 4>(0, 0).copy_from(&self.to_matrix());
        m
    }

    pub fn from_homogeneous(m: &Matrix4<f64>) -> Self {
        Self::from_matrix(&m.fixed_view::<3, 4>(0, 0).into_owned())
    }

    /// Chain rule: `self` then `next` expressed in `self`'s frame
    pub fn compose(&self, next: &Pose) -> Pose {
        Pose::new(
            self.rotation * next.rotation,
            self.position + self.rotation * next.position,
        )
    }

    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.position + self.rotation * point
    }

    /// Orientation as a quaternion (w >= 0)
    pub fn orientation(&self) -> Quaternion {
        Quaternion::from_rotation_matrix_robust(&self.rotation)
    }

    /// `n` points on a circle of `radius` in this pose's xy-plane
    pub fn ring(&self, radius: f64, n: usize) -> Vec<Vector3<f64>> {
        (0..n)
            .map(|i| {
                let angle = -PI + TAU * i as f64 / n as f64;
                self.transform_point(&Vector3::new(radius * angle.cos(), radius * angle.sin(), 0.0))
            })
            .collect()
    }
}

/// Which configuration triple a caller works in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameterization {
    /// (s, k, phi)
    Curvature,
    /// (s, phi, theta)
    BendAngle,
    /// (s, deltax, deltay)
    BendVector,
}

impl FromStr for Parameterization {
    type Err = KinematicsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "curvature" | "jones" => Ok(Self::Curvature),
            "bend_angle" | "cosimo_old" => Ok(Self::BendAngle),
            "bend_vector" | "cosimo_new" => Ok(Self::BendVector),
            other => Err(KinematicsError::invalid(format!(
                "unknown parameterization '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Parameterization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Curvature => write!(f, "curvature"),
            Self::BendAngle => write!(f, "bend_angle"),
            Self::BendVector => write!(f, "bend_vector"),
        }
    }
}

/// Canonical section configuration: arc length and bend vector
///
/// The bend vector's magnitude is the total bend angle, its direction the
/// bend plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BendVector {
    pub s: f64,
    pub deltax: f64,
    pub deltay: f64,
}

impl BendVector {
    pub fn new(s: f64, deltax: f64, deltay: f64) -> Self {
        Self { s, deltax, deltay }
    }

    pub fn straight(s: f64) -> Self {
        Self::new(s, 0.0, 0.0)
    }

    pub fn from_array(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    /// Returns [s, deltax, deltay]
    pub fn as_array(&self) -> [f64; 3] {
        [self.s, self.deltax, self.deltay]
    }

    /// Total bend angle |delta|
    pub fn bend_angle(&self) -> f64 {
        self.deltax.hypot(self.deltay)
    }

    /// Direction of the bend plane
    pub fn bend_plane(&self) -> f64 {
        self.deltay.atan2(self.deltax)
    }

    /// The first `fraction` of this arc
    pub fn scaled(&self, fraction: f64) -> Self {
        Self::new(
            self.s * fraction,
            self.deltax * fraction,
            self.deltay * fraction,
        )
    }

    /// Tip pose of the section, singularity-free at zero bend
    pub fn pose(&self) -> Pose {
        let Self { s, deltax: dx, deltay: dy } = *self;
        let delta = self.bend_angle();
        let a = sinc(delta);
        let b = versine_ratio(delta);

        let rotation = Matrix3::new(
            1.0 - dx * dx * b,
            -dx * dy * b,
            -dx * a,
            -dx * dy * b,
            1.0 - dy * dy * b,
            -dy * a,
            dx * a,
            dy * a,
            delta.cos(),
        );
        let position = Vector3::new(-s * dx * b, -s * dy * b, s * a);

        Pose::new(rotation, position)
    }

    /// Reconstruct the bend vector from a measured base-to-tip rotation
    ///
    /// `lengths` only contributes its mean as the arc length. Exact inverse
    /// of [`BendVector::pose`]'s rotation for bend angles in (0, pi).
    pub fn from_rotation(lengths: &[f64], rotation: &Matrix3<f64>) -> Self {
        let s = if lengths.is_empty() {
            0.0
        } else {
            lengths.iter().sum::<f64>() / lengths.len() as f64
        };

        let theta = rotation[(2, 2)].clamp(-1.0, 1.0).acos();
        if theta.sin() == 0.0 {
            warn!("Bend angle {:.4} has zero sine, reporting a straight section", theta);
            return Self::straight(s);
        }

        let ratio = theta / theta.sin();
        Self::new(
            s,
            0.5 * (rotation[(2, 0)] - rotation[(0, 2)]) * ratio,
            0.5 * (rotation[(2, 1)] - rotation[(1, 2)]) * ratio,
        )
    }

    /// `n` points along the backbone from base (first) to tip (last)
    pub fn backbone(&self, n: usize) -> Vec<Vector3<f64>> {
        (0..n)
            .map(|i| {
                let fraction = if n > 1 { i as f64 / (n - 1) as f64 } else { 1.0 };
                self.scaled(fraction).pose().position
            })
            .collect()
    }
}

/// Section configuration in any of the three parameterizations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Configuration {
    Curvature { s: f64, k: f64, phi: f64 },
    BendAngle { s: f64, phi: f64, theta: f64 },
    BendVector { s: f64, deltax: f64, deltay: f64 },
}

impl From<BendVector> for Configuration {
    fn from(v: BendVector) -> Self {
        Self::BendVector {
            s: v.s,
            deltax: v.deltax,
            deltay: v.deltay,
        }
    }
}

impl Configuration {
    /// Interpret a raw triple in the given parameterization
    pub fn from_array(parameterization: Parameterization, v: [f64; 3]) -> Self {
        match parameterization {
            Parameterization::Curvature => Self::Curvature {
                s: v[0],
                k: v[1],
                phi: v[2],
            },
            Parameterization::BendAngle => Self::BendAngle {
                s: v[0],
                phi: v[1],
                theta: v[2],
            },
            Parameterization::BendVector => Self::BendVector {
                s: v[0],
                deltax: v[1],
                deltay: v[2],
            },
        }
    }

    /// Raw triple in this configuration's own order
    pub fn as_array(&self) -> [f64; 3] {
        match *self {
            Self::Curvature { s, k, phi } => [s, k, phi],
            Self::BendAngle { s, phi, theta } => [s, phi, theta],
            Self::BendVector { s, deltax, deltay } => [s, deltax, deltay],
        }
    }

    pub fn parameterization(&self) -> Parameterization {
        match self {
            Self::Curvature { .. } => Parameterization::Curvature,
            Self::BendAngle { .. } => Parameterization::BendAngle,
            Self::BendVector { .. } => Parameterization::BendVector,
        }
    }

    pub fn arc_length(&self) -> f64 {
        self.as_array()[0]
    }

    /// Convert into the canonical bend-vector form
    ///
    /// The bend-angle closed form measures phi from the opposite bend
    /// direction to the curvature form, hence the sign flip.
    pub fn to_bend_vector(&self) -> BendVector {
        match *self {
            Self::Curvature { s, k, phi } => {
                let delta = k * s;
                BendVector::new(s, delta * phi.cos(), delta * phi.sin())
            }
            Self::BendAngle { s, phi, theta } => {
                BendVector::new(s, -theta * phi.cos(), -theta * phi.sin())
            }
            Self::BendVector { s, deltax, deltay } => BendVector::new(s, deltax, deltay),
        }
    }

    /// Re-express in another parameterization
    ///
    /// Curvature is undefined for a zero-length section; it is reported as 0.
    pub fn convert(&self, target: Parameterization) -> Self {
        let v = self.to_bend_vector();
        let delta = v.bend_angle();
        match target {
            Parameterization::Curvature => Self::Curvature {
                s: v.s,
                k: if v.s == 0.0 { 0.0 } else { delta / v.s },
                phi: v.bend_plane(),
            },
            Parameterization::BendAngle => Self::BendAngle {
                s: v.s,
                phi: (-v.deltay).atan2(-v.deltax),
                theta: delta,
            },
            Parameterization::BendVector => v.into(),
        }
    }

    /// Tip pose through the canonical form
    pub fn pose(&self) -> Pose {
        self.to_bend_vector().pose()
    }

    /// Tip pose through the closed form of this configuration's own family
    pub fn legacy_pose(&self) -> Pose {
        match *self {
            Self::Curvature { s, k, phi } => fk_s2x_jones(s, k, phi),
            Self::BendAngle { s, phi, theta } => fk_s2x_cosimo_old(s, phi, theta),
            Self::BendVector { s, deltax, deltay } => fk_s2x_cosimo_new(s, deltax, deltay),
        }
    }
}

// Closed forms
//
// Each assembles the 3x4 pose column by column from a flat list of 12
// entries. Zero bend makes them 0/0; that case returns the straight pose.

/// Curvature form (s, k, phi)
pub fn fk_s2x_jones(s: f64, k: f64, phi: f64) -> Pose {
    if k == 0.0 {
        return Pose::straight(s);
    }

    let (sin_phi, cos_phi) = phi.sin_cos();
    let (sin_ks, cos_ks) = (k * s).sin_cos();
    let inv_k = 1.0 / k;
    let versine = cos_ks - 1.0;
    let cx = cos_phi * sin_ks;
    let cy = sin_phi * sin_ks;
    let cross = cos_phi * sin_phi * versine;
    let cos_sq = cos_phi * cos_phi * versine;

    Pose::from_column_major(&[
        cos_sq + 1.0,
        cross,
        cx,
        cross,
        cos_ks - cos_sq,
        cy,
        -cx,
        -cy,
        cos_ks,
        cos_phi * inv_k * versine,
        sin_phi * inv_k * versine,
        sin_ks * inv_k,
    ])
}

/// Bend-angle form (s, phi, theta)
pub fn fk_s2x_cosimo_old(s: f64, phi: f64, theta: f64) -> Pose {
    if theta == 0.0 {
        return Pose::straight(s);
    }

    let (sin_phi, cos_phi) = phi.sin_cos();
    let (sin_theta, cos_theta) = theta.sin_cos();
    let inv_theta = 1.0 / theta;
    let cx = cos_phi * sin_theta;
    let cy = sin_phi * sin_theta;
    let versine = cos_theta - 1.0;
    let cross = cos_phi * sin_phi * versine;

    Pose::from_column_major(&[
        cos_phi * cos_phi * versine + 1.0,
        cross,
        -cx,
        cross,
        sin_phi * sin_phi * versine + 1.0,
        -cy,
        cx,
        cy,
        cos_theta,
        -s * cos_phi * inv_theta * versine,
        -s * sin_phi * inv_theta * versine,
        s * sin_theta * inv_theta,
    ])
}

/// Bend-vector form (s, deltax, deltay)
pub fn fk_s2x_cosimo_new(s: f64, deltax: f64, deltay: f64) -> Pose {
    let dx_sq = deltax * deltax;
    let dy_sq = deltay * deltay;
    let delta_sq = dx_sq + dy_sq;
    if delta_sq == 0.0 {
        return Pose::straight(s);
    }

    let inv_delta_sq = 1.0 / delta_sq;
    let delta = delta_sq.sqrt();
    let inv_delta = 1.0 / delta;
    let (sin_delta, cos_delta) = delta.sin_cos();
    let versine = cos_delta - 1.0;
    let cx = deltax * inv_delta * sin_delta;
    let cy = deltay * inv_delta * sin_delta;
    let cross = deltax * deltay * inv_delta_sq * versine;

    Pose::from_column_major(&[
        dx_sq * inv_delta_sq * versine + 1.0,
        cross,
        cx,
        cross,
        dy_sq * inv_delta_sq * versine + 1.0,
        cy,
        -cx,
        -cy,
        cos_delta,
        deltax * s * inv_delta_sq * versine,
        deltay * s * inv_delta_sq * versine,
        s * inv_delta * sin_delta,
    ])
}
