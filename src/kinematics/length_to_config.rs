// Tendon lengths -> section configuration
//
// Three tendons sit at 120 degree spacing, a distance `d` from the section's
// center line. Their lengths determine arc length (the mean) and the bend,
// which is reported in one of three parameterizations.

use nalgebra::Complex;

use super::config_to_pose::{BendVector, Configuration, Parameterization};
use super::{KinematicsError, Result};

/// Distance from the center line to the tendon fixpoints (meters)
pub const TENDON_OFFSET: f64 = 0.054 / 2.0;

const SQRT_3: f64 = 1.732_050_807_568_877_2;

fn check_inputs(sum: f64, d: f64) -> Result<()> {
    if sum == 0.0 {
        return Err(KinematicsError::degenerate("tendon lengths sum to zero"));
    }
    if d == 0.0 {
        return Err(KinematicsError::degenerate("tendon offset d is zero"));
    }
    Ok(())
}

/// Sum of squares minus pairwise products. Zero iff all lengths are equal.
///
/// Evaluated as half the sum of squared differences, which is exactly zero
/// for equal lengths and never negative.
fn discriminant(l: &[f64; 3]) -> f64 {
    let [l1, l2, l3] = *l;
    ((l1 - l2).powi(2) + (l2 - l3).powi(2) + (l1 - l3).powi(2)) / 2.0
}

/// Bend-plane angle from the 120 degree tendon layout
fn bend_plane(l: &[f64; 3]) -> f64 {
    let [l1, l2, l3] = *l;
    (SQRT_3 * (-2.0 * l1 + l2 + l3)).atan2(3.0 * l2 - 3.0 * l3)
}

/// Curvature form: returns [s, k, phi]
pub fn fk_l2s_jones(lengths: &[f64; 3], d: f64) -> Result<[f64; 3]> {
    let sum: f64 = lengths.iter().sum();
    check_inputs(sum, d)?;

    let s: f64 = lengths.iter().map(|l| l / 3.0).sum();
    let k = 2.0 * discriminant(lengths).sqrt() / (d * sum);
    Ok([s, k, bend_plane(lengths)])
}

/// Bend-angle form: returns [s, phi, theta] with theta = s * k
pub fn fk_l2s_cosimo_old(lengths: &[f64; 3], d: f64) -> Result<[f64; 3]> {
    let sum: f64 = lengths.iter().sum();
    check_inputs(sum, d)?;

    let s: f64 = lengths.iter().map(|l| l / 3.0).sum();
    let theta = s * discriminant(lengths).sqrt() * 2.0 / (d * sum);
    Ok([s, bend_plane(lengths), theta])
}

/// Bend-vector form: returns [s, deltax, deltay]
///
/// The tendons project onto the two bend axes with a 60 degree offset.
/// All-equal lengths give a zero bend vector.
pub fn fk_l2s_cosimo_new(lengths: &[f64; 3], d: f64) -> Result<[f64; 3]> {
    let sum: f64 = lengths.iter().sum();
    check_inputs(sum, d)?;

    let [l1, l2, l3] = *lengths;
    let s: f64 = lengths.iter().map(|l| l / 3.0).sum();

    let axis_x = 3.0 * l2 - 3.0 * l3;
    let axis_y = SQRT_3 * (l2 + l3 - 2.0 * l1);
    let axis_norm = axis_x.hypot(axis_y);
    if axis_norm == 0.0 {
        return Ok([s, 0.0, 0.0]);
    }

    let scale = s * discriminant(lengths).sqrt() / (d * sum * axis_norm);
    let deltax = scale * (-3.0 * l2 + 3.0 * l3) * -2.0;
    let deltay = scale * (SQRT_3 * (l2 + l3 - 2.0 * l1)) * 2.0;
    Ok([s, deltax, deltay])
}

/// Bend-vector form on complex-encoded lengths
///
/// Differential length measurements elsewhere in the system are carried as
/// complex numbers; the real and imaginary parts enter the projection
/// separately. For purely real input this equals [`fk_l2s_cosimo_new`].
pub fn fk_l2s_cosimo_new_complex(lengths: &[Complex<f64>; 3], d: f64) -> Result<[Complex<f64>; 3]> {
    let [l1, l2, l3] = *lengths;
    let sum = l1 + l2 + l3;
    if sum == Complex::new(0.0, 0.0) {
        return Err(KinematicsError::degenerate("tendon lengths sum to zero"));
    }
    if d == 0.0 {
        return Err(KinematicsError::degenerate("tendon offset d is zero"));
    }

    let s = l1 / 3.0 + l2 / 3.0 + l3 / 3.0;
    let disc = l1 * l1 + l2 * l2 + l3 * l3 - l1 * l2 - l1 * l3 - l2 * l3;
    let axis = l2 * 3.0 - l3 * 3.0 + (l2 + l3 - l1 * 2.0) * Complex::new(0.0, SQRT_3);
    let axis_norm = axis.norm();
    if axis_norm == 0.0 {
        let zero = Complex::new(0.0, 0.0);
        return Ok([s, zero, zero]);
    }

    let scale = s * disc.sqrt() / (sum * d * axis_norm);
    let deltax = scale * (-3.0 * l2.re + 3.0 * l3.re + SQRT_3 * (l2.im + l3.im - 2.0 * l1.im)) * -2.0;
    let deltay = scale * (3.0 * l2.im - 3.0 * l3.im + SQRT_3 * (l2.re + l3.re - 2.0 * l1.re)) * 2.0;
    Ok([s, deltax, deltay])
}

/// Bend-vector form for three stacked sections
///
/// Lengths 0..3, 3..6 and 6..9 belong to sections 1, 2 and 3. Sections are
/// independent at this stage. Returns [s1, dx1, dy1, s2, dx2, dy2, s3, dx3, dy3].
pub fn fk_l2s_three_sections(lengths: &[f64; 9], d: f64) -> Result<[f64; 9]> {
    let mut out = [0.0; 9];
    for (section, chunk) in lengths.chunks_exact(3).enumerate() {
        let triple = [chunk[0], chunk[1], chunk[2]];
        let sdxdy = fk_l2s_cosimo_new(&triple, d)?;
        out[section * 3..section * 3 + 3].copy_from_slice(&sdxdy);
    }
    Ok(out)
}

impl Configuration {
    /// Configuration of one section from its three tendon lengths
    pub fn from_lengths(lengths: &[f64; 3], d: f64, parameterization: Parameterization) -> Result<Self> {
        let raw = match parameterization {
            Parameterization::Curvature => fk_l2s_jones(lengths, d)?,
            Parameterization::BendAngle => fk_l2s_cosimo_old(lengths, d)?,
            Parameterization::BendVector => fk_l2s_cosimo_new(lengths, d)?,
        };
        Ok(Self::from_array(parameterization, raw))
    }
}

impl BendVector {
    /// Canonical configuration of one section from its tendon lengths
    pub fn from_lengths(lengths: &[f64; 3], d: f64) -> Result<Self> {
        Ok(Self::from_array(fk_l2s_cosimo_new(lengths, d)?))
    }
}
