// Tendon length <-> motor position conversion
//
// Each tendon winds on a pulley driven by one motor. Winding in (positive
// ticks from the reference pose) shortens the tendon.

use std::f64::consts::TAU;

/// Motor resolution: 4096 steps per revolution
pub const TICKS_PER_REVOLUTION: f64 = 4096.0;

/// Pulley radius in meters
pub const PULLEY_RADIUS: f64 = 0.010;

/// Error types for calibration data
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalibrationError {
    #[error("Expected {expected} values, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("Pulley radius and tick angle must be non-zero")]
    DegenerateGeometry,
}

pub type Result<T> = std::result::Result<T, CalibrationError>;

/// Mechanical constants of the tendon transmission
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TendonGeometry {
    pub pulley_radius: f64,
    /// Radians per motor tick
    pub tick_angle: f64,
}

impl Default for TendonGeometry {
    fn default() -> Self {
        Self {
            pulley_radius: PULLEY_RADIUS,
            tick_angle: TAU / TICKS_PER_REVOLUTION,
        }
    }
}

impl TendonGeometry {
    /// Tendon travel per motor tick (meters)
    pub fn meters_per_tick(&self) -> f64 {
        self.tick_angle * self.pulley_radius
    }

    /// Tendon lengths from present motor positions
    ///
    /// `L = Lr - (p - p_r) * tick_angle * r_pulley` for every motor.
    pub fn lengths_from_ticks(
        &self,
        reference_lengths: &[f64],
        reference_ticks: &[i32],
        ticks: &[i32],
    ) -> Result<Vec<f64>> {
        check_len(reference_lengths.len(), reference_ticks.len())?;
        check_len(reference_lengths.len(), ticks.len())?;

        let step = self.meters_per_tick();
        Ok(reference_lengths
            .iter()
            .zip(reference_ticks)
            .zip(ticks)
            .map(|((&lr, &pr), &p)| lr - (p as f64 - pr as f64) * step)
            .collect())
    }

    /// Motor positions that produce the requested tendon lengths
    ///
    /// `p = (Lr - L) / r_pulley / tick_angle + p_r`, rounded to the nearest tick.
    pub fn ticks_from_lengths(
        &self,
        reference_ticks: &[i32],
        reference_lengths: &[f64],
        lengths: &[f64],
    ) -> Result<Vec<i32>> {
        check_len(reference_ticks.len(), reference_lengths.len())?;
        check_len(reference_ticks.len(), lengths.len())?;
        if self.pulley_radius == 0.0 || self.tick_angle == 0.0 {
            return Err(CalibrationError::DegenerateGeometry);
        }

        Ok(reference_ticks
            .iter()
            .zip(reference_lengths)
            .zip(lengths)
            .map(|((&pr, &lr), &l)| {
                let p = (lr - l) / self.pulley_radius / self.tick_angle + pr as f64;
                p.round() as i32
            })
            .collect())
    }
}

fn check_len(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(CalibrationError::LengthMismatch { expected, got });
    }
    Ok(())
}

/// Signed homing offset from the raw 32-bit register value
pub fn decode_homing_offset(raw: u32) -> i32 {
    raw as i32
}

/// Raw 32-bit register value for a signed homing offset
pub fn encode_homing_offset(offset: i32) -> u32 {
    offset as u32
}

/// Goal currents with each motor's winding direction applied
///
/// `orientations` holds +1 or -1 per motor: the sign that tensions its tendon.
pub fn oriented_currents(tension: &[i16], orientations: &[i8]) -> Result<Vec<i16>> {
    check_len(tension.len(), orientations.len())?;
    Ok(tension
        .iter()
        .zip(orientations)
        .map(|(&t, &o)| t.saturating_mul(o as i16))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const REF_TICKS: [i32; 3] = [20000, 40000, 40000];
    const REF_LENGTHS: [f64; 3] = [0.1, 0.1, 0.1];

    #[test]
    fn test_default_geometry() {
        let g = TendonGeometry::default();
        assert_eq!(
            g,
            TendonGeometry {
                pulley_radius: 0.010,
                tick_angle: TAU / 4096.0,
            }
        );
        assert_relative_eq!(g.tick_angle, 0.001533980787885641, epsilon = 1e-15);
        assert_relative_eq!(g.meters_per_tick(), 1.533980787885641e-5, epsilon = 1e-18);
    }

    #[test]
    fn test_reference_ticks_give_reference_lengths() {
        let g = TendonGeometry::default();
        let lengths = g.lengths_from_ticks(&REF_LENGTHS, &REF_TICKS, &REF_TICKS).unwrap();
        assert_eq!(lengths, REF_LENGTHS.to_vec());
    }

    #[test]
    fn test_full_turn_winds_one_circumference() {
        let g = TendonGeometry::default();
        let ticks = [24096, 40000, 35904];
        let lengths = g.lengths_from_ticks(&REF_LENGTHS, &REF_TICKS, &ticks).unwrap();
        let circumference = TAU * PULLEY_RADIUS;
        assert_relative_eq!(lengths[0], 0.1 - circumference, epsilon = 1e-12);
        assert_relative_eq!(lengths[1], 0.1, epsilon = 1e-15);
        assert_relative_eq!(lengths[2], 0.1 + circumference, epsilon = 1e-12);
    }

    #[test]
    fn test_ticks_invert_lengths() {
        let g = TendonGeometry::default();
        let ticks = [20345, 39000, 41234];
        let lengths = g.lengths_from_ticks(&REF_LENGTHS, &REF_TICKS, &ticks).unwrap();
        let back = g.ticks_from_lengths(&REF_TICKS, &REF_LENGTHS, &lengths).unwrap();
        assert_eq!(back, ticks.to_vec());
    }

    #[test]
    fn test_length_mismatch() {
        let g = TendonGeometry::default();
        assert_eq!(
            g.lengths_from_ticks(&REF_LENGTHS, &REF_TICKS, &[1, 2]),
            Err(CalibrationError::LengthMismatch { expected: 3, got: 2 })
        );
        let flat = TendonGeometry {
            pulley_radius: 0.0,
            ..TendonGeometry::default()
        };
        assert_eq!(
            flat.ticks_from_lengths(&REF_TICKS, &REF_LENGTHS, &REF_LENGTHS),
            Err(CalibrationError::DegenerateGeometry)
        );
    }

    #[test]
    fn test_homing_offset_sign() {
        assert_eq!(decode_homing_offset(0x0000_0400), 1024);
        assert_eq!(decode_homing_offset(0xFFFF_FC00), -1024);
        assert_eq!(decode_homing_offset(0x8000_0000), i32::MIN);
        assert_eq!(encode_homing_offset(-1), 0xFFFF_FFFF);
        assert_eq!(encode_homing_offset(-1024), 0xFFFF_FC00);
    }

    #[test]
    fn test_oriented_currents() {
        let out = oriented_currents(&[15, 15, 15], &[1, -1, 1]).unwrap();
        assert_eq!(out, vec![15, -15, 15]);
        assert!(oriented_currents(&[15], &[1, 1]).is_err());
    }
}
