// High-level tendon driver for the three-section soft arm
//
// Combines the Dynamixel protocol with the tendon calibration to read and
// command the nine tendon motors (three per section).

use tracing::{debug, info, warn};

use super::calibration::{decode_homing_offset, encode_homing_offset, oriented_currents, TendonGeometry};
use super::dynamixel::{DynamixelBus, DynamixelError, OperatingMode, Register};
use crate::config::{MOTOR_BAUDRATE, MOTOR_ORIENTATIONS, REFERENCE_LENGTHS, REFERENCE_TICKS};

/// Number of tendon motors on the arm
pub const MOTOR_COUNT: usize = 9;

/// Motor IDs, sections 1, 2, 3 in order (as configured in the motors)
pub const TENDON_MOTOR_IDS: [u8; MOTOR_COUNT] = [1, 2, 3, 4, 5, 6, 7, 8, 9];

/// Error types for the tendon driver
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Bus(#[from] DynamixelError),

    #[error(transparent)]
    Calibration(#[from] super::calibration::CalibrationError),
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// Reference pose that ties motor ticks to tendon lengths
#[derive(Debug, Clone, PartialEq)]
pub struct TendonCalibration {
    pub geometry: TendonGeometry,
    pub reference_ticks: [i32; MOTOR_COUNT],
    pub reference_lengths: [f64; MOTOR_COUNT],
    /// +1 or -1 per motor: the current sign that tensions the tendon
    pub orientations: [i8; MOTOR_COUNT],
}

impl Default for TendonCalibration {
    fn default() -> Self {
        Self {
            geometry: TendonGeometry::default(),
            reference_ticks: REFERENCE_TICKS,
            reference_lengths: REFERENCE_LENGTHS,
            orientations: MOTOR_ORIENTATIONS,
        }
    }
}

impl TendonCalibration {
    /// Tendon lengths for the given motor positions
    pub fn lengths(&self, ticks: &[i32; MOTOR_COUNT]) -> Result<[f64; MOTOR_COUNT]> {
        let lengths = self
            .geometry
            .lengths_from_ticks(&self.reference_lengths, &self.reference_ticks, ticks)?;
        let mut out = [0.0; MOTOR_COUNT];
        out.copy_from_slice(&lengths);
        Ok(out)
    }

    /// Motor positions for the given tendon lengths
    pub fn ticks(&self, lengths: &[f64; MOTOR_COUNT]) -> Result<[i32; MOTOR_COUNT]> {
        let ticks = self
            .geometry
            .ticks_from_lengths(&self.reference_ticks, &self.reference_lengths, lengths)?;
        let mut out = [0; MOTOR_COUNT];
        out.copy_from_slice(&ticks);
        Ok(out)
    }
}

/// High-level driver for the nine tendon motors
pub struct TendonDriver {
    bus: DynamixelBus,
    motor_ids: [u8; MOTOR_COUNT],
    calibration: TendonCalibration,
}

impl TendonDriver {
    /// Create a new tendon driver, connecting to the specified serial port
    pub fn new(port: &str) -> Result<Self> {
        Self::with_calibration(port, TENDON_MOTOR_IDS, TendonCalibration::default())
    }

    /// Create with custom motor IDs and calibration
    pub fn with_calibration(
        port: &str,
        motor_ids: [u8; MOTOR_COUNT],
        calibration: TendonCalibration,
    ) -> Result<Self> {
        info!("Opening tendon motor bus on {}", port);
        let bus = DynamixelBus::open_with_baudrate(port, MOTOR_BAUDRATE)?;
        Ok(Self {
            bus,
            motor_ids,
            calibration,
        })
    }

    /// Initialize the motors in the given operating mode
    ///
    /// Pings every motor, disables torque (required before changing the
    /// operating mode), sets the mode, and re-enables torque.
    pub fn initialize(&mut self, mode: OperatingMode) -> Result<()> {
        info!("Initializing motors {:?} in {:?} mode", self.motor_ids, mode);

        for &id in &self.motor_ids {
            if !self.bus.ping(id)? {
                warn!("Motor {} not responding to ping", id);
                return Err(DynamixelError::Timeout { id }.into());
            }
            debug!("Motor {} responding", id);
        }

        for &id in &self.motor_ids {
            self.bus.disable_torque(id)?;
        }
        for &id in &self.motor_ids {
            self.bus.set_operating_mode(id, mode)?;
        }
        for &id in &self.motor_ids {
            self.bus.enable_torque(id)?;
        }

        info!("Motors initialized successfully");
        Ok(())
    }

    /// Present positions (ticks) of all motors
    pub fn read_positions(&mut self) -> Result<[i32; MOTOR_COUNT]> {
        let values = self
            .bus
            .sync_read_i32(Register::PresentPosition, &self.motor_ids)?;
        let mut out = [0; MOTOR_COUNT];
        out.copy_from_slice(&values);
        Ok(out)
    }

    /// Present currents (raw units) of all motors
    pub fn read_currents(&mut self) -> Result<[i16; MOTOR_COUNT]> {
        let values = self
            .bus
            .sync_read_i16(Register::PresentCurrent, &self.motor_ids)?;
        let mut out = [0; MOTOR_COUNT];
        out.copy_from_slice(&values);
        Ok(out)
    }

    /// Present tendon lengths, derived from motor positions
    pub fn read_tendon_lengths(&mut self) -> Result<[f64; MOTOR_COUNT]> {
        let ticks = self.read_positions()?;
        self.calibration.lengths(&ticks)
    }

    pub fn write_goal_positions(&mut self, ticks: &[i32; MOTOR_COUNT]) -> Result<()> {
        debug!("Setting goal positions: {:?}", ticks);
        let data: Vec<(u8, i32)> = self.motor_ids.iter().copied().zip(ticks.iter().copied()).collect();
        Ok(self.bus.sync_write_i32(Register::GoalPosition, &data)?)
    }

    /// Command tendon lengths through position control
    pub fn write_tendon_lengths(&mut self, lengths: &[f64; MOTOR_COUNT]) -> Result<()> {
        let ticks = self.calibration.ticks(lengths)?;
        self.write_goal_positions(&ticks)
    }

    /// Goal currents as given, without orientation signs
    pub fn write_goal_currents(&mut self, currents: &[i16; MOTOR_COUNT]) -> Result<()> {
        debug!("Setting goal currents: {:?}", currents);
        let data: Vec<(u8, i16)> = self
            .motor_ids
            .iter()
            .copied()
            .zip(currents.iter().copied())
            .collect();
        Ok(self.bus.sync_write_i16(Register::GoalCurrent, &data)?)
    }

    /// Pretension every tendon with the same current magnitude
    pub fn tension(&mut self, current: i16) -> Result<()> {
        let signed = oriented_currents(&[current; MOTOR_COUNT], &self.calibration.orientations)?;
        let mut out = [0; MOTOR_COUNT];
        out.copy_from_slice(&signed);
        self.write_goal_currents(&out)
    }

    /// Signed homing offsets of all motors
    pub fn read_homing_offsets(&mut self) -> Result<[i32; MOTOR_COUNT]> {
        let mut out = [0; MOTOR_COUNT];
        for (slot, &id) in out.iter_mut().zip(&self.motor_ids) {
            let raw = self.bus.read_u32(id, Register::HomingOffset)?;
            *slot = decode_homing_offset(raw);
        }
        Ok(out)
    }

    /// Write homing offsets (EEPROM, so torque is disabled first)
    pub fn write_homing_offsets(&mut self, offsets: &[i32; MOTOR_COUNT]) -> Result<()> {
        for (&id, &offset) in self.motor_ids.iter().zip(offsets) {
            self.bus.disable_torque(id)?;
            self.bus
                .write_u32(id, Register::HomingOffset, encode_homing_offset(offset))?;
            info!("Wrote homing offset {} to motor {}", offset, id);
        }
        Ok(())
    }

    /// Disable torque on all motors (tendons go slack)
    pub fn disable_torque(&mut self) -> Result<()> {
        info!("Disabling torque on all motors");
        for &id in &self.motor_ids {
            self.bus.disable_torque(id)?;
        }
        Ok(())
    }

    /// Check if a motor is reachable
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        Ok(self.bus.ping(id)?)
    }

    pub fn motor_ids(&self) -> [u8; MOTOR_COUNT] {
        self.motor_ids
    }

    pub fn calibration(&self) -> &TendonCalibration {
        &self.calibration
    }
}

impl Drop for TendonDriver {
    fn drop(&mut self) {
        // Release the tendons when the driver goes away
        if let Err(e) = self.disable_torque() {
            warn!("Failed to disable torque on drop: {}", e);
        }
    }
}
