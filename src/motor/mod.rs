// Motor control module for the tendon-driven soft arm
//
// Provides:
// - Tendon length <-> motor position calibration
// - Dynamixel Protocol 2.0 serial implementation
// - High-level tendon driver API

pub mod calibration;
mod driver;
pub mod dynamixel;

pub use calibration::{CalibrationError, TendonGeometry};
pub use driver::{DriverError, TendonCalibration, TendonDriver, MOTOR_COUNT, TENDON_MOTOR_IDS};
pub use dynamixel::{DynamixelBus, DynamixelError, OperatingMode};
