// Timeouts, topics, serial ports, arm geometry
use std::time::Duration;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Feedback timeout for watchdog
pub const FEEDBACK_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_SHAPE: &str = "softarm/state/shape"; // section configurations and poses
pub const TOPIC_ORIENTATION: &str = "softarm/state/orientation"; // IMU tip orientation
pub const TOPIC_HEALTH: &str = "softarm/state/health"; // health status
pub const TOPIC_SIM_TENDONS: &str = "softarm/sim/tendons"; // simulated tendon feedback

// Motor configuration
// Serial port for the Dynamixel U2D2 adapter
pub const MOTOR_PORT: &str = "/dev/ttyUSB0";
pub const MOTOR_BAUDRATE: u32 = 1_000_000;

// IMU configuration
// Serial port for the IMU microcontroller
pub const IMU_PORT: &str = "/dev/ttyACM0";
pub const IMU_BAUDRATE: u32 = 115_200;
pub const IMU_TIMEOUT: Duration = Duration::from_secs(1);
// Base plus one IMU at each section tip
pub const IMU_BODIES: usize = 4;

// Tendon calibration
// Motor positions at the straight reference pose, sections 1, 2, 3
pub const REFERENCE_TICKS: [i32; 9] = [20000, 20000, 20000, 40000, 40000, 40000, 40000, 40000, 40000];
// Tendon lengths at the reference pose (meters)
pub const REFERENCE_LENGTHS: [f64; 9] = [0.1; 9];
// All motors wind counter-clockwise to tension their tendon
pub const MOTOR_ORIENTATIONS: [i8; 9] = [1; 9];
// Pretension current (raw units)
pub const TENSION_CURRENT: i16 = 15;

// Number of backbone samples per section in published shapes
pub const BACKBONE_SAMPLES: usize = 10;
