// IMU serial port
//
// The IMU microcontroller prints one text line per sample holding a
// quaternion (w, x, y, z) for every tracked body: the arm base first, then
// the tip of each section.

use regex::Regex;
use serialport::{ClearBuffer, SerialPort};
use std::io::Read;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{IMU_BAUDRATE, IMU_TIMEOUT};
use crate::kinematics::Quaternion;

/// Sensor prints fixed-precision values; shorter tokens are partial reads
const MIN_TOKEN_LEN: usize = 6;

/// Longest line accepted before giving up on a frame
const MAX_LINE_LEN: usize = 1024;

/// Error types for the IMU port
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout waiting for IMU line")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, SensorError>;

/// Decimal numbers as the sensor prints them
static FLOAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-+]?\d*\.\d+|\d+").expect("valid float pattern")
});

/// Parse one sensor line into `bodies` quaternions
///
/// Returns `None` unless the line holds exactly `4 * bodies` numbers, each
/// printed with at least six characters.
pub fn parse_frame(line: &str, bodies: usize) -> Option<Vec<Quaternion>> {
    let tokens: Vec<&str> = FLOAT.find_iter(line).map(|m| m.as_str()).collect();
    if tokens.len() != 4 * bodies || tokens.iter().any(|t| t.len() < MIN_TOKEN_LEN) {
        return None;
    }

    let values: Vec<f64> = tokens
        .iter()
        .map(|t| t.parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;

    Some(
        values
            .chunks_exact(4)
            .map(|q| Quaternion::new(q[0], q[1], q[2], q[3]))
            .collect(),
    )
}

/// Orientation of every body relative to the one below it
///
/// For [base, tip1, tip2, tip3] this gives [base->tip1, tip1->tip2, tip2->tip3].
pub fn relative_chain(frame: &[Quaternion]) -> Vec<Quaternion> {
    frame
        .windows(2)
        .map(|pair| pair[1].relative_to(&pair[0]))
        .collect()
}

/// Line-oriented IMU connection
pub struct ImuPort {
    port: Box<dyn SerialPort>,
    bodies: usize,
}

impl ImuPort {
    pub fn open(port_name: &str, bodies: usize) -> Result<Self> {
        Self::open_with(port_name, IMU_BAUDRATE, IMU_TIMEOUT, bodies)
    }

    pub fn open_with(port_name: &str, baudrate: u32, timeout: Duration, bodies: usize) -> Result<Self> {
        let port = serialport::new(port_name, baudrate).timeout(timeout).open()?;
        port.clear(ClearBuffer::All)?;
        debug!("IMU port {} configured for {} bodies", port_name, bodies);
        Ok(Self { port, bodies })
    }

    /// Read one line, dropping anything received before the call
    fn read_line(&mut self) -> Result<String> {
        self.port.clear(ClearBuffer::Input)?;

        let mut line = Vec::with_capacity(128);
        let mut byte = [0u8; 1];
        loop {
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) if byte[0] == b'\n' => break,
                Ok(_) => {
                    line.push(byte[0]);
                    if line.len() >= MAX_LINE_LEN {
                        warn!("IMU line exceeded {} bytes, discarding", MAX_LINE_LEN);
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Err(SensorError::Timeout),
                Err(e) => return Err(e.into()),
            }
        }

        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Freshest frame, or `None` if the line was incomplete or malformed
    pub fn read_frame(&mut self) -> Result<Option<Vec<Quaternion>>> {
        let line = self.read_line()?;
        let frame = parse_frame(&line, self.bodies);
        if frame.is_none() {
            debug!("Discarding malformed IMU line: {:?}", line);
        }
        Ok(frame)
    }

    pub fn bodies(&self) -> usize {
        self.bodies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const LINE: &str = "1.000000,0.000000,0.000000,0.000000,0.707107,0.707107,0.000000,0.000000\r\n";

    #[test]
    fn test_parse_two_bodies() {
        let frame = parse_frame(LINE, 2).unwrap();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame[0], Quaternion::IDENTITY);
        assert_relative_eq!(frame[1].x, 0.707107, epsilon = 1e-12);
    }

    #[test]
    fn test_parse_signed_and_spaced() {
        let line = "-0.500000 +0.500000\t-0.500000 0.500000";
        let frame = parse_frame(line, 1).unwrap();
        assert_eq!(frame[0].as_array(), [-0.5, 0.5, -0.5, 0.5]);
    }

    #[test]
    fn test_wrong_count_is_none() {
        assert!(parse_frame(LINE, 4).is_none());
        assert!(parse_frame(LINE, 1).is_none());
        assert!(parse_frame("", 1).is_none());
    }

    #[test]
    fn test_short_token_is_none() {
        // truncated value from a partial read
        let line = "1.000000,0.000000,0.000000,0.00";
        assert!(parse_frame(line, 1).is_none());
    }

    #[test]
    fn test_float_tokens() {
        let tokens: Vec<&str> = FLOAT.find_iter("a-1.25b+3 .5").map(|m| m.as_str()).collect();
        // a sign is only kept on values with a fractional part
        assert_eq!(tokens, vec!["-1.25", "3", ".5"]);
        assert_eq!(FLOAT.find_iter("q: 12. x").map(|m| m.as_str()).collect::<Vec<_>>(), vec!["12"]);
        assert_eq!(FLOAT.find_iter("--").count(), 0);
    }

    #[test]
    fn test_exponent_splits_and_rejects_frame() {
        // 1e-05 reads as "1" and "05", leaving too many short tokens
        let line = "1.000000,0.000000,0.000000,1e-05";
        assert!(parse_frame(line, 1).is_none());
    }

    #[test]
    fn test_relative_chain() {
        let half = std::f64::consts::FRAC_1_SQRT_2;
        let yaw90 = Quaternion::new(half, 0.0, 0.0, half);
        let yaw180 = yaw90 * yaw90;
        let chain = relative_chain(&[Quaternion::IDENTITY, yaw90, yaw180]);
        assert_eq!(chain.len(), 2);
        for q in &chain {
            assert_relative_eq!(q.w, half, epsilon = 1e-12);
            assert_relative_eq!(q.z, half, epsilon = 1e-12);
        }
    }
}
