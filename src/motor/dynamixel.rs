// Dynamixel Protocol 2.0 serial implementation (X series)
//
// Packet format:
// [0xFF, 0xFF, 0xFD, 0x00, ID, LEN_L, LEN_H, Instruction, Params..., CRC_L, CRC_H]
// LEN counts instruction + params + CRC. Params are byte-stuffed.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

/// Default serial configuration for the tendon motors
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Broadcast ID used by sync instructions
pub const BROADCAST_ID: u8 = 0xFE;

/// Packet header bytes
const HEADER: [u8; 4] = [0xFF, 0xFF, 0xFD, 0x00];

/// Instruction byte of every status packet
const STATUS_INSTRUCTION: u8 = 0x55;

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    SyncRead = 0x82,
    SyncWrite = 0x83,
}

/// Control table addresses (X series)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Register {
    // EEPROM area (torque must be off to write)
    OperatingMode = 11, // 1 byte
    HomingOffset = 20,  // 4 bytes, signed

    // RAM area
    TorqueEnable = 64,     // 1 byte: 0=off, 1=on
    GoalCurrent = 102,     // 2 bytes, signed
    GoalPosition = 116,    // 4 bytes, signed
    PresentCurrent = 126,  // 2 bytes, signed, read-only
    PresentPosition = 132, // 4 bytes, signed, read-only
}

/// Operating modes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatingMode {
    Current = 0,
    Velocity = 1,
    Position = 3,
    ExtendedPosition = 4,
    CurrentBasedPosition = 5,
    Pwm = 16,
}

/// Error types for Dynamixel communication
#[derive(Debug, thiserror::Error)]
pub enum DynamixelError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from motor {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("CRC mismatch for motor {id}")]
    CrcMismatch { id: u8 },

    #[error("Motor {id} returned error status: 0x{status:02X}")]
    MotorError { id: u8, status: u8 },

    #[error("Timeout waiting for response from motor {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, DynamixelError>;

/// CRC-16 (polynomial 0x8005, initial value 0, no reflection)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x8005
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Insert 0xFD after every FF FF FD so the payload never mimics a header
fn stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 3);
    for &byte in data {
        out.push(byte);
        let n = out.len();
        if n >= 3 && out[n - 3..] == [0xFF, 0xFF, 0xFD] {
            out.push(0xFD);
        }
    }
    out
}

/// Drop the 0xFD inserted by [`stuff`]
fn unstuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        out.push(data[i]);
        let n = out.len();
        if n >= 3 && out[n - 3..] == [0xFF, 0xFF, 0xFD] && data.get(i + 1) == Some(&0xFD) {
            i += 1;
        }
        i += 1;
    }
    out
}

/// Build an instruction packet with header, length and CRC
fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
    let body = stuff(params);
    let length = (body.len() + 3) as u16; // instruction + params + crc
    let mut packet = Vec::with_capacity(10 + body.len());

    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.extend_from_slice(&length.to_le_bytes());
    packet.push(instruction as u8);
    packet.extend_from_slice(&body);

    let crc = crc16(&packet);
    packet.extend_from_slice(&crc.to_le_bytes());
    packet
}

/// Validate a complete status packet and return its unstuffed parameters
fn parse_status(expected_id: u8, packet: &[u8]) -> Result<Vec<u8>> {
    let invalid = |reason: String| DynamixelError::InvalidResponse {
        id: expected_id,
        reason,
    };

    // header(4) + id + len(2) + instruction + error + crc(2)
    if packet.len() < 11 {
        return Err(invalid(format!("Packet too short: {} bytes", packet.len())));
    }
    if packet[..4] != HEADER {
        return Err(invalid(format!("Invalid header: {:02X?}", &packet[..4])));
    }

    let id = packet[4];
    if id != expected_id {
        return Err(invalid(format!("ID mismatch: expected {}, got {}", expected_id, id)));
    }

    let length = u16::from_le_bytes([packet[5], packet[6]]) as usize;
    if packet.len() != 7 + length {
        return Err(invalid(format!(
            "Length mismatch: header says {}, got {}",
            length,
            packet.len() - 7
        )));
    }

    let crc_at = packet.len() - 2;
    let received = u16::from_le_bytes([packet[crc_at], packet[crc_at + 1]]);
    if crc16(&packet[..crc_at]) != received {
        return Err(DynamixelError::CrcMismatch { id });
    }

    if packet[7] != STATUS_INSTRUCTION {
        return Err(invalid(format!("Not a status packet: 0x{:02X}", packet[7])));
    }

    // Bit 7 is the hardware alert flag, the rest is the error number
    let status = packet[8];
    if status & 0x7F != 0 {
        return Err(DynamixelError::MotorError { id, status });
    }

    Ok(unstuff(&packet[9..crc_at]))
}

fn sign_extend_16(raw: &[u8]) -> i16 {
    i16::from_le_bytes([raw[0], raw[1]])
}

fn sign_extend_32(raw: &[u8]) -> i32 {
    i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])
}

/// Dynamixel motor bus - handles serial communication with motors
pub struct DynamixelBus {
    port: Box<dyn SerialPort>,
}

impl DynamixelBus {
    /// Open a new connection to the motor bus
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read one status packet
    fn read_response(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let mut head = [0u8; 7];
        self.port.read_exact(&mut head).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                DynamixelError::Timeout { id: expected_id }
            } else {
                DynamixelError::Io(e)
            }
        })?;

        let length = u16::from_le_bytes([head[5], head[6]]) as usize;
        let mut packet = Vec::with_capacity(7 + length);
        packet.extend_from_slice(&head);
        packet.resize(7 + length, 0);
        self.port.read_exact(&mut packet[7..])?;

        parse_status(expected_id, &packet)
    }

    fn read_bytes(&mut self, id: u8, register: Register, len: u16) -> Result<Vec<u8>> {
        let mut params = Vec::with_capacity(4);
        params.extend_from_slice(&(register as u16).to_le_bytes());
        params.extend_from_slice(&len.to_le_bytes());
        let packet = build_packet(id, Instruction::Read, &params);
        self.send_packet(&packet)?;

        let response = self.read_response(id)?;
        if response.len() < len as usize {
            return Err(DynamixelError::InvalidResponse {
                id,
                reason: format!("Expected {} bytes, got {}", len, response.len()),
            });
        }
        Ok(response)
    }

    fn write_bytes(&mut self, id: u8, register: Register, data: &[u8]) -> Result<()> {
        let mut params = Vec::with_capacity(2 + data.len());
        params.extend_from_slice(&(register as u16).to_le_bytes());
        params.extend_from_slice(data);
        let packet = build_packet(id, Instruction::Write, &params);
        debug!("Write to motor {}: reg={:?}, data={:02X?}", id, register, data);
        self.send_packet(&packet)?;

        let _ = self.read_response(id)?;
        Ok(())
    }

    /// Ping a motor to check if it's connected
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        let packet = build_packet(id, Instruction::Ping, &[]);
        self.send_packet(&packet)?;

        match self.read_response(id) {
            Ok(_) => Ok(true),
            Err(DynamixelError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        self.write_bytes(id, register, &[value])
    }

    pub fn write_u32(&mut self, id: u8, register: Register, value: u32) -> Result<()> {
        self.write_bytes(id, register, &value.to_le_bytes())
    }

    pub fn read_u8(&mut self, id: u8, register: Register) -> Result<u8> {
        Ok(self.read_bytes(id, register, 1)?[0])
    }

    /// Raw 4-byte register value, unsigned as transmitted
    pub fn read_u32(&mut self, id: u8, register: Register) -> Result<u32> {
        let raw = self.read_bytes(id, register, 4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn read_i32(&mut self, id: u8, register: Register) -> Result<i32> {
        let raw = self.read_bytes(id, register, 4)?;
        Ok(sign_extend_32(&raw))
    }

    /// Sync read: same register from several motors, one status packet each
    fn sync_read(&mut self, register: Register, len: u16, ids: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut params = Vec::with_capacity(4 + ids.len());
        params.extend_from_slice(&(register as u16).to_le_bytes());
        params.extend_from_slice(&len.to_le_bytes());
        params.extend_from_slice(ids);

        let packet = build_packet(BROADCAST_ID, Instruction::SyncRead, &params);
        debug!("Sync read from {} motors: reg={:?}", ids.len(), register);
        self.send_packet(&packet)?;

        ids.iter()
            .map(|&id| {
                let data = self.read_response(id)?;
                if data.len() < len as usize {
                    return Err(DynamixelError::InvalidResponse {
                        id,
                        reason: format!("Expected {} bytes, got {}", len, data.len()),
                    });
                }
                Ok(data)
            })
            .collect()
    }

    pub fn sync_read_i16(&mut self, register: Register, ids: &[u8]) -> Result<Vec<i16>> {
        let raw = self.sync_read(register, 2, ids)?;
        Ok(raw.iter().map(|r| sign_extend_16(r)).collect())
    }

    pub fn sync_read_i32(&mut self, register: Register, ids: &[u8]) -> Result<Vec<i32>> {
        let raw = self.sync_read(register, 4, ids)?;
        Ok(raw.iter().map(|r| sign_extend_32(r)).collect())
    }

    /// Sync write: write same register to multiple motors efficiently
    /// data: [(id, bytes), ...], every entry the same width
    fn sync_write(&mut self, register: Register, width: u16, data: &[(u8, Vec<u8>)]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        // [addr_lo, addr_hi, len_lo, len_hi, id1, data1..., id2, data2..., ...]
        let mut params = Vec::with_capacity(4 + data.len() * (1 + width as usize));
        params.extend_from_slice(&(register as u16).to_le_bytes());
        params.extend_from_slice(&width.to_le_bytes());
        for (id, bytes) in data {
            params.push(*id);
            params.extend_from_slice(bytes);
        }

        let packet = build_packet(BROADCAST_ID, Instruction::SyncWrite, &params);
        debug!("Sync write to {} motors: reg={:?}", data.len(), register);
        self.send_packet(&packet)?;

        // Sync write has no response
        Ok(())
    }

    pub fn sync_write_i16(&mut self, register: Register, data: &[(u8, i16)]) -> Result<()> {
        let encoded: Vec<(u8, Vec<u8>)> = data
            .iter()
            .map(|&(id, value)| (id, value.to_le_bytes().to_vec()))
            .collect();
        self.sync_write(register, 2, &encoded)
    }

    pub fn sync_write_i32(&mut self, register: Register, data: &[(u8, i32)]) -> Result<()> {
        let encoded: Vec<(u8, Vec<u8>)> = data
            .iter()
            .map(|&(id, value)| (id, value.to_le_bytes().to_vec()))
            .collect();
        self.sync_write(register, 4, &encoded)
    }

    // === High-level convenience methods ===

    pub fn enable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 1)
    }

    pub fn disable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 0)
    }

    /// Set operating mode (must disable torque first)
    pub fn set_operating_mode(&mut self, id: u8, mode: OperatingMode) -> Result<()> {
        self.write_u8(id, Register::OperatingMode, mode as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_packet(id: u8, error: u8, params: &[u8]) -> Vec<u8> {
        let body = stuff(params);
        let length = (body.len() + 4) as u16;
        let mut packet = HEADER.to_vec();
        packet.push(id);
        packet.extend_from_slice(&length.to_le_bytes());
        packet.push(STATUS_INSTRUCTION);
        packet.push(error);
        packet.extend_from_slice(&body);
        let crc = crc16(&packet);
        packet.extend_from_slice(&crc.to_le_bytes());
        packet
    }

    #[test]
    fn test_crc_reference_packets() {
        // Ping ID 1
        assert_eq!(crc16(&[0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x03, 0x00, 0x01]), 0x4E19);
        // Read 4 bytes at 132 from ID 1
        let read = [0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x07, 0x00, 0x02, 0x84, 0x00, 0x04, 0x00];
        assert_eq!(crc16(&read), 0x151D);
    }

    #[test]
    fn test_build_ping_packet() {
        let packet = build_packet(1, Instruction::Ping, &[]);
        assert_eq!(packet, vec![0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x03, 0x00, 0x01, 0x19, 0x4E]);
    }

    #[test]
    fn test_build_write_packet() {
        // Goal position 512 on ID 1
        let mut params = (Register::GoalPosition as u16).to_le_bytes().to_vec();
        params.extend_from_slice(&512i32.to_le_bytes());
        let packet = build_packet(1, Instruction::Write, &params);
        assert_eq!(packet[5], 0x09); // 6 params + instruction + crc
        assert_eq!(packet[7], 0x03);
        assert_eq!(&packet[packet.len() - 2..], &[0xCA, 0x89]);
    }

    #[test]
    fn test_byte_stuffing() {
        assert_eq!(stuff(&[0xFF, 0xFF, 0xFD]), vec![0xFF, 0xFF, 0xFD, 0xFD]);
        assert_eq!(stuff(&[0x01, 0xFF, 0xFD]), vec![0x01, 0xFF, 0xFD]);
        assert_eq!(unstuff(&[0xFF, 0xFF, 0xFD, 0xFD, 0x07]), vec![0xFF, 0xFF, 0xFD, 0x07]);

        let packet = build_packet(2, Instruction::Write, &[0x74, 0x00, 0xFF, 0xFF, 0xFD, 0x00]);
        // six params become seven after stuffing
        assert_eq!(u16::from_le_bytes([packet[5], packet[6]]), 7 + 3);
    }

    #[test]
    fn test_parse_status_ok() {
        let packet = status_packet(3, 0, &[0x06, 0x04, 0x26]);
        assert_eq!(parse_status(3, &packet).unwrap(), vec![0x06, 0x04, 0x26]);

        let stuffed = status_packet(3, 0, &[0xFF, 0xFF, 0xFD, 0x01]);
        assert_eq!(parse_status(3, &stuffed).unwrap(), vec![0xFF, 0xFF, 0xFD, 0x01]);
    }

    #[test]
    fn test_parse_status_alert_bit_only_is_ok() {
        let packet = status_packet(1, 0x80, &[]);
        assert!(parse_status(1, &packet).is_ok());
    }

    #[test]
    fn test_parse_status_errors() {
        let packet = status_packet(1, 0x02, &[]);
        assert!(matches!(
            parse_status(1, &packet),
            Err(DynamixelError::MotorError { id: 1, status: 0x02 })
        ));

        let packet = status_packet(1, 0, &[0x10, 0x20]);
        assert!(matches!(
            parse_status(2, &packet),
            Err(DynamixelError::InvalidResponse { id: 2, .. })
        ));

        let mut corrupt = status_packet(1, 0, &[0x10, 0x20]);
        corrupt[9] ^= 0x01;
        assert!(matches!(parse_status(1, &corrupt), Err(DynamixelError::CrcMismatch { id: 1 })));
    }

    #[test]
    fn test_signed_decoding() {
        assert_eq!(sign_extend_16(&[0xFF, 0xFF]), -1);
        assert_eq!(sign_extend_16(&[0x10, 0x00]), 16);
        assert_eq!(sign_extend_32(&[0x20, 0x4E, 0x00, 0x00]), 20000);
        assert_eq!(sign_extend_32(&[0x00, 0x00, 0x00, 0x80]), i32::MIN);
    }
}
