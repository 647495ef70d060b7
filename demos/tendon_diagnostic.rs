// Tendon diagnostic: READ-ONLY test to verify the motor bus
//
// This tool does NOT write anything to the motors - it's completely safe.
// Use this first before running the runtime with --hardware.
//
// Usage: cargo run --example tendon_diagnostic -- [port]
// Example: cargo run --example tendon_diagnostic -- /dev/ttyUSB0

use softarm_runtime::config::MOTOR_PORT;
use softarm_runtime::kinematics::MultiSectionComposer;
use softarm_runtime::motor::calibration::decode_homing_offset;
use softarm_runtime::motor::dynamixel::{DynamixelBus, Register};
use softarm_runtime::motor::{TendonCalibration, MOTOR_COUNT, TENDON_MOTOR_IDS};
use std::io::{self, Write};

fn operating_mode_name(mode: u8) -> &'static str {
    match mode {
        0 => "Current",
        1 => "Velocity",
        3 => "Position",
        4 => "Extended Position",
        5 => "Current-based Position",
        16 => "PWM",
        _ => "Unknown",
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    // Get port from args or use default
    let port = std::env::args().nth(1).unwrap_or_else(|| MOTOR_PORT.to_string());

    println!("Soft arm tendon diagnostic (READ-ONLY)");
    println!("This tool only READS from motors - no writes, no movement");
    println!();
    println!("Serial port: {}", port);
    println!("Expected motor IDs: {:?}", TENDON_MOTOR_IDS);
    println!();

    println!("Step 1: Opening serial port...");
    let mut bus = match DynamixelBus::open(&port) {
        Ok(bus) => {
            println!("  ✓ Serial port opened successfully");
            bus
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - Verify the U2D2 adapter is connected and powered");
            println!("  - On Linux, check you are in the dialout group");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Pinging motors...");
    let mut found = [false; MOTOR_COUNT];
    for (i, &id) in TENDON_MOTOR_IDS.iter().enumerate() {
        print!("  Section {} tendon {} (ID {}): ", i / 3 + 1, i % 3 + 1, id);
        io::stdout().flush()?;

        match bus.ping(id) {
            Ok(true) => {
                println!("✓ RESPONDING");
                found[i] = true;
            }
            Ok(false) => println!("✗ NO RESPONSE"),
            Err(e) => println!("✗ ERROR: {}", e),
        }
    }
    println!();

    if found.iter().any(|f| !f) {
        println!("⚠ WARNING: Not all motors responded!");
        println!("  - Check motor power supply");
        println!("  - Verify motor IDs are 1..9 and the baudrate is 1 Mbps");
        println!();
        print!("Continue reading available motors? [y/N]: ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
        println!();
    }

    println!("Step 3: Reading motor registers...");
    println!();

    let mut ticks = [0i32; MOTOR_COUNT];
    let mut all_positions = true;
    for (i, &id) in TENDON_MOTOR_IDS.iter().enumerate() {
        println!("  === Motor ID {} ===", id);
        if !found[i] {
            println!("    skipped (no response)");
            all_positions = false;
            println!();
            continue;
        }

        match bus.read_u8(id, Register::OperatingMode) {
            Ok(mode) => println!("    Operating Mode: {} ({})", mode, operating_mode_name(mode)),
            Err(e) => println!("    Operating Mode: ERROR - {}", e),
        }

        match bus.read_u8(id, Register::TorqueEnable) {
            Ok(val) => {
                let status = if val == 1 { "ENABLED" } else { "disabled" };
                println!("    Torque Enable:  {} ({})", val, status);
            }
            Err(e) => println!("    Torque Enable:  ERROR - {}", e),
        }

        match bus.read_u32(id, Register::HomingOffset) {
            Ok(raw) => println!("    Homing Offset:  {}", decode_homing_offset(raw)),
            Err(e) => println!("    Homing Offset:  ERROR - {}", e),
        }

        match bus.read_i32(id, Register::PresentPosition) {
            Ok(pos) => {
                ticks[i] = pos;
                let turns = pos as f64 / 4096.0;
                println!("    Present Position: {} ({:.2} turns)", pos, turns);
            }
            Err(e) => {
                println!("    Present Position: ERROR - {}", e);
                all_positions = false;
            }
        }

        println!();
    }

    if all_positions {
        println!("Step 4: Deriving tendon lengths and shape...");
        let calibration = TendonCalibration::default();
        let lengths = calibration.lengths(&ticks)?;
        for (section, chunk) in lengths.chunks_exact(3).enumerate() {
            println!(
                "  Section {}: {:.4} m, {:.4} m, {:.4} m",
                section + 1,
                chunk[0],
                chunk[1],
                chunk[2]
            );
        }

        match MultiSectionComposer::default().shape(&lengths) {
            Ok(shape) => {
                for (i, s) in shape.iter().enumerate() {
                    let p = s.pose.position;
                    println!(
                        "  Tip {}: s={:.4} dx={:.4} dy={:.4} at [{:.4}, {:.4}, {:.4}]",
                        i + 1,
                        s.config.s,
                        s.config.deltax,
                        s.config.deltay,
                        p.x,
                        p.y,
                        p.z
                    );
                }
            }
            Err(e) => println!("  Shape estimation failed: {}", e),
        }
        println!();
    }

    println!("Diagnostic complete.");
    println!("If lengths look wrong, check REFERENCE_TICKS and REFERENCE_LENGTHS in config.rs");

    Ok(())
}
