use clap::{Parser, Subcommand};
use nalgebra::{Matrix3, Matrix3x4};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use softarm_runtime::config::{IMU_BODIES, IMU_PORT, MOTOR_PORT};
use softarm_runtime::kinematics::{
    Configuration, EulerOrder, MultiSectionComposer, Parameterization, Quaternion, TENDON_OFFSET,
};
use softarm_runtime::runtime::{self, RuntimeOptions};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shape estimation runtime and kinematics tools for the three-section soft arm
#[derive(Parser, Debug)]
#[command(name = "softarm-runtime")]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the 50 Hz shape-estimation loop
    Run {
        /// Read tendon feedback from the motors instead of the simulation topic
        #[arg(long)]
        hardware: bool,

        /// Dynamixel serial port
        #[arg(long, default_value = MOTOR_PORT)]
        motor_port: String,

        /// Publish IMU orientations
        #[arg(long)]
        imu: bool,

        /// IMU serial port
        #[arg(long, default_value = IMU_PORT)]
        imu_port: String,

        /// Quaternions per IMU line
        #[arg(long, default_value_t = IMU_BODIES)]
        imu_bodies: usize,

        /// Tendon distance from the section axis (m)
        #[arg(long, default_value_t = TENDON_OFFSET)]
        offset: f64,

        /// Switch motors to current control and pretension the tendons
        #[arg(long)]
        pretension: bool,
    },

    /// Tendon lengths to configurations and poses, printed as JSON
    Fk {
        /// 3 lengths (one section) or 9 lengths (whole arm), comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        lengths: Vec<f64>,

        /// Configuration parameterization for a single section
        #[arg(long, default_value = "bend_vector")]
        param: Parameterization,

        /// Tendon distance from the section axis (m)
        #[arg(long, default_value_t = TENDON_OFFSET)]
        offset: f64,
    },

    /// Quaternion to rotation matrix and Euler angles, printed as JSON
    Rotation {
        /// Quaternion w,x,y,z
        #[arg(long, value_delimiter = ',', required = true, allow_hyphen_values = true)]
        quaternion: Vec<f64>,

        /// Euler order: ZYX or XYZ
        #[arg(long, default_value = "ZYX")]
        order: EulerOrder,
    },
}

fn rows3(m: &Matrix3<f64>) -> Vec<[f64; 3]> {
    m.row_iter().map(|r| [r[0], r[1], r[2]]).collect()
}

fn rows34(m: &Matrix3x4<f64>) -> Vec<[f64; 4]> {
    m.row_iter().map(|r| [r[0], r[1], r[2], r[3]]).collect()
}

fn forward_kinematics(lengths: &[f64], param: Parameterization, offset: f64) -> Result<serde_json::Value, BoxError> {
    match lengths.len() {
        3 => {
            let triple = [lengths[0], lengths[1], lengths[2]];
            let config = Configuration::from_lengths(&triple, offset, param)?;
            Ok(json!({
                "configuration": config,
                "bend_vector": config.to_bend_vector(),
                "pose": rows34(&config.pose().to_matrix()),
                "legacy_pose": rows34(&config.legacy_pose().to_matrix()),
            }))
        }
        9 => {
            let mut all = [0.0; 9];
            all.copy_from_slice(lengths);
            let composer = MultiSectionComposer::new(offset);
            let shape = composer.shape(&all)?;
            let stacked = composer.real_robot(&all)?;
            let sections: Vec<_> = shape
                .iter()
                .map(|s| json!({ "bend_vector": s.config, "tip": rows34(&s.pose.to_matrix()) }))
                .collect();
            let stacked_rows: Vec<Vec<f64>> = stacked.row_iter().map(|r| r.iter().copied().collect()).collect();
            Ok(json!({ "sections": sections, "real_robot": stacked_rows }))
        }
        n => Err(format!("expected 3 or 9 lengths, got {}", n).into()),
    }
}

fn rotation(quaternion: &[f64], order: EulerOrder) -> Result<serde_json::Value, BoxError> {
    let [w, x, y, z] = quaternion else {
        return Err(format!("expected 4 quaternion components, got {}", quaternion.len()).into());
    };
    let q = Quaternion::new(*w, *x, *y, *z).normalize()?;
    let euler = q.to_euler(order)?;
    Ok(json!({
        "quaternion": q.as_array(),
        "matrix": rows3(&q.to_rotation_matrix()?),
        "euler": euler,
        "euler_deg": euler.to_degrees(),
    }))
}

async fn execute(command: Command) -> Result<(), BoxError> {
    match command {
        Command::Run {
            hardware,
            motor_port,
            imu,
            imu_port,
            imu_bodies,
            offset,
            pretension,
        } => {
            let options = RuntimeOptions {
                motor_port: hardware.then_some(motor_port),
                imu_port: imu.then_some(imu_port),
                imu_bodies,
                tendon_offset: offset,
                pretension,
            };
            runtime::run(options).await
        }
        Command::Fk {
            lengths,
            param,
            offset,
        } => {
            let out = forward_kinematics(&lengths, param, offset)?;
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        Command::Rotation { quaternion, order } => {
            let out = rotation(&quaternion, order)?;
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init(); // installs the subscriber globally

    let args = Args::parse();
    if let Err(e) = execute(args.command).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
