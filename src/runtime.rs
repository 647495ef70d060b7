// 50 Hz shape-estimation loop with watchdog
// Each tick takes the latest tendon feedback, runs the kinematics and
// publishes the estimated shape. Stale feedback stops shape publication so
// consumers never act on an old estimate.

use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{
    BACKBONE_SAMPLES, FEEDBACK_TIMEOUT, LOOP_HZ, REFERENCE_LENGTHS, TENSION_CURRENT, TOPIC_HEALTH,
    TOPIC_ORIENTATION, TOPIC_SHAPE, TOPIC_SIM_TENDONS,
};
use crate::kinematics::multi_section::{compose_backbone, untwist};
use crate::kinematics::{
    BendVector, EulerOrder, KinematicsError, MultiSectionComposer, Quaternion, SECTION_COUNT,
};
use crate::messages::{
    OrientationState, RuntimeHealth, SectionOrientation, SectionState, ShapeState, TendonFeedback,
};
use crate::motor::{OperatingMode, TendonDriver};
use crate::sensor::{relative_chain, ImuPort, SensorError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Where the runtime gets its inputs from
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeOptions {
    /// Dynamixel port; `None` runs on simulated feedback from zenoh
    pub motor_port: Option<String>,
    /// IMU port; `None` skips orientation publishing
    pub imu_port: Option<String>,
    /// Quaternions per IMU line (base plus section tips)
    pub imu_bodies: usize,
    /// Tendon distance from the section axis
    pub tendon_offset: f64,
    /// Switch motors to current control and pretension the tendons
    pub pretension: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            motor_port: None,
            imu_port: None,
            imu_bodies: crate::config::IMU_BODIES,
            tendon_offset: crate::kinematics::TENDON_OFFSET,
            pretension: false,
        }
    }
}

pub struct Runtime {
    composer: MultiSectionComposer,
    latest_feedback: Option<TendonFeedback>,
    feedback_received_at: Instant,
    health: RuntimeHealth,
}

impl Runtime {
    pub fn new(composer: MultiSectionComposer) -> Self {
        Self {
            composer,
            latest_feedback: None,
            feedback_received_at: Instant::now(),
            health: RuntimeHealth::FeedbackStale, // Start stale until first feedback
        }
    }

    /// Process incoming tendon feedback
    fn on_feedback(&mut self, feedback: TendonFeedback) {
        debug!("Received feedback: {:?}", feedback.lengths);
        self.latest_feedback = Some(feedback);
        self.feedback_received_at = Instant::now();
    }

    /// Fresh feedback, or `None` once the watchdog has fired
    fn fresh_feedback(&mut self) -> Option<&TendonFeedback> {
        let age = self.feedback_received_at.elapsed();

        if age > FEEDBACK_TIMEOUT {
            if self.health != RuntimeHealth::FeedbackStale {
                warn!("Feedback stale ({:?} old), suspending shape output", age);
            }
            self.health = RuntimeHealth::FeedbackStale;
            None
        } else if self.latest_feedback.is_some() {
            if self.health != RuntimeHealth::Ok {
                info!("Feedback fresh, publishing shape");
            }
            self.health = RuntimeHealth::Ok;
            self.latest_feedback.as_ref()
        } else {
            // No feedback ever received
            self.health = RuntimeHealth::FeedbackStale;
            None
        }
    }

    /// Shape estimate for the current tick, if feedback is fresh
    fn compute_shape(&mut self) -> Option<Result<ShapeState, KinematicsError>> {
        let composer = self.composer;
        let feedback = self.fresh_feedback()?.clone();
        Some(estimate_shape(&composer, &feedback))
    }

    /// Last known tendon lengths, falling back to the reference pose
    fn lengths(&self) -> [f64; 9] {
        self.latest_feedback
            .as_ref()
            .map_or(REFERENCE_LENGTHS, |f| f.lengths)
    }
}

/// Section configurations, poses and backbone from nine tendon lengths
pub fn estimate_shape(
    composer: &MultiSectionComposer,
    feedback: &TendonFeedback,
) -> Result<ShapeState, KinematicsError> {
    let shape = composer.shape(&feedback.lengths)?;
    let configs = shape.map(|s| s.config);
    let backbone = compose_backbone(&configs, BACKBONE_SAMPLES);

    Ok(ShapeState {
        lengths: feedback.lengths,
        sections: shape.iter().map(SectionState::from).collect(),
        backbone: backbone.iter().map(|p| [p.x, p.y, p.z]).collect(),
    })
}

/// Per-section orientation from one IMU frame
///
/// Each relative rotation is read in its section's tendon frame, the same
/// frame the tendon-length configurations use. Bodies past the third
/// section are ignored. A section whose relative quaternion is degenerate
/// is skipped.
pub fn orientation_state(frame: &[Quaternion], lengths: &[f64; 9]) -> OrientationState {
    let mut sections = Vec::with_capacity(SECTION_COUNT);

    for (i, relative) in relative_chain(frame).iter().take(SECTION_COUNT).enumerate() {
        let q = untwist(i, relative);
        let converted = q
            .to_euler(EulerOrder::Zyx)
            .and_then(|euler| q.to_rotation_matrix().map(|rotation| (euler, rotation)));
        match converted {
            Ok((euler, rotation)) => sections.push(SectionOrientation {
                quaternion: q.as_array(),
                euler_zyx_deg: euler.to_degrees(),
                reconstructed: BendVector::from_rotation(&lengths[3 * i..3 * i + 3], &rotation),
            }),
            Err(e) => warn!("Skipping section {} orientation: {}", i + 1, e),
        }
    }

    OrientationState { sections }
}

/// Tendon lengths from the motors, off the async executor
async fn read_hardware(driver: TendonDriver) -> Result<(TendonDriver, Option<TendonFeedback>), BoxError> {
    let (driver, result) = tokio::task::spawn_blocking(move || {
        let mut driver = driver;
        let result = driver.read_tendon_lengths();
        (driver, result)
    })
    .await?;

    let feedback = match result {
        Ok(lengths) => Some(TendonFeedback { lengths }),
        Err(e) => {
            warn!("Failed to read tendon lengths: {}", e);
            None
        }
    };
    Ok((driver, feedback))
}

/// Open the motors on a blocking thread and optionally pretension them
async fn open_driver(port: String, pretension: bool) -> Result<TendonDriver, BoxError> {
    let driver = tokio::task::spawn_blocking(move || -> Result<TendonDriver, BoxError> {
        let mut driver = TendonDriver::new(&port)?;
        if pretension {
            driver.initialize(OperatingMode::Current)?;
            driver.tension(TENSION_CURRENT)?;
        }
        Ok(driver)
    })
    .await??;
    Ok(driver)
}

/// Retry delay after a failed IMU read, doubling up to a ceiling
#[derive(Debug, Clone, Copy, PartialEq)]
struct ReadBackoff {
    delay: Duration,
}

impl ReadBackoff {
    const INITIAL: Duration = Duration::from_millis(100);
    const MAX: Duration = Duration::from_secs(5);

    fn new() -> Self {
        Self { delay: Self::INITIAL }
    }

    fn reset(&mut self) {
        self.delay = Self::INITIAL;
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (self.delay * 2).min(Self::MAX);
        delay
    }
}

/// What the IMU reader does after one read
#[derive(Debug, Clone, Copy, PartialEq)]
enum ReaderStep {
    Continue,
    Retry(Duration),
    Stop,
}

/// Forward one read result to the runtime
fn reader_step(
    result: crate::sensor::Result<Option<Vec<Quaternion>>>,
    tx: &watch::Sender<Option<Vec<Quaternion>>>,
    backoff: &mut ReadBackoff,
) -> ReaderStep {
    if tx.is_closed() {
        return ReaderStep::Stop; // runtime is gone
    }

    match result {
        Ok(Some(frame)) => {
            backoff.reset();
            if tx.send(Some(frame)).is_err() {
                ReaderStep::Stop
            } else {
                ReaderStep::Continue
            }
        }
        // Malformed line or a quiet sensor, try again
        Ok(None) | Err(SensorError::Timeout) => ReaderStep::Continue,
        Err(e) => {
            let delay = backoff.next_delay();
            warn!("IMU read failed: {}, retrying in {:?}", e, delay);
            ReaderStep::Retry(delay)
        }
    }
}

/// Dedicated blocking reader that keeps the freshest IMU frame
fn spawn_imu_reader(port: String, bodies: usize) -> Result<watch::Receiver<Option<Vec<Quaternion>>>, BoxError> {
    let mut imu = ImuPort::open(&port, bodies)?;
    let (tx, rx) = watch::channel(None);

    tokio::task::spawn_blocking(move || {
        let mut backoff = ReadBackoff::new();
        loop {
            match reader_step(imu.read_frame(), &tx, &mut backoff) {
                ReaderStep::Continue => {}
                ReaderStep::Retry(delay) => std::thread::sleep(delay),
                ReaderStep::Stop => break,
            }
        }
        debug!("IMU reader on {} stopped", port);
    });

    Ok(rx)
}

pub async fn run(options: RuntimeOptions) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let pub_shape = session.declare_publisher(TOPIC_SHAPE).await?;
    let pub_orientation = session.declare_publisher(TOPIC_ORIENTATION).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut driver = match options.motor_port.clone() {
        Some(port) => Some(open_driver(port, options.pretension).await?),
        None => None,
    };
    let sim_subscriber = if driver.is_none() {
        info!("No motor port, reading simulated feedback from {}", TOPIC_SIM_TENDONS);
        Some(session.declare_subscriber(TOPIC_SIM_TENDONS).await?)
    } else {
        None
    };

    let mut imu_rx = match options.imu_port.clone() {
        Some(port) => Some(spawn_imu_reader(port, options.imu_bodies)?),
        None => None,
    };

    let mut runtime = Runtime::new(MultiSectionComposer::new(options.tendon_offset));
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        FEEDBACK_TIMEOUT.as_millis()
    );
    info!("Publishing to: {}, {}, {}", TOPIC_SHAPE, TOPIC_ORIENTATION, TOPIC_HEALTH);

    loop {
        tick.tick().await;

        // 1. Acquire feedback
        if let Some(d) = driver.take() {
            let (d, feedback) = read_hardware(d).await?;
            driver = Some(d);
            if let Some(feedback) = feedback {
                runtime.on_feedback(feedback);
            }
        }
        if let Some(subscriber) = &sim_subscriber {
            // Drain all pending samples (non-blocking), keep latest
            while let Ok(Some(sample)) = subscriber.try_recv() {
                let payload = sample.payload().to_bytes();
                match serde_json::from_slice::<TendonFeedback>(&payload) {
                    Ok(feedback) => runtime.on_feedback(feedback),
                    Err(e) => warn!("Failed to parse tendon feedback: {}", e),
                }
            }
        }

        // 2. Estimate and publish shape (includes watchdog logic)
        match runtime.compute_shape() {
            Some(Ok(shape)) => {
                let shape_json = serde_json::to_string(&shape)?;
                pub_shape.put(shape_json).await?;
            }
            Some(Err(e)) => warn!("Shape estimation failed: {}", e),
            None => {}
        }

        // 3. Publish orientation when a new IMU frame arrived
        if let Some(rx) = imu_rx.as_mut() {
            if rx.has_changed().unwrap_or(false) {
                let frame = rx.borrow_and_update().clone();
                if let Some(frame) = frame {
                    let orientation = orientation_state(&frame, &runtime.lengths());
                    let orientation_json = serde_json::to_string(&orientation)?;
                    pub_orientation.put(orientation_json).await?;
                }
            }
        }

        // 4. Publish health
        let health_json = serde_json::to_string(&runtime.health)?;
        pub_health.put(health_json).await?;
    }
}
