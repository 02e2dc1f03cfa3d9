// 50 Hz control loop with watchdog
//
// Commands arrive over zenoh and are either executed immediately (tilt,
// shift, sit, mid-pose) or stored as a gait intent (walk, turn). The gait
// intent is serviced one tripod half-step at a time: whenever the engine
// goes idle and the intent is still fresh, the next half-step is queued.
// A stale intent trips the watchdog, which drops every queued trajectory
// and holds the pose.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tracing::{info, warn};

use crate::bus::{DryRunLink, SerialLink, Transport};
use crate::config::{
    HexapodConfig, CMD_TIMEOUT, DEFAULT_STEP_HEIGHT_MM, LOOP_HZ, SERVO_PORT, TOPIC_CMD_BODY,
    TOPIC_HEALTH, TOPIC_STATE,
};
use crate::engine::hexapod::{Hexapod, TRIPOD_A, TRIPOD_B};
use crate::engine::math::Vec3;
use crate::messages::{BodyCommand, RuntimeHealth, SessionReport};

pub struct RunOptions {
    pub port: Option<String>,
    pub config_path: Option<PathBuf>,
    pub dry_run: bool,
}

struct Runtime {
    gait: Option<BodyCommand>,
    cmd_received_at: Instant,
    swing_a: bool,
    health: RuntimeHealth,
}

impl Runtime {
    fn new() -> Self {
        Self {
            gait: None,
            cmd_received_at: Instant::now(),
            swing_a: true,
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    /// Process an incoming command
    fn on_command<T: Transport>(&mut self, cmd: BodyCommand, hexapod: &mut Hexapod<T>) {
        info!("Received command: {:?}", cmd);
        hexapod.note_command();
        self.cmd_received_at = Instant::now();
        self.health = RuntimeHealth::Ok;

        match cmd {
            BodyCommand::Walk { .. } | BodyCommand::Turn { .. } => {
                self.gait = Some(cmd);
            }
            BodyCommand::Stop => {
                self.gait = None;
                hexapod.plane_mut().reset_all_movement();
            }
            BodyCommand::Tilt {
                roll,
                pitch,
                yaw,
                time_ms,
            } => {
                self.gait = None;
                hexapod.plane_mut().rotate_euler(roll, pitch, yaw, time_ms);
            }
            BodyCommand::Shift { x, y, z, time_ms } => {
                self.gait = None;
                let plane = hexapod.plane_mut();
                let disp = plane.frame().to_world(Vec3::new(x, y, z));
                let new_origin = plane.origin() + disp;
                plane.translate(new_origin, time_ms);
            }
            BodyCommand::Sit => {
                self.gait = None;
                if let Err(e) = hexapod.sit_dance() {
                    warn!("Sit sequence aborted: {}", e);
                    self.health = RuntimeHealth::LinkError;
                }
            }
            BodyCommand::MidPose => {
                self.gait = None;
                if let Err(e) = hexapod.all_servo_mid_position() {
                    warn!("Mid pose aborted: {}", e);
                    self.health = RuntimeHealth::LinkError;
                }
            }
        }
    }

    /// Queue the next tripod half-step while the gait intent is fresh
    fn service_gait<T: Transport>(&mut self, hexapod: &mut Hexapod<T>) {
        let Some(gait) = self.gait else {
            return;
        };

        let cmd_age = self.cmd_received_at.elapsed();
        if cmd_age > CMD_TIMEOUT {
            // Watchdog triggered - stop the robot
            if self.health != RuntimeHealth::CmdStale {
                warn!("Command stale ({:?} old), stopping gait", cmd_age);
            }
            self.health = RuntimeHealth::CmdStale;
            self.gait = None;
            hexapod.plane_mut().reset_all_movement();
            return;
        }

        if !hexapod.is_idle() {
            return;
        }

        let (swing, stance) = if self.swing_a {
            (TRIPOD_A, TRIPOD_B)
        } else {
            (TRIPOD_B, TRIPOD_A)
        };
        self.swing_a = !self.swing_a;

        let plane = hexapod.plane_mut();
        match gait {
            BodyCommand::Walk { x, y, step_time_ms } => {
                let disp = Vec3::new(x, y, 0.0);
                plane.step_group(disp, step_time_ms, &swing, DEFAULT_STEP_HEIGHT_MM);
                plane.step_group(-disp, step_time_ms, &stance, 0.0);
            }
            BodyCommand::Turn {
                angular,
                step_time_ms,
            } => {
                plane.turn_group(angular, step_time_ms, &swing, DEFAULT_STEP_HEIGHT_MM);
                plane.turn_group(-angular, step_time_ms, &stance, 0.0);
            }
            _ => {}
        }
        hexapod.start_trajectories();
    }

    /// Link failure: abort the running command, keep the loop alive
    fn abort<T: Transport>(&mut self, hexapod: &mut Hexapod<T>) {
        self.gait = None;
        self.health = RuntimeHealth::LinkError;
        hexapod.plane_mut().reset_all_movement();
    }
}

pub async fn run(opts: RunOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = match &opts.config_path {
        Some(path) => HexapodConfig::load(path)?,
        None => HexapodConfig::default(),
    };

    if opts.dry_run {
        info!("Dry run: move frames are logged, not sent");
        run_loop(Hexapod::new(DryRunLink::new(), &config)).await
    } else {
        let port = opts.port.as_deref().unwrap_or(SERVO_PORT);
        info!("Opening servo link on {}", port);
        let link = SerialLink::open(port)?;
        run_loop(Hexapod::new(link, &config)).await
    }
}

async fn run_loop<T: Transport>(
    mut hexapod: Hexapod<T>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_BODY).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;
    let pub_state = session.declare_publisher(TOPIC_STATE).await?;

    let mut runtime = Runtime::new();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let mut report_in: u64 = 0;

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD_BODY);
    info!("Publishing to: {}, {}", TOPIC_HEALTH, TOPIC_STATE);

    loop {
        tick.tick().await;

        // 1. Drain all pending commands (non-blocking)
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<BodyCommand>(&payload) {
                Ok(cmd) => {
                    runtime.on_command(cmd, &mut hexapod);
                }
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                }
            }
        }

        // 2. Advance the gait and the engine (includes watchdog logic)
        runtime.service_gait(&mut hexapod);
        if let Err(e) = hexapod.tick() {
            warn!("Link failure, aborting current command: {}", e);
            runtime.abort(&mut hexapod);
        }

        // 3. Publish health every tick, the session report once a second
        let health_json = serde_json::to_string(&runtime.health)?;
        pub_health.put(health_json).await?;

        if report_in == 0 {
            let report = SessionReport {
                uptime_s: hexapod.total_use_time().as_secs(),
                idle_s: hexapod.idle_time().as_secs(),
                power_cycles: hexapod.power_cycle(),
            };
            pub_state.put(serde_json::to_string(&report)?).await?;
            report_in = LOOP_HZ;
        }
        report_in -= 1;
    }
}
