// Keyboard teleop: WASD walk, Z/X turn, R/F speed, G sit, M mid pose, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use hexapod_runtime::config::TOPIC_CMD_BODY;
use hexapod_runtime::messages::BodyCommand;

const STEP_SIZES: [f32; 3] = [10.0, 20.0, 35.0]; // mm per half-step
const TURN_SIZES: [f32; 3] = [0.08, 0.15, 0.3]; // rad per half-step
const STEP_TIME_MS: u32 = 400;
const INPUT_TIMEOUT_MS: u64 = 300; // Stop walking after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_BODY).await?;

    info!("Controls: WASD=walk, Z/X=turn, R/F=speed, G=sit, M=mid pose, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;

    // Persistent walk state
    let mut x = 0.0f32;
    let mut y = 0.0f32;
    let mut angular = 0.0f32;
    let mut last_movement_input = Instant::now();

    loop {
        let mut one_shot: Option<BodyCommand> = None;

        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    // Walk - update displacement and refresh timestamp
                    KeyCode::Char('w') if pressed => {
                        x = STEP_SIZES[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        x = -STEP_SIZES[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        y = STEP_SIZES[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        y = -STEP_SIZES[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Turn
                    KeyCode::Char('z') if pressed => {
                        angular = TURN_SIZES[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('x') if pressed => {
                        angular = -TURN_SIZES[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    // Poses
                    KeyCode::Char('g') if pressed => {
                        one_shot = Some(BodyCommand::Sit);
                    }
                    KeyCode::Char('m') if pressed => {
                        one_shot = Some(BodyCommand::MidPose);
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Stop walking if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            x = 0.0;
            y = 0.0;
            angular = 0.0;
        }

        // Always publish at ~50Hz so the runtime watchdog stays fed
        let cmd = if let Some(cmd) = one_shot {
            cmd
        } else if angular != 0.0 {
            BodyCommand::Turn {
                angular,
                step_time_ms: STEP_TIME_MS,
            }
        } else if x != 0.0 || y != 0.0 {
            BodyCommand::Walk {
                x,
                y,
                step_time_ms: STEP_TIME_MS,
            }
        } else {
            BodyCommand::Stop
        };
        publisher.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
