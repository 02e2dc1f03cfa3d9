// Interactive calibration: sweeps every servo to its physical limits
//
// IMPORTANT: support the robot so the legs can move freely, and keep a
// hand near the power switch - a servo driven past its mechanical stop
// draws stall current.
//
// Usage: cargo run --bin calibrate -- [--port PORT] [--config FILE] [--out FILE]

use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;

use hexapod_runtime::bus::{DryRunLink, SerialLink, Transport};
use hexapod_runtime::config::{HexapodConfig, SERVO_PORT};
use hexapod_runtime::engine::{CalibrationPrompt, Hexapod};

/// Interactive servo calibration for the hexapod
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Serial port of the servo controller
    #[arg(short, long)]
    port: Option<String>,

    /// Existing geometry/calibration file to start from (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where to write the updated calibration (JSON)
    #[arg(short, long, default_value = "hexapod-calib.json")]
    out: PathBuf,

    /// Log move frames instead of opening the serial port
    #[arg(long)]
    dry_run: bool,
}

struct StdinPrompt;

impl CalibrationPrompt for StdinPrompt {
    fn at_limit(&mut self, channel: u8, pulse_us: u16) -> bool {
        print!(
            "Servo {} at {}us - at the physical limit? [y/N]: ",
            channel, pulse_us
        );
        io::stdout().flush().unwrap();
        let mut input = String::new();
        io::stdin().read_line(&mut input).unwrap();
        input.trim().eq_ignore_ascii_case("y")
    }
}

fn confirm(prompt: &str) -> bool {
    print!("{} [y/N]: ", prompt);
    io::stdout().flush().unwrap();
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();
    input.trim().eq_ignore_ascii_case("y")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    println!("Hexapod servo calibration (WITH WRITES)");
    println!("  This tool WILL move every joint to its mechanical limits.");
    println!("  Make sure the robot is elevated and the legs swing freely!");
    println!();

    if !confirm("Is the robot elevated with all legs free to move?") {
        println!("Aborted.");
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => HexapodConfig::load(path)?,
        None => HexapodConfig::default(),
    };

    if args.dry_run {
        calibrate_with(DryRunLink::new(), config, &args.out)
    } else {
        let port = args.port.as_deref().unwrap_or(SERVO_PORT);
        println!("Opening serial port {}...", port);
        let link = SerialLink::open(port)?;
        calibrate_with(link, config, &args.out)
    }
}

fn calibrate_with<T: Transport>(
    link: T,
    config: HexapodConfig,
    out: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut hexapod = Hexapod::new(link, &config);

    println!("Calibrating 18 servos, leg by leg. Answer the limit prompts.");
    hexapod.calibrate(&mut StdinPrompt)?;

    // Fold the measured bounds back into the config and persist it
    let mut updated = config.clone();
    for (i, leg) in hexapod.plane().legs().iter().enumerate() {
        for (j, servo) in leg.servos().iter().enumerate() {
            updated.legs[i].servos[j].min_pulse = servo.min_pulse();
            updated.legs[i].servos[j].max_pulse = servo.max_pulse();
        }
    }
    std::fs::write(out, serde_json::to_string_pretty(&updated)?)?;
    println!("Calibration written to {}", out.display());

    println!("Moving all servos to their midpoints...");
    hexapod.all_servo_mid_position()?;
    println!("Done. Power cycle count: {}", hexapod.power_cycle());

    Ok(())
}
