use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use hexapod_runtime::runtime::{self, RunOptions};

/// Hexapod servo runtime: drives 18 servos over a USC-32 serial controller
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Serial port of the servo controller
    #[arg(short, long)]
    port: Option<String>,

    /// Robot geometry/calibration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log move frames instead of opening the serial port
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    let args = Args::parse();
    let opts = RunOptions {
        port: args.port,
        config_path: args.config,
        dry_run: args.dry_run,
    };

    if let Err(e) = runtime::run(opts).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
