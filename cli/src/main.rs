//! `beacon-track` CLI: live serial tracking, capture replay, simulation.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use beacon_core::reader::{SerialPortConfig, SerialSource};
use beacon_core::{PipelineService, RobotPose, ServiceConfig, Snapshot};
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use sim::metrics::TrackingMetrics;
use sim::replay::{load_capture, replay_capture, save_capture};
use sim::scenarios::{Scenario, ScenarioKind};
use uwb_protocol::{ChecksumPolicy, WireFormat};

#[derive(Parser)]
#[command(name = "beacon-track", about = "UWB AOA beacon tracker")]
struct Cli {
    /// JSON file with service settings (decoder, filter, reader)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track beacons from a serial-attached anchor; one JSON line per result.
    Serial {
        #[arg(long, default_value = "/dev/ttyUSB0")]
        port: String,
        #[arg(long, default_value_t = 921_600)]
        baud: u32,
        #[arg(long, value_enum)]
        format: Option<WireFormat>,
        #[arg(long, value_enum)]
        checksum: Option<ChecksumPolicy>,
        /// Stop after this many seconds (runs until killed otherwise)
        #[arg(long)]
        duration: Option<f64>,
        /// Fixed robot pose used for map projection
        #[arg(long, num_args = 3, value_names = ["X", "Y", "YAW"], allow_negative_numbers = true)]
        pose: Option<Vec<f64>>,
    },
    /// Replay a recorded byte capture through the pipeline.
    Replay {
        /// Path to capture JSON file
        input: PathBuf,
        /// Print every result as a JSON line
        #[arg(long)]
        print: bool,
        /// Output summary to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run a named scenario and score the tracker against ground truth.
    Simulate {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, value_enum, default_value = "binary")]
        format: WireFormat,
        /// Also save the generated byte capture
        #[arg(long)]
        save: Option<PathBuf>,
        /// Output metrics to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serial {
            port,
            baud,
            format,
            checksum,
            duration,
            pose,
        } => {
            let mut config = config;
            if let Some(format) = format {
                config.pipeline.decoder.format = format;
            }
            if let Some(policy) = checksum {
                config.pipeline.decoder.checksum_policy = policy;
            }
            let pose = match pose.as_deref() {
                Some(&[x, y, yaw]) => Some(RobotPose::new(x, y, yaw)),
                Some(_) => bail!("--pose takes exactly three numbers"),
                None => None,
            };
            run_serial(port, baud, config, duration, pose)?;
        }
        Commands::Replay {
            input,
            print,
            output,
        } => {
            run_replay(&input, config, print, output.as_deref())?;
        }
        Commands::Simulate {
            scenario,
            seed,
            format,
            save,
            output,
        } => {
            run_simulation(scenario, seed, format, config, save.as_deref(), output.as_deref())?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    let Some(path) = path else {
        return Ok(ServiceConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = serde_json::from_str(&text)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

fn print_snapshot(snapshot: &Snapshot) -> Result<()> {
    println!("{}", serde_json::to_string(snapshot)?);
    Ok(())
}

fn run_serial(
    port: String,
    baud: u32,
    config: ServiceConfig,
    duration: Option<f64>,
    pose: Option<RobotPose>,
) -> Result<()> {
    tracing::info!(%port, baud, format = ?config.pipeline.decoder.format, "starting live tracking");
    let source = SerialSource::new(SerialPortConfig {
        port,
        baud_rate: baud,
        ..Default::default()
    });
    let service = PipelineService::spawn(Box::new(source), config)?;
    let handle = service.handle();
    if let Some(pose) = pose {
        handle.submit_pose(pose)?;
    }

    let deadline = duration.map(|s| Instant::now() + Duration::from_secs_f64(s.max(0.0)));
    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match service.results().recv_timeout(Duration::from_millis(200)) {
            Ok(snapshot) => print_snapshot(&snapshot)?,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let stats = handle.stats();
    service.stop(Duration::from_secs(2))?;
    eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn run_replay(input: &Path, config: ServiceConfig, print: bool, output_path: Option<&Path>) -> Result<()> {
    let capture = load_capture(input)?;
    eprintln!(
        "Replaying {} ({} chunks, {} bytes, {:?})...",
        input.display(),
        capture.chunks.len(),
        capture.total_bytes(),
        capture.format
    );

    let start = Instant::now();
    let outcome = replay_capture(&capture, config.pipeline)?;
    let elapsed = start.elapsed();

    if print {
        for snapshot in &outcome.snapshots {
            print_snapshot(snapshot)?;
        }
    }

    let mut summary = serde_json::json!({
        "input": input.display().to_string(),
        "elapsed_s": elapsed.as_secs_f64(),
        "results": outcome.snapshots.len(),
        "evicted": outcome.evicted,
        "stats": outcome.stats,
    });
    if !capture.truth.is_empty() {
        let metrics = TrackingMetrics::evaluate(&outcome.snapshots, &capture.truth);
        summary["rmse_local_m"] = metrics.rmse_local().into();
        summary["rmse_global_m"] = metrics.rmse_global().into();
    }
    eprintln!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(opath) = output_path {
        std::fs::write(opath, serde_json::to_string_pretty(&summary)?)?;
    }
    Ok(())
}

fn run_simulation(
    kind: ScenarioKind,
    seed: u64,
    format: WireFormat,
    config: ServiceConfig,
    save_path: Option<&Path>,
    output_path: Option<&Path>,
) -> Result<()> {
    let scenario = Scenario::build(kind, seed);
    println!(
        "Running scenario '{}' (seed={}, duration={:.0}s, {:?})...",
        scenario.name, seed, scenario.duration, format
    );

    let capture = scenario.run(format);
    let start = Instant::now();
    let outcome = replay_capture(&capture, config.pipeline)?;
    let elapsed = start.elapsed();
    let metrics = TrackingMetrics::evaluate(&outcome.snapshots, &capture.truth);

    println!(
        "Done: {} chunks, {} results, {} active tags, elapsed={:.3}s",
        capture.chunks.len(),
        outcome.snapshots.len(),
        outcome.stats.active_targets,
        elapsed.as_secs_f64(),
    );
    println!(
        "RMSE local={:.3} m, global={:.3} m, bearing jumps rejected={}",
        metrics.rmse_local(),
        metrics.rmse_global(),
        metrics.angle_jumps_rejected,
    );

    if let Some(spath) = save_path {
        save_capture(&capture, spath)?;
        println!("Capture saved to {}", spath.display());
    }

    if let Some(opath) = output_path {
        let json = serde_json::json!({
            "scenario": scenario.name,
            "seed": seed,
            "format": format,
            "elapsed_s": elapsed.as_secs_f64(),
            "metrics": metrics,
            "stats": outcome.stats,
        });
        std::fs::write(opath, serde_json::to_string_pretty(&json)?)?;
        println!("Metrics saved to {}", opath.display());
    }

    Ok(())
}
