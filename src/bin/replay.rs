use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::Parser;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::json;
use vehicle_nav_rs::{Estimator, FusionConfig, FusionOutput, GpsFix, ImuReading, ManualClock};

#[derive(Parser, Debug)]
struct Args {
    /// Path to a recorded session (.json or .json.gz)
    #[arg(long)]
    log: PathBuf,

    /// JSON fusion config; missing fields use defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Antenna is on the roof (-1 m vertical offset)
    #[arg(long, default_value_t = false)]
    roof_mount: bool,

    /// Tighter GPS/position noise for driver-assist use
    #[arg(long, default_value_t = false)]
    adas_mode: bool,

    /// Override the stationary calibration duration (seconds)
    #[arg(long)]
    init_secs: Option<f64>,

    /// Include every fused output in the result
    #[arg(long, default_value_t = false)]
    trace: bool,
}

#[derive(Deserialize)]
struct GpsData {
    timestamp: f64,
    latitude: f64,
    longitude: f64,
    speed: f64,
    bearing: f64,
    #[serde(default)]
    altitude: Option<f64>,
}

#[derive(Deserialize)]
struct AxisData {
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Deserialize)]
struct Reading {
    timestamp: f64,
    accel: Option<AxisData>,
    gyro: Option<AxisData>,
    gps: Option<GpsData>,
}

#[derive(Deserialize)]
struct LogFile {
    readings: Vec<Reading>,
}

fn load_log(path: &Path) -> anyhow::Result<LogFile> {
    let file = File::open(path)?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let gz = GzDecoder::new(file);
        let reader = BufReader::new(gz);
        Ok(serde_json::from_reader(reader)?)
    } else {
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn build_config(args: &Args) -> anyhow::Result<FusionConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => FusionConfig::from_json_file(path)?,
        None => FusionConfig::default(),
    };
    config.roof_mount |= args.roof_mount;
    config.adas_mode |= args.adas_mode;
    if let Some(secs) = args.init_secs {
        config.init_duration_secs = secs;
    }
    Ok(config)
}

fn to_fix(gps: &GpsData) -> GpsFix {
    let fix = GpsFix::new(gps.timestamp, gps.latitude, gps.longitude, gps.speed, gps.bearing);
    match gps.altitude {
        Some(alt) => fix.with_altitude(alt),
        None => fix,
    }
}

fn to_reading(r: &Reading) -> Option<ImuReading> {
    let accel = r.accel.as_ref()?;
    let gyro = r
        .gyro
        .as_ref()
        .map(|g| (g.x, g.y, g.z))
        .unwrap_or((0.0, 0.0, 0.0));
    Some(ImuReading::new(r.timestamp, (accel.x, accel.y, accel.z), gyro))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = build_config(&args)?;
    let log = load_log(&args.log)?;
    if log.readings.is_empty() {
        anyhow::bail!("{} contains no readings", args.log.display());
    }

    let clock = ManualClock::new(log.readings[0].timestamp);
    let mut estimator = Estimator::with_clock(config, clock.clone())?;
    estimator.start_initialization();

    let mut outputs: Vec<FusionOutput> = Vec::new();
    let mut fixes = 0u64;
    let mut imu_samples = 0u64;

    for r in &log.readings {
        clock.set(r.timestamp);
        let fix = r.gps.as_ref().map(to_fix);
        let reading = to_reading(r);
        fixes += fix.is_some() as u64;
        imu_samples += reading.is_some() as u64;

        if let Some(out) = estimator.update(fix.as_ref(), reading.as_ref()) {
            outputs.push(out);
        }
    }

    let min_quality = outputs
        .iter()
        .map(|o| o.position_quality)
        .fold(f64::INFINITY, f64::min);
    let mean_quality = if outputs.is_empty() {
        0.0
    } else {
        outputs.iter().map(|o| o.position_quality).sum::<f64>() / outputs.len() as f64
    };

    let mut result = json!({
        "log": args.log.display().to_string(),
        "replayed_at": Utc::now().to_rfc3339(),
        "readings": log.readings.len(),
        "gps_fixes": fixes,
        "imu_samples": imu_samples,
        "outputs": outputs.len(),
        "min_quality": if outputs.is_empty() { 0.0 } else { min_quality },
        "mean_quality": mean_quality,
        "final": outputs.last(),
        "status": estimator.get_status(),
        "covariance_trace": estimator.filter_state().covariance_trace,
    });
    if args.trace {
        result["trace"] = serde_json::to_value(&outputs)?;
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
