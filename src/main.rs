//! CLI Entry Point for rust_plr
//!
//! Provides command-line access to:
//! - Pupil Remote (raw commands, time, notifications, annotations)
//! - Light-onset detection from the world camera
//! - Spectrometer measurement and radiance calibration
//!
//! Spectrometer commands run against the simulated device until a vendor driver
//! implements [`rust_plr::spectro::Spectrometer`].
//!
//! # Usage
//!
//! ```bash
//! rust_plr command R
//! rust_plr notify start_plugin name=Annotation_Capture
//! rust_plr detect-light --label light_on --wait-time 6
//! rust_plr calibrate --spectra spectra.csv --info info.csv \
//!     --dark-coefficients dark_coeffs.csv --calibration cal_per_wl.csv \
//!     --sensor-area area.csv --output radiance.csv
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rust_plr::config::{PlrConfig, DEFAULT_CONFIG_PATH};
use rust_plr::logging::{self, OutputFormat, TracingConfig};
use rust_plr::pupil::{Annotation, LightOnset, LightOnsetDetector, Notification, Payload, PupilRemote};
use rust_plr::spectro::{
    dark_measurement, predict_dark_counts, table, AdaptiveMeasurement, DarkCalibration, MockSpectrometer,
    RadianceCalibrator, Setting, SpectralTable, Spectrometer,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "rust_plr")]
#[command(about = "Pupil Core control and spectrometer calibration for PLR experiments", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Pupil Capture host (overrides configuration)
    #[arg(long)]
    address: Option<String>,

    /// Pupil Remote port (overrides configuration)
    #[arg(long)]
    port: Option<u16>,

    /// Log output format (overrides configuration)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormat> for OutputFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Pretty => OutputFormat::Pretty,
            LogFormat::Compact => OutputFormat::Compact,
            LogFormat::Json => OutputFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Send a raw Pupil Remote command (e.g. R, r, C, c, v) and print the reply
    Command {
        /// Command string
        command: String,
    },

    /// Print the current Pupil time
    Time,

    /// Send a notification
    Notify {
        /// Notification subject (e.g. start_plugin)
        subject: String,

        /// Extra fields as key=value
        fields: Vec<String>,
    },

    /// Publish an annotation
    Annotate {
        /// Annotation label
        label: String,

        /// Pupil timestamp (defaults to the current Pupil time)
        #[arg(long)]
        timestamp: Option<f64>,

        /// Annotation duration in seconds
        #[arg(long)]
        duration: Option<f64>,
    },

    /// Wait for a light onset in the world camera and annotate it
    DetectLight {
        /// Annotation label
        #[arg(long, default_value = "light_on")]
        label: String,

        /// Brightness increase that counts as an onset (overrides configuration)
        #[arg(long)]
        threshold: Option<f64>,

        /// Give up after this many seconds (overrides configuration)
        #[arg(long)]
        wait_time: Option<f64>,
    },

    /// Measure one spectrum with an adaptively chosen integration time
    Measure {
        /// Fixed integration time in microseconds
        #[arg(long)]
        integration_time: Option<f64>,

        /// Peak count rate of the simulated source (counts/us)
        #[arg(long, default_value_t = 10.0)]
        source_rate: f64,

        /// Light source setting as key=value, recorded with the measurement
        #[arg(long = "setting")]
        settings: Vec<String>,

        /// Spectrum CSV to write
        #[arg(long, default_value = "spectra.csv")]
        output: PathBuf,

        /// Measurement info CSV to write
        #[arg(long, default_value = "info.csv")]
        info: PathBuf,
    },

    /// Sample the dark spectrum at several integration times
    DarkMeasure {
        /// Integration times in microseconds
        #[arg(long, value_delimiter = ',', default_value = "1000,10000,100000,1000000")]
        integration_times: Vec<f64>,

        /// Dark measurement CSV to write
        #[arg(long, default_value = "dark_measurement.csv")]
        output: PathBuf,
    },

    /// Convert measured spectra to spectral irradiance (W/m^2/nm)
    Calibrate {
        /// Spectra CSV (header row of pixel wavelengths)
        #[arg(long)]
        spectra: PathBuf,

        /// Measurement info CSV
        #[arg(long)]
        info: PathBuf,

        /// Dark-count coefficient CSV
        #[arg(long)]
        dark_coefficients: PathBuf,

        /// Absolute calibration factors, one per pixel (uJ/count)
        #[arg(long)]
        calibration: PathBuf,

        /// Sensor area file (cm^2)
        #[arg(long)]
        sensor_area: PathBuf,

        /// Radiance CSV to write
        #[arg(long, default_value = "radiance.csv")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = PlrConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(address) = cli.address.clone() {
        config.pupil.address = address;
    }
    if let Some(port) = cli.port {
        config.pupil.request_port = port;
    }

    let mut tracing_config = TracingConfig::from_config(&config).map_err(anyhow::Error::msg)?;
    if let Some(format) = cli.log_format {
        tracing_config = tracing_config.with_format(format.into());
    }
    logging::init(tracing_config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Command { command } => run_command(&config, &command),
        Commands::Time => print_time(&config),
        Commands::Notify { subject, fields } => send_notification(&config, subject, &fields),
        Commands::Annotate {
            label,
            timestamp,
            duration,
        } => send_annotation(&config, label, timestamp, duration),
        Commands::DetectLight {
            label,
            threshold,
            wait_time,
        } => detect_light(config, label, threshold, wait_time),
        Commands::Measure {
            integration_time,
            source_rate,
            settings,
            output,
            info,
        } => measure(&config, integration_time, source_rate, &settings, output, info),
        Commands::DarkMeasure {
            integration_times,
            output,
        } => measure_dark(&config, &integration_times, output),
        Commands::Calibrate {
            spectra,
            info,
            dark_coefficients,
            calibration,
            sensor_area,
            output,
        } => calibrate(&config, spectra, info, dark_coefficients, calibration, sensor_area, output),
    }
}

fn connect(config: &PlrConfig) -> Result<PupilRemote> {
    PupilRemote::connect(&config.pupil.address, config.pupil.request_port).with_context(|| {
        format!(
            "connecting to Pupil Remote at {}:{}",
            config.pupil.address, config.pupil.request_port
        )
    })
}

fn split_field(field: &str) -> Result<(&str, &str)> {
    match field.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => bail!("expected key=value, got '{field}'"),
    }
}

/// Numbers and booleans keep their type; anything else is a string.
fn field_value(value: &str) -> rmpv::Value {
    if let Ok(number) = value.parse::<i64>() {
        rmpv::Value::from(number)
    } else if let Ok(number) = value.parse::<f64>() {
        rmpv::Value::from(number)
    } else if let Ok(flag) = value.parse::<bool>() {
        rmpv::Value::from(flag)
    } else {
        rmpv::Value::from(value)
    }
}

fn run_command(config: &PlrConfig, command: &str) -> Result<()> {
    let mut remote = connect(config)?;
    let reply = remote.command(command)?;
    println!("{reply}");
    Ok(())
}

fn print_time(config: &PlrConfig) -> Result<()> {
    let mut remote = connect(config)?;
    println!("{}", remote.pupil_time()?);
    Ok(())
}

fn send_notification(config: &PlrConfig, subject: String, fields: &[String]) -> Result<()> {
    let mut notification = Notification::new(subject);
    for field in fields {
        let (key, value) = split_field(field)?;
        notification = notification.with(key, field_value(value));
    }
    let mut remote = connect(config)?;
    println!("{}", remote.notify(&notification)?);
    Ok(())
}

fn send_annotation(config: &PlrConfig, label: String, timestamp: Option<f64>, duration: Option<f64>) -> Result<()> {
    let mut remote = connect(config)?;
    remote.notify(&Notification::start_plugin("Annotation_Capture", Payload::new()))?;

    let mut annotation = Annotation::new(label);
    let timestamp = match timestamp {
        Some(t) => t,
        None => remote.pupil_time()?,
    };
    annotation.set_timestamp(timestamp);
    if let Some(duration) = duration {
        annotation = annotation.with_field("duration", duration);
    }

    let mut publisher = remote.publisher()?;
    // PUB sockets drop messages sent before the connection completes
    std::thread::sleep(Duration::from_secs(1));
    publisher.send_annotation(&annotation)?;
    info!(label = annotation.label(), timestamp, "Annotation sent");
    Ok(())
}

fn detect_light(mut config: PlrConfig, label: String, threshold: Option<f64>, wait_time: Option<f64>) -> Result<()> {
    if let Some(threshold) = threshold {
        config.light.threshold = threshold;
    }
    if wait_time.is_some() {
        config.light.wait_time_secs = wait_time;
    }
    config.validate()?;

    let mut remote = connect(&config)?;
    remote.notify(&Notification::start_plugin("Annotation_Capture", Payload::new()))?;
    let mut subscriber = remote.subscriber(&[config.pupil.frame_topic.as_str()])?;
    let mut publisher = remote.publisher()?;
    let mut annotation = Annotation::new(label);

    let detector = LightOnsetDetector::from_config(&config.light, &config.pupil);
    if let LightOnset::Detected { timestamp, .. } =
        detector.run(&mut subscriber, &mut publisher, &mut annotation)?
    {
        println!("{timestamp}");
    }
    Ok(())
}

fn measure(
    config: &PlrConfig,
    integration_time: Option<f64>,
    source_rate: f64,
    settings: &[String],
    output: PathBuf,
    info_path: PathBuf,
) -> Result<()> {
    let mut setting = Setting::new();
    for field in settings {
        let (key, value) = split_field(field)?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::from(value));
        setting.insert(key.to_string(), value);
    }

    let mut device = MockSpectrometer::new(source_rate);
    let procedure = AdaptiveMeasurement::new(config.spectrometer.clone());
    let (measurement, termination) = procedure
        .measure_with_termination(&mut device, integration_time, setting)
        .context("measuring spectrum")?;
    info!(?termination, integration_time = measurement.info.integration_time, "Measurement finished");

    let spectra = SpectralTable::new(device.wavelengths()?, vec![measurement.counts]);
    spectra.write_csv(&output)?;
    table::write_info(&info_path, &[measurement.info])?;
    Ok(())
}

fn measure_dark(config: &PlrConfig, integration_times: &[f64], output: PathBuf) -> Result<()> {
    let mut device = MockSpectrometer::dark();
    let samples = dark_measurement(&mut device, integration_times, &config.spectrometer)
        .context("sampling dark spectra")?;
    table::write_dark_samples(&output, &samples)?;
    Ok(())
}

fn calibrate(
    config: &PlrConfig,
    spectra: PathBuf,
    info: PathBuf,
    dark_coefficients: PathBuf,
    calibration: PathBuf,
    sensor_area: PathBuf,
    output: PathBuf,
) -> Result<()> {
    let spectra = SpectralTable::read_csv(&spectra).with_context(|| format!("reading {}", spectra.display()))?;
    let info = table::read_info(&info).with_context(|| format!("reading {}", info.display()))?;
    let dark_model = DarkCalibration::from_csv(&dark_coefficients)
        .with_context(|| format!("reading {}", dark_coefficients.display()))?;
    let cal_per_wl =
        table::read_column(&calibration).with_context(|| format!("reading {}", calibration.display()))?;
    let area =
        table::read_sensor_area(&sensor_area).with_context(|| format!("reading {}", sensor_area.display()))?;

    let dark = predict_dark_counts(&info, &dark_model, config.calibration.fit_rmse_threshold);
    let calibrator = RadianceCalibrator::new(spectra.wavelengths().to_vec(), cal_per_wl, area)?
        .with_config(&config.calibration);
    let radiance = calibrator.calibrate_all(spectra.rows(), &info, &dark)?;
    radiance.write_csv(&output)?;
    Ok(())
}
