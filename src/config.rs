//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading for the Pupil Remote client,
//! the light-onset detector and the spectrometer calibration pipeline.
//! Configuration is loaded from:
//! 1. A TOML file (default `config/rust_plr.toml`; missing files are allowed)
//! 2. Environment variables (prefixed with RUST_PLR_)
//!
//! Every field carries a default, so an empty configuration reproduces the values
//! Pupil Capture and the Ocean Optics workflow use out of the box.
//!
//! # Example
//! ```no_run
//! use rust_plr::config::PlrConfig;
//!
//! let config = PlrConfig::load()?;
//! println!("Pupil Remote at {}:{}", config.pupil.address, config.pupil.request_port);
//! # Ok::<(), rust_plr::error::PlrError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{PlrError, PlrResult};

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/rust_plr.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlrConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Pupil Remote connection settings
    #[serde(default)]
    pub pupil: PupilConfig,
    /// Light-onset detector settings
    #[serde(default)]
    pub light: LightConfig,
    /// Adaptive spectrometer measurement settings
    #[serde(default)]
    pub spectrometer: SpectrometerConfig,
    /// Dark-count and radiance calibration settings
    #[serde(default)]
    pub calibration: CalibrationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Where Pupil Capture's remote helper listens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PupilConfig {
    /// Host running Pupil Capture
    #[serde(default = "default_address")]
    pub address: String,
    /// Pupil Remote REQ/REP port
    #[serde(default = "default_request_port")]
    pub request_port: u16,
    /// Topic carrying world camera frames (requires the Frame Publisher plugin in BGR mode)
    #[serde(default = "default_frame_topic")]
    pub frame_topic: String,
}

/// Light-onset detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightConfig {
    /// Mean-brightness increase between consecutive frames that counts as an onset
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Give up after this many seconds (unbounded when absent)
    #[serde(default)]
    pub wait_time_secs: Option<f64>,
}

/// Adaptive integration-time search configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrometerConfig {
    /// First integration time tried by the search, in microseconds
    #[serde(default = "default_initial_integration_time")]
    pub initial_integration_time_us: f64,
    /// Pause after each device call, in milliseconds
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    /// Lower edge of the target band as a fraction of the device maximum
    #[serde(default = "default_lower_fraction")]
    pub lower_fraction: f64,
    /// Upper edge of the target band as a fraction of the device maximum
    #[serde(default = "default_upper_fraction")]
    pub upper_fraction: f64,
    /// Hard cap on search iterations
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

/// Calibration pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Pixels whose dark-count fit RMSE exceeds this are masked
    #[serde(default = "default_fit_rmse_threshold")]
    pub fit_rmse_threshold: f64,
    /// First wavelength of the output grid (nm, inclusive)
    #[serde(default = "default_wavelength_start")]
    pub wavelength_start_nm: u32,
    /// Last wavelength of the output grid (nm, inclusive)
    #[serde(default = "default_wavelength_end")]
    pub wavelength_end_nm: u32,
    /// Factor converting uW/cm^2/nm into the output unit (W/m^2/nm)
    #[serde(default = "default_output_scale")]
    pub output_scale: f64,
}

// Default value functions
fn default_name() -> String {
    "rust_plr".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_request_port() -> u16 {
    50020
}

fn default_frame_topic() -> String {
    "frame.world".to_string()
}

fn default_threshold() -> f64 {
    15.0
}

fn default_initial_integration_time() -> f64 {
    1000.0
}

fn default_settle_delay() -> u64 {
    50
}

fn default_lower_fraction() -> f64 {
    0.8
}

fn default_upper_fraction() -> f64 {
    0.9
}

fn default_max_iterations() -> u32 {
    64
}

fn default_fit_rmse_threshold() -> f64 {
    110.0
}

fn default_wavelength_start() -> u32 {
    380
}

fn default_wavelength_end() -> u32 {
    780
}

fn default_output_scale() -> f64 {
    0.01
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for PupilConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            request_port: default_request_port(),
            frame_topic: default_frame_topic(),
        }
    }
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            wait_time_secs: None,
        }
    }
}

impl Default for SpectrometerConfig {
    fn default() -> Self {
        Self {
            initial_integration_time_us: default_initial_integration_time(),
            settle_delay_ms: default_settle_delay(),
            lower_fraction: default_lower_fraction(),
            upper_fraction: default_upper_fraction(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            fit_rmse_threshold: default_fit_rmse_threshold(),
            wavelength_start_nm: default_wavelength_start(),
            wavelength_end_nm: default_wavelength_end(),
            output_scale: default_output_scale(),
        }
    }
}

impl LightConfig {
    /// Maximum wait as a [`Duration`], if one is configured.
    pub fn wait_time(&self) -> Option<Duration> {
        self.wait_time_secs.map(Duration::from_secs_f64)
    }
}

impl SpectrometerConfig {
    /// Settle delay as a [`Duration`].
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl PlrConfig {
    /// Load configuration from the default file and environment variables
    ///
    /// Environment variables can override configuration with prefix RUST_PLR_
    /// Example: RUST_PLR_PUPIL__REQUEST_PORT=50021
    pub fn load() -> PlrResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> PlrResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(PlrConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RUST_PLR_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> PlrResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(PlrError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(PlrError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        let search = &self.spectrometer;
        if !(search.lower_fraction > 0.0
            && search.lower_fraction < search.upper_fraction
            && search.upper_fraction <= 1.0)
        {
            return Err(PlrError::Configuration(format!(
                "Invalid target band [{}, {}]. Need 0 < lower < upper <= 1",
                search.lower_fraction, search.upper_fraction
            )));
        }

        if search.initial_integration_time_us <= 0.0 {
            return Err(PlrError::Configuration(
                "initial_integration_time_us must be positive".to_string(),
            ));
        }

        let cal = &self.calibration;
        if cal.wavelength_start_nm > cal.wavelength_end_nm {
            return Err(PlrError::Configuration(format!(
                "Empty wavelength grid {}..={} nm",
                cal.wavelength_start_nm, cal.wavelength_end_nm
            )));
        }

        if let Some(wait) = self.light.wait_time_secs {
            if !(wait.is_finite() && wait >= 0.0) {
                return Err(PlrError::Configuration(format!(
                    "Invalid wait_time_secs {wait}"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    #[serial]
    fn missing_file_yields_defaults() {
        let config = PlrConfig::load_from("/nonexistent/rust_plr.toml").unwrap();
        assert_eq!(config, PlrConfig::default());
        assert_eq!(config.pupil.request_port, 50020);
        assert_eq!(config.calibration.fit_rmse_threshold, 110.0);
    }

    #[test]
    #[serial]
    fn shipped_config_matches_defaults() {
        let config = PlrConfig::load_from(DEFAULT_CONFIG_PATH).unwrap();
        assert_eq!(config, PlrConfig::default());
    }

    #[test]
    #[serial]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[pupil]
address = "192.168.1.20"

[light]
threshold = 20.0
wait_time_secs = 6.0
"#
        )
        .unwrap();

        let config = PlrConfig::load_from(file.path()).unwrap();
        assert_eq!(config.pupil.address, "192.168.1.20");
        assert_eq!(config.pupil.request_port, 50020);
        assert_eq!(config.light.threshold, 20.0);
        assert_eq!(config.light.wait_time(), Some(Duration::from_secs(6)));
    }

    #[test]
    #[serial]
    fn environment_overrides_file() {
        std::env::set_var("RUST_PLR_PUPIL__REQUEST_PORT", "50123");
        let config = PlrConfig::load_from("/nonexistent/rust_plr.toml");
        std::env::remove_var("RUST_PLR_PUPIL__REQUEST_PORT");

        assert_eq!(config.unwrap().pupil.request_port, 50123);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = PlrConfig::default();
        config.application.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_band_rejected() {
        let mut config = PlrConfig::default();
        config.spectrometer.lower_fraction = 0.95;
        assert!(matches!(
            config.validate(),
            Err(PlrError::Configuration(_))
        ));
    }

    #[test]
    fn test_empty_wavelength_grid_rejected() {
        let mut config = PlrConfig::default();
        config.calibration.wavelength_start_nm = 800;
        assert!(config.validate().is_err());
    }
}
