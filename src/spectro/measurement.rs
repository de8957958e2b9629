//! Adaptive spectrometer measurement
//!
//! Finds the integration time at which the brightest pixel reads 80-90 % of the
//! device maximum, then returns that spectrum with its metadata. Working near the
//! top of the range maximises signal-to-noise without saturating.
//!
//! # Search
//!
//! Starting at 1 ms, the integration time doubles while the peak is below the band
//! and halves while it is above the band with nothing below it seen yet. Once times
//! on both sides are known, the search bisects between the last time below and the
//! last time above. It stops when the peak lands in the band, when
//! the device ceiling was used (too little light to reach the band), or when the
//! device floor still saturates. Lower light levels can take a few minutes because
//! every step is a full acquisition.
//!
//! # Configuration
//!
//! ```toml
//! [spectrometer]
//! initial_integration_time_us = 1000.0
//! settle_delay_ms = 50
//! lower_fraction = 0.8
//! upper_fraction = 0.9
//! max_iterations = 64
//! ```

use std::collections::BTreeMap;
use std::thread::sleep;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SpectrometerConfig;
use crate::error::{PlrError, PlrResult};
use crate::spectro::device::{board_and_micro, peak, Spectrometer};

/// Caller-supplied description of the light source (e.g. `{"led": 5, "intensity": 3000}`).
pub type Setting = BTreeMap<String, serde_json::Value>;

/// Metadata recorded alongside each spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementInfo {
    /// Detector board temperature (C)
    pub board_temp: f64,
    /// Microcontroller temperature (C)
    pub micro_temp: f64,
    /// Integration time of the returned spectrum (us)
    pub integration_time: f64,
    /// Device model
    pub model: String,
    /// Light source setting, merged in from the caller
    #[serde(default)]
    pub setting: Setting,
}

/// A spectrum in raw counts with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub counts: Vec<f64>,
    pub info: MeasurementInfo,
}

/// Why the adaptive search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Peak inside the target band
    InBand,
    /// Ceiling used; the source is too dim to reach the band
    Ceiling,
    /// Floor used and still above the band
    Floor,
    /// Caller fixed the integration time
    Fixed,
}

/// One acquisition at a given integration time.
struct Sample {
    counts: Vec<f64>,
    temperatures: Vec<f64>,
    peak: f64,
}

/// The adaptive measurement procedure.
#[derive(Debug, Clone, Default)]
pub struct AdaptiveMeasurement {
    config: SpectrometerConfig,
}

impl AdaptiveMeasurement {
    pub fn new(config: SpectrometerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SpectrometerConfig {
        &self.config
    }

    /// Set `micros`, settle, read temperatures, settle, read intensities.
    fn sample<D: Spectrometer + ?Sized>(&self, device: &mut D, micros: f64) -> PlrResult<Sample> {
        device.set_integration_time_micros(micros)?;
        sleep(self.config.settle_delay());
        let temperatures = device.temperatures()?;
        sleep(self.config.settle_delay());
        let counts = device.intensities()?;
        let peak = peak(&counts)?;
        if !peak.is_finite() {
            return Err(PlrError::Instrument(format!(
                "spectrometer reported a non-finite peak ({peak})"
            )));
        }
        info!(
            integration_time_ms = micros / 1000.0,
            max_reported = peak,
            "Integration time: {} ms --> maximum value: {}",
            micros / 1000.0,
            peak
        );
        Ok(Sample {
            counts,
            temperatures,
            peak,
        })
    }

    fn finish<D: Spectrometer + ?Sized>(
        device: &D,
        sample: Sample,
        integration_time: f64,
        setting: Setting,
    ) -> PlrResult<Measurement> {
        let (board_temp, micro_temp) = board_and_micro(&sample.temperatures)?;
        Ok(Measurement {
            counts: sample.counts,
            info: MeasurementInfo {
                board_temp,
                micro_temp,
                integration_time,
                model: device.model(),
                setting,
            },
        })
    }

    /// Measure with an adaptively chosen integration time, or with
    /// `integration_time` (us) when given.
    pub fn measure<D: Spectrometer + ?Sized>(
        &self,
        device: &mut D,
        integration_time: Option<f64>,
        setting: Setting,
    ) -> PlrResult<Measurement> {
        self.measure_with_termination(device, integration_time, setting)
            .map(|(measurement, _)| measurement)
    }

    /// Like [`AdaptiveMeasurement::measure`], also reporting why the search stopped.
    pub fn measure_with_termination<D: Spectrometer + ?Sized>(
        &self,
        device: &mut D,
        integration_time: Option<f64>,
        setting: Setting,
    ) -> PlrResult<(Measurement, Termination)> {
        if let Some(micros) = integration_time {
            let sample = self.sample(device, micros)?;
            return Ok((
                Self::finish(device, sample, micros, setting)?,
                Termination::Fixed,
            ));
        }

        let (floor, ceiling) = device.integration_time_limits();
        if !(floor > 0.0 && floor <= ceiling) {
            return Err(PlrError::Instrument(format!(
                "invalid integration time limits [{floor}, {ceiling}] us"
            )));
        }
        let maximum = device.max_intensity();
        let lower_bound = maximum * self.config.lower_fraction;
        let upper_bound = maximum * self.config.upper_fraction;
        debug!(floor, ceiling, lower_bound, upper_bound, "Starting adaptive search");

        let mut micros = self.config.initial_integration_time_us;
        let mut lower: Option<f64> = None;
        let mut upper: Option<f64> = None;

        for _ in 0..self.config.max_iterations {
            micros = micros.clamp(floor, ceiling);
            let sample = self.sample(device, micros)?;
            let reading = sample.peak;

            if (lower_bound..=upper_bound).contains(&reading) {
                return Ok((
                    Self::finish(device, sample, micros, setting)?,
                    Termination::InBand,
                ));
            }
            if micros >= ceiling {
                info!(ceiling, "Reached the integration time ceiling");
                return Ok((
                    Self::finish(device, sample, micros, setting)?,
                    Termination::Ceiling,
                ));
            }
            if reading > upper_bound && micros <= floor {
                warn!(floor, "Saturated at the shortest integration time");
                return Ok((
                    Self::finish(device, sample, micros, setting)?,
                    Termination::Floor,
                ));
            }

            if reading > upper_bound {
                upper = Some(micros);
                micros = match lower {
                    Some(below) => micros - (micros - below) / 2.0,
                    None => micros / 2.0,
                };
            } else if let Some(above) = upper {
                lower = Some(micros);
                micros += (above - micros) / 2.0;
            } else {
                lower = Some(micros);
                micros *= 2.0;
            }
        }

        Err(PlrError::Measurement(format!(
            "integration time search did not converge in {} iterations",
            self.config.max_iterations
        )))
    }
}

/// One dark-spectrum pixel reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DarkSample {
    pub board_temp: f64,
    pub micro_temp: f64,
    pub integration_time: f64,
    pub wavelengths: f64,
    pub dark_counts: f64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Sample the dark spectrum at each integration time.
///
/// Repeat at different device temperatures to characterise how dark counts depend on
/// temperature and integration time; the fitted surface feeds
/// [`crate::spectro::dark::DarkCalibration`]. Temperatures are rounded to 0.01 C.
pub fn dark_measurement<D: Spectrometer + ?Sized>(
    device: &mut D,
    integration_times: &[f64],
    config: &SpectrometerConfig,
) -> PlrResult<Vec<DarkSample>> {
    let wavelengths = device.wavelengths()?;
    let mut samples = Vec::with_capacity(integration_times.len() * wavelengths.len());

    for &micros in integration_times {
        device.set_integration_time_micros(micros)?;
        sleep(config.settle_delay());
        let (board, micro) = board_and_micro(&device.temperatures()?)?;
        sleep(config.settle_delay());
        let (board_temp, micro_temp) = (round2(board), round2(micro));
        info!(board_temp, integration_time = micros, "Board temp: {}, integration time: {}", board_temp, micros);

        let counts = device.intensities()?;
        if counts.len() != wavelengths.len() {
            return Err(PlrError::Instrument(format!(
                "{} counts for {} wavelengths",
                counts.len(),
                wavelengths.len()
            )));
        }
        samples.extend(wavelengths.iter().zip(counts).map(|(&wl, dark_counts)| DarkSample {
            board_temp,
            micro_temp,
            integration_time: micros,
            wavelengths: wl,
            dark_counts,
        }));
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectro::mock::MockSpectrometer;

    fn procedure() -> AdaptiveMeasurement {
        AdaptiveMeasurement::new(SpectrometerConfig {
            settle_delay_ms: 0,
            ..Default::default()
        })
    }

    fn assert_band_or_ceiling(device: &MockSpectrometer, m: &Measurement, t: Termination) {
        let peak = peak(&m.counts).unwrap();
        let max = device.max_intensity();
        let (floor, ceiling) = device.integration_time_limits();
        match t {
            Termination::InBand => assert!(peak >= 0.8 * max && peak <= 0.9 * max, "{peak}"),
            Termination::Ceiling => assert_eq!(m.info.integration_time, ceiling),
            Termination::Floor => assert_eq!(m.info.integration_time, floor),
            Termination::Fixed => panic!("search was not adaptive"),
        }
    }

    #[test]
    fn converges_into_band_for_moderate_source() {
        let mut device = MockSpectrometer::new(2.0);
        let (m, t) = procedure()
            .measure_with_termination(&mut device, None, Setting::new())
            .unwrap();
        assert_eq!(t, Termination::InBand);
        assert_band_or_ceiling(&device, &m, t);
        assert_eq!(m.info.integration_time, device.integration_time());
    }

    #[test]
    fn bisects_after_overshoot() {
        // 1000 us is already saturated, so the first step must go down.
        let mut device = MockSpectrometer::new(40.0);
        let (m, t) = procedure()
            .measure_with_termination(&mut device, None, Setting::new())
            .unwrap();
        assert_band_or_ceiling(&device, &m, t);
        assert_eq!(device.history()[0], 1000.0);
        assert!(device.history()[1] < 1000.0);
    }

    #[test]
    fn dark_source_stops_at_ceiling() {
        let mut device = MockSpectrometer::dark();
        let (m, t) = procedure()
            .measure_with_termination(&mut device, None, Setting::new())
            .unwrap();
        assert_eq!(t, Termination::Ceiling);
        assert_eq!(m.info.integration_time, 10_000_000.0);
        // Doubling from 1 ms is the only way to get there.
        assert!(device.history().windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn blinding_source_stops_at_floor() {
        let mut device = MockSpectrometer::new(1e6);
        let (m, t) = procedure()
            .measure_with_termination(&mut device, None, Setting::new())
            .unwrap();
        assert_eq!(t, Termination::Floor);
        assert_eq!(m.info.integration_time, 10.0);
    }

    #[test]
    fn search_terminates_across_source_levels() {
        for rate in [0.0, 0.001, 0.05, 0.5, 3.0, 17.0, 250.0, 5000.0, 1e7] {
            let mut device = MockSpectrometer::new(rate);
            let (m, t) = procedure()
                .measure_with_termination(&mut device, None, Setting::new())
                .unwrap_or_else(|e| panic!("rate {rate}: {e}"));
            assert_band_or_ceiling(&device, &m, t);
            assert!(device.history().len() <= 64);
        }
    }

    #[test]
    fn fixed_integration_time_samples_once() {
        let mut device = MockSpectrometer::new(2.0);
        let (m, t) = procedure()
            .measure_with_termination(&mut device, Some(5000.0), Setting::new())
            .unwrap();
        assert_eq!(t, Termination::Fixed);
        assert_eq!(device.history(), &[5000.0]);
        assert_eq!(m.info.integration_time, 5000.0);
    }

    #[test]
    fn info_carries_temperatures_model_and_setting() {
        let mut device = MockSpectrometer::new(2.0).with_temperatures(vec![30.0, 1.0, 41.0]);
        let mut setting = Setting::new();
        setting.insert("led".into(), serde_json::json!(5));
        setting.insert("intensity".into(), serde_json::json!(3000));

        let m = procedure()
            .measure(&mut device, None, setting.clone())
            .unwrap();
        assert_eq!(m.info.board_temp, 30.0);
        assert_eq!(m.info.micro_temp, 41.0);
        assert_eq!(m.info.model, "MockSTS");
        assert_eq!(m.info.setting, setting);
        assert_eq!(m.counts.len(), 1024);
    }

    #[test]
    fn iteration_cap_is_an_error() {
        let mut device = MockSpectrometer::dark();
        let result = AdaptiveMeasurement::new(SpectrometerConfig {
            settle_delay_ms: 0,
            max_iterations: 3,
            ..Default::default()
        })
        .measure(&mut device, None, Setting::new());
        assert!(matches!(result, Err(PlrError::Measurement(_))));
    }

    #[test]
    fn dark_measurement_rows_per_time_and_pixel() {
        let mut device = MockSpectrometer::dark().with_temperatures(vec![30.456, 0.0, 40.123]);
        let config = SpectrometerConfig {
            settle_delay_ms: 0,
            ..Default::default()
        };
        let samples = dark_measurement(&mut device, &[1000.0, 2000.0], &config).unwrap();
        assert_eq!(samples.len(), 2 * 1024);
        assert_eq!(samples[0].board_temp, 30.46);
        assert_eq!(samples[0].micro_temp, 40.12);
        assert_eq!(samples[0].integration_time, 1000.0);
        assert_eq!(samples[1024].integration_time, 2000.0);
        assert!(samples.iter().all(|s| s.dark_counts == 1500.0));
    }
}
