//! Mock Spectrometer
//!
//! Provides a simulated spectrometer for testing without physical hardware.
//!
//! # Response model
//!
//! Each pixel reports `dark_level + rate[pixel] * integration_time_us`, clipped to
//! `max_intensity`. The default source is a Gaussian line at 550 nm; set the peak
//! rate to zero to simulate a dark measurement.
//!
//! Defaults mimic an Ocean Optics STS-VIS: 1024 pixels over 337-823 nm, 14-bit
//! counts, integration times 10 us to 10 s.

use crate::error::{PlrError, PlrResult};
use crate::spectro::device::Spectrometer;

/// Simulated spectrometer with a linear, saturating response.
#[derive(Debug, Clone)]
pub struct MockSpectrometer {
    wavelengths: Vec<f64>,
    rate: Vec<f64>,
    dark_level: f64,
    max_intensity: f64,
    limits: (f64, f64),
    temperatures: Vec<f64>,
    integration_time: f64,
    history: Vec<f64>,
}

impl MockSpectrometer {
    /// STS-VIS-like device with a Gaussian source whose peak produces
    /// `peak_rate` counts per microsecond.
    pub fn new(peak_rate: f64) -> Self {
        let n = 1024;
        let (start, end) = (337.0, 823.0);
        let wavelengths: Vec<f64> = (0..n)
            .map(|i| start + (end - start) * i as f64 / (n - 1) as f64)
            .collect();
        let rate = wavelengths
            .iter()
            .map(|wl| peak_rate * (-((wl - 550.0) / 40.0).powi(2) / 2.0).exp())
            .collect();
        Self {
            wavelengths,
            rate,
            dark_level: 1500.0,
            max_intensity: 16383.0,
            limits: (10.0, 10_000_000.0),
            temperatures: vec![32.5, 0.0, 38.1],
            integration_time: 1000.0,
            history: Vec::new(),
        }
    }

    /// Device that sees no light at all.
    pub fn dark() -> Self {
        Self::new(0.0)
    }

    /// Replace wavelengths and per-pixel count rates (counts per microsecond).
    pub fn with_source(mut self, wavelengths: Vec<f64>, rate: Vec<f64>) -> Self {
        self.wavelengths = wavelengths;
        self.rate = rate;
        self
    }

    pub fn with_dark_level(mut self, dark_level: f64) -> Self {
        self.dark_level = dark_level;
        self
    }

    pub fn with_limits(mut self, min_us: f64, max_us: f64) -> Self {
        self.limits = (min_us, max_us);
        self
    }

    pub fn with_temperatures(mut self, temperatures: Vec<f64>) -> Self {
        self.temperatures = temperatures;
        self
    }

    /// Every integration time that was set, in order.
    pub fn history(&self) -> &[f64] {
        &self.history
    }

    pub fn integration_time(&self) -> f64 {
        self.integration_time
    }
}

impl Default for MockSpectrometer {
    fn default() -> Self {
        Self::new(10.0)
    }
}

impl Spectrometer for MockSpectrometer {
    fn model(&self) -> String {
        "MockSTS".to_string()
    }

    fn integration_time_limits(&self) -> (f64, f64) {
        self.limits
    }

    fn max_intensity(&self) -> f64 {
        self.max_intensity
    }

    fn set_integration_time_micros(&mut self, micros: f64) -> PlrResult<()> {
        let (min, max) = self.limits;
        if !(min..=max).contains(&micros) {
            return Err(PlrError::Instrument(format!(
                "integration time {micros} us outside [{min}, {max}]"
            )));
        }
        self.integration_time = micros;
        self.history.push(micros);
        Ok(())
    }

    fn temperatures(&mut self) -> PlrResult<Vec<f64>> {
        Ok(self.temperatures.clone())
    }

    fn intensities(&mut self) -> PlrResult<Vec<f64>> {
        Ok(self
            .rate
            .iter()
            .map(|r| (self.dark_level + r * self.integration_time).min(self.max_intensity))
            .collect())
    }

    fn wavelengths(&self) -> PlrResult<Vec<f64>> {
        Ok(self.wavelengths.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_is_linear_until_saturation() {
        let mut device = MockSpectrometer::new(1.0).with_dark_level(100.0);
        device.set_integration_time_micros(1000.0).unwrap();
        let peak_1ms = crate::spectro::device::peak(&device.intensities().unwrap()).unwrap();
        device.set_integration_time_micros(2000.0).unwrap();
        let peak_2ms = crate::spectro::device::peak(&device.intensities().unwrap()).unwrap();
        assert!((peak_2ms - 100.0 - 2.0 * (peak_1ms - 100.0)).abs() < 1e-6);

        device.set_integration_time_micros(1_000_000.0).unwrap();
        let saturated = crate::spectro::device::peak(&device.intensities().unwrap()).unwrap();
        assert_eq!(saturated, device.max_intensity());
    }

    #[test]
    fn rejects_out_of_range_integration_time() {
        let mut device = MockSpectrometer::default();
        assert!(device.set_integration_time_micros(1.0).is_err());
        assert!(device.set_integration_time_micros(2e7).is_err());
        assert!(device.history().is_empty());
    }

    #[test]
    fn wavelengths_match_pixels() {
        let mut device = MockSpectrometer::default();
        assert_eq!(
            device.wavelengths().unwrap().len(),
            device.intensities().unwrap().len()
        );
    }
}
