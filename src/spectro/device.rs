//! Spectrometer capability trait
//!
//! The measurement procedures only need a handful of operations from the vendor
//! driver (Ocean Optics SeaBreeze in the lab). This trait is that seam; a driver
//! binding implements it and everything in [`crate::spectro`] works on top.
//!
//! # Contract
//! - Integration times are in microseconds.
//! - `set_integration_time_micros` applies to the next `intensities` call.
//! - `temperatures` returns every sensor the device reports, in device order;
//!   index 0 is the detector board and index 2 the microcontroller.
//! - `intensities` and `wavelengths` have one entry per pixel.

use crate::error::{PlrError, PlrResult};

/// Index of the detector board sensor in [`Spectrometer::temperatures`].
pub const BOARD_TEMP_INDEX: usize = 0;

/// Index of the microcontroller sensor in [`Spectrometer::temperatures`].
pub const MICRO_TEMP_INDEX: usize = 2;

/// Operations the measurement procedures need from a spectrometer.
pub trait Spectrometer {
    /// Device model string (e.g. `STS-VIS`).
    fn model(&self) -> String;

    /// Smallest and largest supported integration time in microseconds.
    fn integration_time_limits(&self) -> (f64, f64);

    /// Largest value a pixel can report (saturation level).
    fn max_intensity(&self) -> f64;

    /// Set the integration time for subsequent acquisitions.
    fn set_integration_time_micros(&mut self, micros: f64) -> PlrResult<()>;

    /// Read all temperature sensors (degrees Celsius).
    fn temperatures(&mut self) -> PlrResult<Vec<f64>>;

    /// Acquire one spectrum in raw counts.
    fn intensities(&mut self) -> PlrResult<Vec<f64>>;

    /// Wavelength of each pixel in nm.
    fn wavelengths(&self) -> PlrResult<Vec<f64>>;
}

/// Board and microcontroller temperatures from a full sensor readout.
pub fn board_and_micro(temperatures: &[f64]) -> PlrResult<(f64, f64)> {
    match (
        temperatures.get(BOARD_TEMP_INDEX),
        temperatures.get(MICRO_TEMP_INDEX),
    ) {
        (Some(&board), Some(&micro)) => Ok((board, micro)),
        _ => Err(PlrError::Instrument(format!(
            "expected at least {} temperature sensors, got {}",
            MICRO_TEMP_INDEX + 1,
            temperatures.len()
        ))),
    }
}

/// Largest value in a spectrum.
pub fn peak(counts: &[f64]) -> PlrResult<f64> {
    counts
        .iter()
        .copied()
        .reduce(f64::max)
        .ok_or_else(|| PlrError::Instrument("spectrometer returned an empty spectrum".to_string()))
}
