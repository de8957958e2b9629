//! Dark-count prediction
//!
//! Dark counts depend on detector temperature and integration time. For each pixel
//! a cubic surface in board temperature `x` and integration time `y` (us) was fitted
//! offline:
//!
//! ```text
//! p00 + p10*x + p01*y + p20*x^2 + p11*x*y + p30*x^3 + p21*x^2*y
//! ```
//!
//! Pixels whose fit RMSE exceeds a threshold are masked with NaN.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PlrError, PlrResult};
use crate::spectro::measurement::MeasurementInfo;

/// Fits worse than this RMSE (counts) are not trusted. Determined by inspection.
pub const FIT_RMSE_THRESHOLD: f64 = 110.0;

/// Surface coefficients for one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DarkCoefficients {
    pub p00: f64,
    pub p10: f64,
    pub p01: f64,
    pub p20: f64,
    pub p11: f64,
    pub p30: f64,
    pub p21: f64,
    /// Root-mean-square error of the fit
    pub rmse: f64,
}

impl DarkCoefficients {
    /// Predicted dark counts at board temperature `x` and integration time `y`.
    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        self.p00
            + self.p10 * x
            + self.p01 * y
            + self.p20 * x * x
            + self.p11 * x * y
            + self.p30 * x * x * x
            + self.p21 * x * x * y
    }
}

/// Per-pixel dark-count model, one row per spectrometer pixel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DarkCalibration {
    pixels: Vec<DarkCoefficients>,
}

impl DarkCalibration {
    pub fn new(pixels: Vec<DarkCoefficients>) -> Self {
        Self { pixels }
    }

    /// Read a CSV with `p00,p10,p01,p20,p11,p30,p21,rmse` columns. Extra columns
    /// are ignored.
    pub fn from_reader<R: Read>(reader: R) -> PlrResult<Self> {
        let mut csv = csv::Reader::from_reader(reader);
        let pixels = csv
            .deserialize::<DarkCoefficients>()
            .collect::<Result<Vec<_>, _>>()?;
        if pixels.is_empty() {
            return Err(PlrError::Calibration(
                "dark calibration file has no rows".to_string(),
            ));
        }
        Ok(Self { pixels })
    }

    pub fn from_csv<P: AsRef<Path>>(path: P) -> PlrResult<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let calibration = Self::from_reader(file)?;
        debug!(path = %path.as_ref().display(), pixels = calibration.len(), "Loaded dark calibration");
        Ok(calibration)
    }

    pub fn pixels(&self) -> &[DarkCoefficients] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Predicted dark spectrum for one temperature and integration time, NaN where the
    /// fit RMSE exceeds `rmse_threshold`.
    pub fn predict(&self, board_temp: f64, integration_time: f64, rmse_threshold: f64) -> Vec<f64> {
        self.pixels
            .iter()
            .map(|c| {
                if c.rmse > rmse_threshold {
                    f64::NAN
                } else {
                    c.evaluate(board_temp, integration_time)
                }
            })
            .collect()
    }
}

/// Predict the dark spectrum of each measurement from its board temperature and
/// integration time. These must be subtracted from the measured counts during
/// radiance calibration.
///
/// Returns one spectrum per measurement with one value per calibration row.
pub fn predict_dark_counts(
    info: &[MeasurementInfo],
    calibration: &DarkCalibration,
    rmse_threshold: f64,
) -> Vec<Vec<f64>> {
    info.iter()
        .map(|m| calibration.predict(m.board_temp, m.integration_time, rmse_threshold))
        .collect()
}
