//! Radiance calibration
//!
//! Converts raw spectrometer counts into spectral irradiance on an integer
//! wavelength grid:
//!
//! 1. subtract the predicted dark counts
//! 2. multiply by the per-pixel calibration factor (uJ per count)
//! 3. divide by the per-pixel wavelength spacing (uJ/nm)
//! 4. divide by the sensor area (uJ/cm^2/nm)
//! 5. divide by the integration time in seconds (uW/cm^2/nm)
//! 6. resample onto 380..=780 nm, clamp negatives (and masked pixels) to zero
//! 7. scale by 0.01 to W/m^2/nm
//!
//! Spectra from the adaptive measurement are never saturated, so no saturation
//! handling happens here.

use tracing::debug;

use crate::config::CalibrationConfig;
use crate::error::{PlrError, PlrResult};
use crate::spectro::measurement::MeasurementInfo;
use crate::spectro::resample::resample;
use crate::spectro::table::SpectralTable;

/// Microseconds per second.
const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Wavelength spacing of each pixel: one-sided differences at the ends, centred
/// half-differences inside.
pub fn nm_per_pixel(wavelengths: &[f64]) -> Vec<f64> {
    let n = wavelengths.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let mut spacing = Vec::with_capacity(n);
    spacing.push(wavelengths[1] - wavelengths[0]);
    spacing.extend(wavelengths.windows(3).map(|w| (w[2] - w[0]) / 2.0));
    spacing.push(wavelengths[n - 1] - wavelengths[n - 2]);
    spacing
}

/// Integer wavelength grid `start..=end` nm.
pub fn wavelength_grid(start_nm: u32, end_nm: u32) -> Vec<f64> {
    (start_nm..=end_nm).map(f64::from).collect()
}

/// Calibrates spectra from one spectrometer.
#[derive(Debug, Clone)]
pub struct RadianceCalibrator {
    wavelengths: Vec<f64>,
    nm_per_pixel: Vec<f64>,
    cal_per_wl: Vec<f64>,
    sensor_area_cm2: f64,
    grid: Vec<f64>,
    output_scale: f64,
}

impl RadianceCalibrator {
    /// `wavelengths` and `cal_per_wl` have one entry per pixel; `sensor_area_cm2`
    /// is the light-collecting area of the input optic.
    pub fn new(wavelengths: Vec<f64>, cal_per_wl: Vec<f64>, sensor_area_cm2: f64) -> PlrResult<Self> {
        if wavelengths.len() < 2 {
            return Err(PlrError::Calibration(
                "need at least two pixel wavelengths".to_string(),
            ));
        }
        if cal_per_wl.len() != wavelengths.len() {
            return Err(PlrError::Calibration(format!(
                "{} calibration factors for {} pixels",
                cal_per_wl.len(),
                wavelengths.len()
            )));
        }
        if !(sensor_area_cm2.is_finite() && sensor_area_cm2 > 0.0) {
            return Err(PlrError::Calibration(format!(
                "sensor area must be positive, got {sensor_area_cm2}"
            )));
        }

        let defaults = CalibrationConfig::default();
        Ok(Self {
            nm_per_pixel: nm_per_pixel(&wavelengths),
            wavelengths,
            cal_per_wl,
            sensor_area_cm2,
            grid: wavelength_grid(defaults.wavelength_start_nm, defaults.wavelength_end_nm),
            output_scale: defaults.output_scale,
        })
    }

    /// Take the output grid and unit scale from configuration.
    pub fn with_config(mut self, config: &CalibrationConfig) -> Self {
        self.grid = wavelength_grid(config.wavelength_start_nm, config.wavelength_end_nm);
        self.output_scale = config.output_scale;
        self
    }

    /// Output wavelengths.
    pub fn grid(&self) -> &[f64] {
        &self.grid
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    /// Calibrate one spectrum measured with `integration_time_us`.
    pub fn calibrate(&self, counts: &[f64], dark: &[f64], integration_time_us: f64) -> PlrResult<Vec<f64>> {
        let n = self.wavelengths.len();
        if counts.len() != n || dark.len() != n {
            return Err(PlrError::Calibration(format!(
                "spectrum has {} counts and {} dark values for {n} pixels",
                counts.len(),
                dark.len()
            )));
        }
        if !(integration_time_us.is_finite() && integration_time_us > 0.0) {
            return Err(PlrError::Calibration(format!(
                "integration time must be positive, got {integration_time_us} us"
            )));
        }

        let seconds = integration_time_us / MICROS_PER_SECOND;
        let uw_per_cm2_per_nm: Vec<f64> = counts
            .iter()
            .zip(dark)
            .zip(&self.cal_per_wl)
            .zip(&self.nm_per_pixel)
            .map(|(((&c, &d), &cal), &nm)| (c - d) * cal / nm / self.sensor_area_cm2 / seconds)
            .collect();

        let resampled = resample(&self.grid, &self.wavelengths, &uw_per_cm2_per_nm, 0.0)?;
        Ok(resampled
            .into_iter()
            .map(|v| if v > 0.0 { v * self.output_scale } else { 0.0 })
            .collect())
    }

    /// Calibrate a batch; `spectra`, `info` and `dark` are matched row by row.
    pub fn calibrate_all(
        &self,
        spectra: &[Vec<f64>],
        info: &[MeasurementInfo],
        dark: &[Vec<f64>],
    ) -> PlrResult<SpectralTable> {
        if spectra.len() != info.len() || spectra.len() != dark.len() {
            return Err(PlrError::Calibration(format!(
                "{} spectra, {} info rows and {} dark spectra",
                spectra.len(),
                info.len(),
                dark.len()
            )));
        }

        let rows = spectra
            .iter()
            .zip(info)
            .zip(dark)
            .map(|((counts, info), dark)| self.calibrate(counts, dark, info.integration_time))
            .collect::<PlrResult<Vec<_>>>()?;
        debug!(spectra = rows.len(), "Calibrated spectra");

        Ok(SpectralTable::new(self.grid.clone(), rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectro::measurement::Setting;

    fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| start + (end - start) * i as f64 / (n - 1) as f64)
            .collect()
    }

    fn info(integration_time: f64) -> MeasurementInfo {
        MeasurementInfo {
            board_temp: 30.0,
            micro_temp: 40.0,
            integration_time,
            model: "STS-VIS".into(),
            setting: Setting::new(),
        }
    }

    #[test]
    fn spacing_uses_one_sided_ends() {
        assert_eq!(nm_per_pixel(&[1.0, 2.0, 4.0, 7.0]), vec![1.0, 1.5, 2.5, 3.0]);
    }

    #[test]
    fn grid_is_inclusive() {
        let grid = wavelength_grid(380, 780);
        assert_eq!(grid.len(), 401);
        assert_eq!(grid[0], 380.0);
        assert_eq!(grid[400], 780.0);
    }

    #[test]
    fn units_follow_the_pipeline() {
        // 1 nm pixels, 1 uJ/count, 1 cm^2, 1 s: counts above dark become uW/cm^2/nm.
        let wl = linspace(300.0, 900.0, 601);
        let cal = RadianceCalibrator::new(wl.clone(), vec![1.0; wl.len()], 1.0).unwrap();
        let counts = vec![1100.0; wl.len()];
        let dark = vec![1000.0; wl.len()];
        let out = cal.calibrate(&counts, &dark, 1_000_000.0).unwrap();
        assert_eq!(out.len(), 401);
        assert!(out.iter().all(|v| (v - 1.0).abs() < 1e-9), "{:?}", &out[..3]);

        // Halving integration time doubles irradiance; doubling area halves it.
        let cal = RadianceCalibrator::new(wl.clone(), vec![1.0; wl.len()], 2.0).unwrap();
        let out = cal.calibrate(&counts, &dark, 500_000.0).unwrap();
        assert!(out.iter().all(|v| (v - 1.0).abs() < 1e-9));
    }

    #[test]
    fn negatives_and_masked_pixels_clamp_to_zero() {
        let wl = linspace(337.0, 823.0, 1024);
        let cal = RadianceCalibrator::new(wl.clone(), vec![0.5; wl.len()], 0.1).unwrap();
        let counts = vec![1000.0; wl.len()];
        let mut dark = vec![1200.0; wl.len()];
        dark[500] = f64::NAN;
        let out = cal.calibrate(&counts, &dark, 1000.0).unwrap();
        assert_eq!(out.len(), 401);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn batch_output_spans_grid_and_is_non_negative() {
        let wl = linspace(337.0, 823.0, 1024);
        let cal = RadianceCalibrator::new(wl.clone(), vec![1e-3; wl.len()], 0.25).unwrap();
        let spectra: Vec<Vec<f64>> = (0..3)
            .map(|k| wl.iter().map(|w| 1400.0 + (k as f64 + 1.0) * (w - 337.0)).collect())
            .collect();
        let dark = vec![vec![1500.0; wl.len()]; 3];
        let info = vec![info(1000.0), info(2000.0), info(4000.0)];

        let table = cal.calibrate_all(&spectra, &info, &dark).unwrap();
        assert_eq!(table.wavelengths().len(), 401);
        assert_eq!(table.wavelengths()[0], 380.0);
        assert_eq!(table.wavelengths()[400], 780.0);
        assert_eq!(table.rows().len(), 3);
        assert!(table.rows().iter().flatten().all(|&v| v >= 0.0 && v.is_finite()));
    }

    #[test]
    fn rejects_mismatched_inputs() {
        let wl = linspace(337.0, 823.0, 10);
        assert!(RadianceCalibrator::new(wl.clone(), vec![1.0; 9], 1.0).is_err());
        assert!(RadianceCalibrator::new(wl.clone(), vec![1.0; 10], 0.0).is_err());
        let cal = RadianceCalibrator::new(wl, vec![1.0; 10], 1.0).unwrap();
        assert!(cal.calibrate(&[1.0; 10], &[0.0; 9], 1000.0).is_err());
        assert!(cal.calibrate(&[1.0; 10], &[0.0; 10], 0.0).is_err());
        assert!(cal.calibrate_all(&[vec![1.0; 10]], &[], &[vec![0.0; 10]]).is_err());
    }
}
