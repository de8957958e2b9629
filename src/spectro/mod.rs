//! Ocean Optics spectrometer measurement and calibration
//!
//! The calibration workflow, in order:
//!
//! 1. [`measurement::AdaptiveMeasurement`] picks an integration time that puts the
//!    brightest pixel at 80-90 % of full scale and records the spectrum with its
//!    board temperature and integration time.
//! 2. [`dark::predict_dark_counts`] evaluates the per-pixel dark-count surface at
//!    those conditions.
//! 3. [`radiance::RadianceCalibrator`] subtracts the dark counts, applies the
//!    absolute calibration and resamples onto 380..=780 nm.
//!
//! [`measurement::dark_measurement`] collects the raw data the dark-count surface
//! is fitted from. [`table`] reads and writes the CSV files passed between steps.

pub mod dark;
pub mod device;
pub mod measurement;
pub mod mock;
pub mod radiance;
pub mod resample;
pub mod table;

pub use dark::{predict_dark_counts, DarkCalibration, DarkCoefficients, FIT_RMSE_THRESHOLD};
pub use device::Spectrometer;
pub use measurement::{
    dark_measurement, AdaptiveMeasurement, DarkSample, Measurement, MeasurementInfo, Setting, Termination,
};
pub use mock::MockSpectrometer;
pub use radiance::{nm_per_pixel, wavelength_grid, RadianceCalibrator};
pub use resample::resample;
pub use table::SpectralTable;
