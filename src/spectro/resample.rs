//! Flux-conserving spectral resampling.
//!
//! Each sample is treated as the mean flux density over a bin centred on its
//! wavelength, with bin edges halfway between neighbouring samples. A new bin's
//! value is the width-weighted mean of the old bins it overlaps, so the integral of
//! the spectrum is preserved. New bins that extend past the old grid get `fill`.

use crate::error::{PlrError, PlrResult};

/// Bin edges (`n + 1`) and widths (`n`) for sample wavelengths.
///
/// The outer edges sit half a spacing beyond the first and last samples; the last
/// width repeats the final spacing.
pub fn make_bins(wavelengths: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = wavelengths.len();
    let mut edges = vec![0.0; n + 1];
    let mut widths = vec![0.0; n];

    edges[0] = wavelengths[0] - (wavelengths[1] - wavelengths[0]) / 2.0;
    edges[n] = wavelengths[n - 1] + (wavelengths[n - 1] - wavelengths[n - 2]) / 2.0;
    for i in 1..n {
        edges[i] = (wavelengths[i] + wavelengths[i - 1]) / 2.0;
    }
    for i in 0..n - 1 {
        widths[i] = edges[i + 1] - edges[i];
    }
    widths[n - 1] = wavelengths[n - 1] - wavelengths[n - 2];

    (edges, widths)
}

fn check_grid(name: &str, wavelengths: &[f64]) -> PlrResult<()> {
    if wavelengths.len() < 2 {
        return Err(PlrError::Calibration(format!(
            "{name} grid needs at least two wavelengths"
        )));
    }
    if !wavelengths.windows(2).all(|w| w[1] > w[0]) {
        return Err(PlrError::Calibration(format!(
            "{name} grid must be strictly increasing"
        )));
    }
    Ok(())
}

/// Resample `fluxes` sampled at `old_wavelengths` onto `new_wavelengths`.
pub fn resample(
    new_wavelengths: &[f64],
    old_wavelengths: &[f64],
    fluxes: &[f64],
    fill: f64,
) -> PlrResult<Vec<f64>> {
    check_grid("source", old_wavelengths)?;
    check_grid("target", new_wavelengths)?;
    if fluxes.len() != old_wavelengths.len() {
        return Err(PlrError::Calibration(format!(
            "{} flux values for {} wavelengths",
            fluxes.len(),
            old_wavelengths.len()
        )));
    }

    let (old_edges, old_widths) = make_bins(old_wavelengths);
    let (new_edges, _) = make_bins(new_wavelengths);
    let last_edge = old_edges[old_edges.len() - 1];

    let mut out = Vec::with_capacity(new_wavelengths.len());
    let mut start = 0;
    let mut stop = 0;

    for j in 0..new_wavelengths.len() {
        let (lo, hi) = (new_edges[j], new_edges[j + 1]);
        if lo < old_edges[0] || hi > last_edge {
            out.push(fill);
            continue;
        }

        while old_edges[start + 1] <= lo {
            start += 1;
        }
        while old_edges[stop + 1] < hi {
            stop += 1;
        }

        if start == stop {
            out.push(fluxes[start]);
            continue;
        }

        let start_factor = (old_edges[start + 1] - lo) / (old_edges[start + 1] - old_edges[start]);
        let end_factor = (hi - old_edges[stop]) / (old_edges[stop + 1] - old_edges[stop]);

        let mut weighted = 0.0;
        let mut total_width = 0.0;
        for k in start..=stop {
            let scale = if k == start {
                start_factor
            } else if k == stop {
                end_factor
            } else {
                1.0
            };
            let width = old_widths[k] * scale;
            weighted += width * fluxes[k];
            total_width += width;
        }
        out.push(weighted / total_width);
    }

    Ok(out)
}
