//! CSV files exchanged with the calibration pipeline.
//!
//! - Spectra and radiance tables: header row of wavelengths, one row per spectrum.
//! - Measurement info: `board_temp,micro_temp,integration_time,model,setting`, with the
//!   light source setting stored as a JSON object.
//! - Dark measurements: one row per integration time and pixel.
//! - Single columns (calibration factors, sensor area): the last field of each row, with
//!   an optional header.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::error::{PlrError, PlrResult};
use crate::spectro::measurement::{DarkSample, MeasurementInfo, Setting};

const INFO_HEADER: [&str; 5] = ["board_temp", "micro_temp", "integration_time", "model", "setting"];

fn parse_f64(field: &str, line: u64) -> PlrResult<f64> {
    field
        .trim()
        .parse::<f64>()
        .map_err(|e| PlrError::Calibration(format!("line {line}: '{field}' is not a number ({e})")))
}

/// Spectra sharing one wavelength axis.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpectralTable {
    wavelengths: Vec<f64>,
    rows: Vec<Vec<f64>>,
}

impl SpectralTable {
    pub fn new(wavelengths: Vec<f64>, rows: Vec<Vec<f64>>) -> Self {
        Self { wavelengths, rows }
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<f64>> {
        self.rows
    }

    pub fn push(&mut self, row: Vec<f64>) -> PlrResult<()> {
        if row.len() != self.wavelengths.len() {
            return Err(PlrError::Calibration(format!(
                "row has {} values for {} wavelengths",
                row.len(),
                self.wavelengths.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> PlrResult<()> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(self.wavelengths.iter().map(f64::to_string))?;
        for row in &self.rows {
            csv.write_record(row.iter().map(f64::to_string))?;
        }
        csv.flush()?;
        Ok(())
    }

    pub fn from_reader<R: Read>(reader: R) -> PlrResult<Self> {
        let mut csv = csv::Reader::from_reader(reader);
        let wavelengths = csv
            .headers()?
            .iter()
            .map(|field| parse_f64(field, 1))
            .collect::<PlrResult<Vec<_>>>()?;

        let mut table = Self::new(wavelengths, Vec::new());
        for record in csv.records() {
            let record = record?;
            let line = record.position().map_or(0, |p| p.line());
            let row = record
                .iter()
                .map(|field| parse_f64(field, line))
                .collect::<PlrResult<Vec<_>>>()?;
            table.push(row)?;
        }
        Ok(table)
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> PlrResult<()> {
        let file = File::create(path.as_ref())?;
        self.to_writer(file)?;
        info!(path = %path.as_ref().display(), spectra = self.rows.len(), "Wrote spectra");
        Ok(())
    }

    pub fn read_csv<P: AsRef<Path>>(path: P) -> PlrResult<Self> {
        let table = Self::from_reader(File::open(path.as_ref())?)?;
        debug!(path = %path.as_ref().display(), spectra = table.rows.len(), "Read spectra");
        Ok(table)
    }
}

/// Last field of every row. A first row that does not parse is taken as a header.
pub fn read_column_from<R: Read>(reader: R) -> PlrResult<Vec<f64>> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut values = Vec::new();
    for (index, record) in csv.records().enumerate() {
        let record = record?;
        let Some(field) = record.iter().last() else {
            continue;
        };
        match field.trim().parse::<f64>() {
            Ok(value) => values.push(value),
            Err(_) if index == 0 => {}
            Err(e) => {
                return Err(PlrError::Calibration(format!(
                    "row {}: '{field}' is not a number ({e})",
                    index + 1
                )))
            }
        }
    }
    Ok(values)
}

pub fn read_column<P: AsRef<Path>>(path: P) -> PlrResult<Vec<f64>> {
    read_column_from(File::open(path.as_ref())?)
}

/// Sensor area in cm^2, the first value of a single-column file.
pub fn read_sensor_area<P: AsRef<Path>>(path: P) -> PlrResult<f64> {
    read_column(path.as_ref())?
        .first()
        .copied()
        .ok_or_else(|| PlrError::Calibration(format!("{} holds no sensor area", path.as_ref().display())))
}

pub fn write_info_to<W: Write>(writer: W, info: &[MeasurementInfo]) -> PlrResult<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(INFO_HEADER)?;
    for row in info {
        csv.write_record([
            row.board_temp.to_string(),
            row.micro_temp.to_string(),
            row.integration_time.to_string(),
            row.model.clone(),
            serde_json::to_string(&row.setting)?,
        ])?;
    }
    csv.flush()?;
    Ok(())
}

pub fn read_info_from<R: Read>(reader: R) -> PlrResult<Vec<MeasurementInfo>> {
    let mut csv = csv::Reader::from_reader(reader);
    let mut info = Vec::new();
    for record in csv.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        let field = |i: usize| {
            record.get(i).ok_or_else(|| {
                PlrError::Calibration(format!("line {line}: missing column '{}'", INFO_HEADER[i]))
            })
        };
        let setting_field = record.get(4).unwrap_or("").trim();
        let setting: Setting = if setting_field.is_empty() {
            Setting::new()
        } else {
            serde_json::from_str(setting_field)?
        };
        info.push(MeasurementInfo {
            board_temp: parse_f64(field(0)?, line)?,
            micro_temp: parse_f64(field(1)?, line)?,
            integration_time: parse_f64(field(2)?, line)?,
            model: field(3)?.to_string(),
            setting,
        });
    }
    Ok(info)
}

pub fn write_info<P: AsRef<Path>>(path: P, info: &[MeasurementInfo]) -> PlrResult<()> {
    write_info_to(File::create(path.as_ref())?, info)?;
    info!(path = %path.as_ref().display(), rows = info.len(), "Wrote measurement info");
    Ok(())
}

pub fn read_info<P: AsRef<Path>>(path: P) -> PlrResult<Vec<MeasurementInfo>> {
    read_info_from(File::open(path.as_ref())?)
}

pub fn write_dark_samples<P: AsRef<Path>>(path: P, samples: &[DarkSample]) -> PlrResult<()> {
    let mut csv = csv::Writer::from_path(path.as_ref())?;
    for sample in samples {
        csv.serialize(sample)?;
    }
    csv.flush()?;
    info!(path = %path.as_ref().display(), rows = samples.len(), "Wrote dark measurement");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn spectral_table_survives_a_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spectra.csv");
        let table = SpectralTable::new(
            vec![380.0, 381.0, 382.5],
            vec![vec![0.0, 1.5, 2.25], vec![3.0, 4.0, 5.0]],
        );
        table.write_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("380,381,382.5\n"));
        assert_eq!(SpectralTable::read_csv(&path).unwrap(), table);
    }

    #[test]
    fn ragged_spectrum_is_rejected() {
        let mut table = SpectralTable::new(vec![1.0, 2.0], Vec::new());
        assert!(table.push(vec![1.0]).is_err());
        assert!(SpectralTable::from_reader("1,2\n3\n".as_bytes()).is_err());
    }

    #[test]
    fn column_skips_header_and_takes_last_field() {
        let values = read_column_from("pixel,cal\n0,1.5e-3\n1,2e-3\n".as_bytes()).unwrap();
        assert_eq!(values, vec![1.5e-3, 2e-3]);
        let values = read_column_from("0.25\n".as_bytes()).unwrap();
        assert_eq!(values, vec![0.25]);
        assert!(read_column_from("cal\n1\nnope\n".as_bytes()).is_err());
    }

    #[test]
    fn sensor_area_reads_first_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("area.csv");
        std::fs::write(&path, "area_cm2\n0.196\n").unwrap();
        assert_eq!(read_sensor_area(&path).unwrap(), 0.196);

        std::fs::write(&path, "area_cm2\n").unwrap();
        assert!(read_sensor_area(&path).is_err());
    }

    #[test]
    fn info_keeps_setting_as_json() {
        let mut setting = Setting::new();
        setting.insert("led".into(), serde_json::json!(5));
        setting.insert("label".into(), serde_json::json!("blue, bright"));
        let rows = vec![MeasurementInfo {
            board_temp: 31.25,
            micro_temp: 40.5,
            integration_time: 4500.0,
            model: "STS-VIS".into(),
            setting,
        }];

        let mut buffer = Vec::new();
        write_info_to(&mut buffer, &rows).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("board_temp,micro_temp,integration_time,model,setting\n"));
        assert_eq!(read_info_from(buffer.as_slice()).unwrap(), rows);
    }

    #[test]
    fn info_without_setting_column_is_accepted() {
        let rows = read_info_from("board_temp,micro_temp,integration_time,model\n30,40,1000,STS\n".as_bytes())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].setting.is_empty());
    }

    #[test]
    fn dark_samples_have_named_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dark.csv");
        let samples = vec![DarkSample {
            board_temp: 30.5,
            micro_temp: 40.0,
            integration_time: 1000.0,
            wavelengths: 337.0,
            dark_counts: 1500.0,
        }];
        write_dark_samples(&path, &samples).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "board_temp,micro_temp,integration_time,wavelengths,dark_counts\n30.5,40.0,1000.0,337.0,1500.0\n"
        );
    }
}
