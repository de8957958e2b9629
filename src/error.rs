//! Custom error types for the library.
//!
//! This module defines the primary error type, `PlrError`, shared by the Pupil Remote
//! client and the spectrometer calibration layer. Using the `thiserror` crate, it provides
//! a centralized and consistent way to handle failures from transport, encoding, file I/O
//! and instrument code.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment` while extracting [`crate::config::PlrConfig`].
//! - **`Configuration`**: Semantic errors in a configuration that parsed successfully
//!   (e.g. an inverted target band).
//! - **`Io`**: Wraps `std::io::Error`, covering file access for calibration tables.
//! - **`Transport`**: ZeroMQ socket failures.
//! - **`Encode` / `Decode`**: msgpack payload errors.
//! - **`Csv` / `Json`**: Tabular files and the JSON `setting` column.
//! - **`Protocol`**: A reply or frame did not have the shape Pupil Capture documents.
//! - **`Instrument`**: Failures reported by a spectrometer driver.
//! - **`Measurement`**: The adaptive integration-time search could not finish.
//! - **`Calibration`**: Calibration tables that do not line up with the spectra.
//!
//! By using `#[from]`, `PlrError` can be created from the underlying error types,
//! simplifying error handling throughout the crate with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type PlrResult<T> = std::result::Result<T, PlrError>;

#[derive(Error, Debug)]
pub enum PlrError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZeroMQ transport error: {0}")]
    Transport(#[from] zmq::Error),

    #[error("msgpack encode error: {0}")]
    Encode(#[from] rmpv::encode::Error),

    #[error("msgpack decode error: {0}")]
    Decode(#[from] rmpv::decode::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Measurement error: {0}")]
    Measurement(String),

    #[error("Calibration error: {0}")]
    Calibration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_message_is_prefixed() {
        let err = PlrError::Protocol("missing topic frame".to_string());
        assert_eq!(err.to_string(), "Protocol error: missing topic frame");
    }

    #[test]
    fn io_errors_convert_with_question_mark() {
        fn open_missing() -> PlrResult<std::fs::File> {
            Ok(std::fs::File::open("/definitely/not/here.csv")?)
        }

        match open_missing() {
            Err(PlrError::Io(inner)) => assert_eq!(inner.kind(), std::io::ErrorKind::NotFound),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
