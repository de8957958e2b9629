//! # rust_plr
//!
//! Tools for pupillary light reflex (PLR) experiments: controlling a Pupil Core eye
//! tracker over Pupil Capture's network API, and measuring the stimulus light with an
//! Ocean Optics spectrometer. The CLI in `main.rs` is a thin layer over this library
//! so experiment scripts can use the same code directly.
//!
//! ## Crate Structure
//!
//! - **`config`**: Strongly-typed configuration loaded from TOML and `RUST_PLR_*`
//!   environment variables with `figment`. See `config::PlrConfig`.
//! - **`error`**: The `PlrError` enum shared by every module.
//! - **`logging`**: `tracing` subscriber setup (pretty, compact or JSON output).
//! - **`pupil`**: Pupil Remote commands, notifications, annotations, the IPC
//!   subscriber and the light-onset detector. ZeroMQ sockets carry msgpack payloads.
//! - **`spectro`**: The spectrometer seam, adaptive integration-time measurement,
//!   dark-count prediction, radiance calibration and CSV I/O.

pub mod config;
pub mod error;
pub mod logging;
pub mod pupil;
pub mod spectro;

pub use error::{PlrError, PlrResult};
