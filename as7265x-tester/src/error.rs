//! Common error types for the tester.
//!
//! Each layer has its own error enum; this module gathers them into one
//! crate-level Error so the front ends can propagate any of them with `?`.

use thiserror::Error;

use crate::config::ConfigError;
use crate::hw_trait::HwError;
use crate::peripheral::as7265x::ProtocolError;
use crate::probe::ProbeError;
use crate::reset::ResetError;

/// Main error type for tester operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Platform configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Bus or GPIO backend errors
    #[error("Hardware error: {0}")]
    Hardware(#[from] HwError),

    /// Virtual-register handshake errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Reset error: {0}")]
    Reset(#[from] ResetError),

    /// Probe run errors
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    /// Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
