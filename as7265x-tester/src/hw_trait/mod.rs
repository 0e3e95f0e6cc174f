//! Hardware abstraction layer traits.
//!
//! This module defines the hardware interface traits (byte-wide I2C register
//! access and GPIO) that let the sensor protocol work with different
//! underlying implementations, whether direct Linux `i2c-dev` access,
//! platform shell commands, or the in-memory simulator.

pub mod gpio;
pub mod i2c;

// Re-export traits
pub use gpio::{GpioPin, PinValue};
pub use i2c::ByteBus;

/// Common error type for hardware operations
#[derive(Debug, thiserror::Error)]
pub enum HwError {
    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No acknowledgment from the addressed device
    #[error("No acknowledgment from device at address 0x{0:02x}")]
    NoAck(u8),

    /// Invalid parameter or argument
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Operation not supported by this backend
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// A platform command ran but reported failure
    #[error("Command failed: {0}")]
    Command(String),

    /// The backend answered with something that is not a byte
    #[error("Malformed response: {0:?}")]
    MalformedResponse(String),

    /// Timeout waiting for hardware response
    #[error("Hardware timeout")]
    Timeout,

    /// Other hardware-specific error
    #[error("Hardware error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, HwError>;
