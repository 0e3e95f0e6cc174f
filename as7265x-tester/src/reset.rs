//! Hardware reset of the sensor module.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::hw_trait::{GpioPin, HwError, PinValue};
use crate::tracing::prelude::*;

#[derive(Error, Debug)]
pub enum ResetError {
    #[error("failed to drive reset line {level}: {source}")]
    Line {
        level: &'static str,
        #[source]
        source: HwError,
    },
}

/// Puts the sensor into a known state.
#[async_trait]
pub trait Reset: Send {
    /// Returns once the sensor has booted and is ready for the handshake.
    async fn reset(&mut self) -> Result<(), ResetError>;
}

#[async_trait]
impl<R: Reset + ?Sized> Reset for Box<R> {
    async fn reset(&mut self) -> Result<(), ResetError> {
        (**self).reset().await
    }
}

/// Pulses an active-low RST line.
///
/// The line is held low for `hold`, released, and then the sensor gets
/// `settle` to boot its firmware.
pub struct GpioReset<P> {
    pin: P,
    hold: Duration,
    settle: Duration,
}

impl<P: GpioPin> GpioReset<P> {
    pub fn new(pin: P, hold: Duration, settle: Duration) -> Self {
        Self { pin, hold, settle }
    }
}

#[async_trait]
impl<P: GpioPin> Reset for GpioReset<P> {
    async fn reset(&mut self) -> Result<(), ResetError> {
        debug!("Asserting sensor reset for {:?}", self.hold);
        self.pin
            .write(PinValue::Low)
            .await
            .map_err(|source| ResetError::Line { level: "low", source })?;
        tokio::time::sleep(self.hold).await;

        self.pin
            .write(PinValue::High)
            .await
            .map_err(|source| ResetError::Line { level: "high", source })?;
        tokio::time::sleep(self.settle).await;

        debug!("Sensor reset complete");
        Ok(())
    }
}

/// For boards whose reset line is not wired to the host.
pub struct NoReset;

#[async_trait]
impl Reset for NoReset {
    async fn reset(&mut self) -> Result<(), ResetError> {
        warn!("No reset line configured; assuming sensor is already running");
        Ok(())
    }
}
