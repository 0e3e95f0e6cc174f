//! GPIO hardware abstraction trait.

use super::Result;
use async_trait::async_trait;

/// GPIO pin value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinValue {
    Low,
    High,
}

impl From<bool> for PinValue {
    fn from(value: bool) -> Self {
        if value {
            PinValue::High
        } else {
            PinValue::Low
        }
    }
}

impl From<PinValue> for bool {
    fn from(value: PinValue) -> Self {
        matches!(value, PinValue::High)
    }
}

/// Output-only GPIO line.
#[async_trait]
pub trait GpioPin: Send {
    /// Drive the pin to the given level.
    async fn write(&mut self, value: PinValue) -> Result<()>;
}

#[async_trait]
impl<P: GpioPin + ?Sized> GpioPin for Box<P> {
    async fn write(&mut self, value: PinValue) -> Result<()> {
        (**self).write(value).await
    }
}
