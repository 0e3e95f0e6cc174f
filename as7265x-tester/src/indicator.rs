//! Status LED feedback for bench operators.

use std::time::Duration;

use crate::hw_trait::{GpioPin, PinValue};
use crate::tracing::prelude::*;

/// Flash patterns, in blinks.
pub mod pattern {
    pub const START: u32 = 3;
    pub const PASS: u32 = 5;
    pub const FAIL: u32 = 2;
}

const FLASH_PERIOD: Duration = Duration::from_millis(100);

/// LED on the test fixture. Purely advisory: a failing LED never fails a
/// test run, it is only logged.
pub struct StatusLed<P> {
    pin: P,
}

impl<P: GpioPin> StatusLed<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }

    /// Blink `times` times with 100ms on and 100ms off.
    pub async fn flash(&mut self, times: u32) {
        for _ in 0..times {
            if let Err(e) = self.pin.write(PinValue::High).await {
                warn!("Status LED unavailable: {}", e);
                return;
            }
            tokio::time::sleep(FLASH_PERIOD).await;
            if let Err(e) = self.pin.write(PinValue::Low).await {
                warn!("Status LED unavailable: {}", e);
                return;
            }
            tokio::time::sleep(FLASH_PERIOD).await;
        }
    }

    pub async fn started(&mut self) {
        self.flash(pattern::START).await
    }

    pub async fn finished(&mut self, passed: bool) {
        self.flash(if passed { pattern::PASS } else { pattern::FAIL })
            .await
    }
}
