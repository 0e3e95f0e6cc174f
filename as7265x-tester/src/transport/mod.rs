//! Backends that connect the protocol to real or simulated hardware.
//!
//! A [`Fixture`] bundles what one test station needs: the sensor bus, the
//! reset line and the optional status LED.

pub mod command;
#[cfg(target_os = "linux")]
pub mod linux;

use std::sync::Arc;

use crate::config::{PlatformConfig, ProbeSettings, TransportKind};
use crate::error::Result;
use crate::hw_trait::{ByteBus, GpioPin};
use crate::indicator::StatusLed;
use crate::peripheral::as7265x::{SimulatedAs7265x, SLAVE_ADDRESS};
use crate::reset::{GpioReset, NoReset, Reset};
use crate::tracing::prelude::*;

pub use command::{CommandBus, CommandPin, CommandRunner};

pub struct Fixture {
    pub bus: Box<dyn ByteBus>,
    pub reset: Box<dyn Reset>,
    pub led: Option<StatusLed<Box<dyn GpioPin>>>,
}

impl Fixture {
    /// Connect to the hardware a platform file describes.
    ///
    /// The bus and reset line are required when configured; a status LED
    /// that cannot be driven is dropped with a warning.
    pub fn open(platform: &Arc<PlatformConfig>) -> Result<Self> {
        let runner = CommandRunner::default();
        let settings = &platform.probe;

        let bus: Box<dyn ByteBus> = match platform.transport {
            TransportKind::Command => Box::new(CommandBus::new(platform.clone(), runner)?),
            TransportKind::Direct => direct_bus(platform)?,
        };

        let reset: Box<dyn Reset> = if platform.pins.contains_key("reset") {
            let pin = CommandPin::for_role(platform.clone(), "reset", runner)?;
            Box::new(GpioReset::new(pin, settings.reset_hold(), settings.reset_settle()))
        } else {
            Box::new(NoReset)
        };

        let led = match CommandPin::for_role(platform.clone(), "status_led", runner) {
            Ok(pin) => Some(StatusLed::new(Box::new(pin) as Box<dyn GpioPin>)),
            Err(e) => {
                warn!("Status LED disabled: {}", e);
                None
            }
        };

        info!("Connected to {} via {:?} transport", platform.name, platform.transport);
        Ok(Self { bus, reset, led })
    }

    /// A fixture wired to an in-memory sensor.
    pub fn simulated(sim: &SimulatedAs7265x, settings: &ProbeSettings) -> Self {
        Self {
            bus: Box::new(sim.clone()),
            reset: Box::new(GpioReset::new(
                sim.reset_pin(),
                settings.reset_hold(),
                settings.reset_settle(),
            )),
            led: None,
        }
    }
}

#[cfg(target_os = "linux")]
fn direct_bus(platform: &PlatformConfig) -> Result<Box<dyn ByteBus>> {
    Ok(Box::new(linux::LinuxI2c::open(&platform.i2c_bus, SLAVE_ADDRESS)?))
}

#[cfg(not(target_os = "linux"))]
fn direct_bus(_platform: &PlatformConfig) -> Result<Box<dyn ByteBus>> {
    Err(crate::hw_trait::HwError::NotSupported(format!(
        "direct I2C access to slave 0x{:02x} needs Linux i2c-dev",
        SLAVE_ADDRESS
    ))
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_command_platform() {
        let platform: PlatformConfig =
            serde_json::from_str(include_str!("../../../configs/raspberry_pi.json")).unwrap();
        let fixture = Fixture::open(&Arc::new(platform)).unwrap();
        assert!(fixture.led.is_some());
    }

    #[test]
    fn test_open_without_bus_templates() {
        let platform: PlatformConfig = serde_json::from_str(r#"{"name": "Empty"}"#).unwrap();
        assert!(Fixture::open(&Arc::new(platform)).is_err());
    }
}
