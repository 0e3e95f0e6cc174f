//! Bus and GPIO access through platform shell commands.
//!
//! Boards without a usable `i2c-dev` node (or with vendor tooling in the
//! way) describe their `i2cget`/`i2cset`/GPIO invocations as templates in
//! the platform file. Every operation renders a template and runs it with
//! `sh -c`.

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use crate::config::{ConfigError, HwId, PlatformConfig};
use crate::hw_trait::{ByteBus, GpioPin, HwError, PinValue, Result};
use crate::peripheral::as7265x::SLAVE_ADDRESS;
use crate::tracing::prelude::*;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs rendered commands with a deadline.
#[derive(Debug, Clone, Copy)]
pub struct CommandRunner {
    timeout: Duration,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `command` and return its stdout. A non-zero exit is an error
    /// carrying stderr.
    pub async fn run(&self, command: &str) -> Result<String> {
        trace!("$ {}", command);
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| {
                warn!("Command timed out after {:?}: {}", self.timeout, command);
                HwError::Timeout
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HwError::Command(format!(
                "`{}` exited with {}: {}",
                command,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parse a byte printed by a bus tool, `0x40` or `40`.
pub fn parse_hex_byte(text: &str) -> Result<u8> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u8::from_str_radix(digits, 16).map_err(|_| HwError::MalformedResponse(trimmed.to_string()))
}

fn hex(byte: u8) -> String {
    format!("0x{:02x}", byte)
}

fn render_error(e: ConfigError) -> HwError {
    HwError::InvalidParameter(e.to_string())
}

/// [`ByteBus`] over the `i2c_read`/`i2c_write` templates.
pub struct CommandBus {
    platform: Arc<PlatformConfig>,
    runner: CommandRunner,
}

impl CommandBus {
    /// Fails early when the platform lacks either bus template.
    pub fn new(platform: Arc<PlatformConfig>, runner: CommandRunner) -> std::result::Result<Self, ConfigError> {
        platform.command("i2c_read", &[("reg", hex(0))])?;
        platform.command("i2c_write", &[("reg", hex(0)), ("val", hex(0))])?;
        Ok(Self { platform, runner })
    }

    /// Scan the bus and report whether the sensor address answered.
    pub async fn detect(&self) -> Result<bool> {
        let command = self.platform.command("i2c_scan", &[]).map_err(render_error)?;
        let output = self.runner.run(&command).await?;
        Ok(address_in_scan(&output, SLAVE_ADDRESS))
    }
}

/// Whether an `i2cdetect`-style listing shows `address`.
pub fn address_in_scan(output: &str, address: u8) -> bool {
    let pattern = format!(r"(?i)\b(0x)?{:02x}\b", address);
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(output),
        Err(_) => false,
    }
}

#[async_trait]
impl ByteBus for CommandBus {
    async fn read_byte(&mut self, register: u8) -> Result<u8> {
        let command = self
            .platform
            .command("i2c_read", &[("reg", hex(register))])
            .map_err(render_error)?;
        let output = self.runner.run(&command).await?;
        parse_hex_byte(&output)
    }

    async fn write_byte(&mut self, register: u8, value: u8) -> Result<()> {
        let command = self
            .platform
            .command("i2c_write", &[("reg", hex(register)), ("val", hex(value))])
            .map_err(render_error)?;
        self.runner.run(&command).await?;
        Ok(())
    }
}

/// [`GpioPin`] over the `gpio_set_high`/`gpio_set_low` templates.
pub struct CommandPin {
    platform: Arc<PlatformConfig>,
    pin: HwId,
    runner: CommandRunner,
}

impl CommandPin {
    /// Pin for a role such as `reset` or `status_led`.
    pub fn for_role(
        platform: Arc<PlatformConfig>,
        role: &str,
        runner: CommandRunner,
    ) -> std::result::Result<Self, ConfigError> {
        let pin = platform.pin(role)?.clone();
        for name in ["gpio_set_high", "gpio_set_low"] {
            platform.command(name, &[("pin", pin.to_string())])?;
        }
        Ok(Self {
            platform,
            pin,
            runner,
        })
    }
}

#[async_trait]
impl GpioPin for CommandPin {
    async fn write(&mut self, value: PinValue) -> Result<()> {
        let name = match value {
            PinValue::High => "gpio_set_high",
            PinValue::Low => "gpio_set_low",
        };
        let command = self
            .platform
            .command(name, &[("pin", self.pin.to_string())])
            .map_err(render_error)?;
        self.runner.run(&command).await?;
        Ok(())
    }
}
