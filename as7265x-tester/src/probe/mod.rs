//! End-to-end validation of one sensor module.
//!
//! The probe resets the module, checks that the master die identifies as an
//! AS7265x, reports the firmware version, then selects each die in turn and
//! reads its temperature. Every step emits a [`ProbeEvent`]; the first hard
//! failure ends the run.

pub mod report;

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, IntoEnumIterator};
use thiserror::Error;

use crate::config::ProbeSettings;
use crate::hw_trait::ByteBus;
use crate::peripheral::as7265x::{
    identity, virt, DeviceId, DeviceSelector, ProtocolError, VirtualAddress,
    VirtualRegisterChannel,
};
use crate::reset::{Reset, ResetError};
use crate::tracing::prelude::*;

pub use report::{Diagnostic, ProbeEvent, ProbeLog, ProbeReport, ResultSink, TracingSink, Verdict};

/// Where a probe run is, or where it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum ProbeState {
    NotStarted,
    Resetting,
    CheckingIdentity,
    CheckingDevices,
    Passed,
    Failed,
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error(transparent)]
    Reset(#[from] ResetError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("{register} read 0x{actual:02X}, expected 0x{expected:02X}")]
    UnexpectedValue {
        register: VirtualAddress,
        expected: u8,
        actual: u8,
    },
}

impl ProbeError {
    pub fn diagnostic(&self) -> Diagnostic {
        match self {
            ProbeError::Reset(_) => Diagnostic::ResetFailure,
            ProbeError::Protocol(ProtocolError::Cancelled { .. }) => Diagnostic::Aborted,
            ProbeError::Protocol(_) => Diagnostic::NoResponse,
            ProbeError::UnexpectedValue { register, .. } if *register == virt::DEVICE_TYPE => {
                Diagnostic::WrongType
            }
            ProbeError::UnexpectedValue { .. } => Diagnostic::WrongVersion,
        }
    }
}

/// Firmware version as the master reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub patch: u8,
    pub build: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.patch, self.build)
    }
}

/// Check names used in emitted events.
pub mod checks {
    pub const RESET: &str = "reset";
    pub const DEVICE_TYPE: &str = "device_type";
    pub const HW_VERSION: &str = "hw_version";
    pub const FIRMWARE: &str = "firmware";
    pub const SELECT: &str = "select";
    pub const TEMPERATURE: &str = "temperature";
    pub const OVERALL: &str = "overall";
}

/// Drives one module through reset, identity and per-die checks.
pub struct SensorProbe<B, R> {
    selector: DeviceSelector<B>,
    reset: R,
    settings: ProbeSettings,
    state: ProbeState,
}

impl<B: ByteBus, R: Reset> SensorProbe<B, R> {
    pub fn new(channel: VirtualRegisterChannel<B>, reset: R, settings: ProbeSettings) -> Self {
        Self {
            selector: DeviceSelector::new(channel),
            reset,
            settings,
            state: ProbeState::NotStarted,
        }
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    pub fn selector_mut(&mut self) -> &mut DeviceSelector<B> {
        &mut self.selector
    }

    /// Run the whole sequence once.
    ///
    /// On success the state is `Passed`. On the first hard failure a FAIL
    /// event is emitted, the state becomes `Failed` and the error is
    /// returned; later phases are not attempted.
    pub async fn run(&mut self, sink: &mut dyn ResultSink) -> Result<(), ProbeError> {
        if self.state != ProbeState::NotStarted {
            warn!("Probe re-run from state {}", self.state);
        }

        let result = self.run_phases(sink).await;
        match &result {
            Ok(()) => {
                self.state = ProbeState::Passed;
                sink.record(ProbeEvent::new(
                    self.state,
                    checks::OVERALL,
                    Verdict::Pass,
                    "sensor module passed all checks",
                ));
                info!("Probe passed");
            }
            Err(e) => {
                sink.record(
                    ProbeEvent::new(ProbeState::Failed, checks::OVERALL, Verdict::Fail, e.to_string())
                        .with_diagnostic(e.diagnostic()),
                );
                error!("Probe failed during {}: {}", self.state, e);
                self.state = ProbeState::Failed;
            }
        }
        result
    }

    async fn run_phases(&mut self, sink: &mut dyn ResultSink) -> Result<(), ProbeError> {
        self.state = ProbeState::Resetting;
        if let Err(e) = self.reset.reset().await {
            let e = ProbeError::from(e);
            self.fail(sink, checks::RESET, &e, None);
            return Err(e);
        }
        sink.record(ProbeEvent::new(self.state, checks::RESET, Verdict::Pass, "reset complete"));

        self.state = ProbeState::CheckingIdentity;
        self.check_identity(sink).await?;
        self.report_firmware(sink).await?;

        self.state = ProbeState::CheckingDevices;
        self.check_devices(sink).await
    }

    fn fail(
        &self,
        sink: &mut dyn ResultSink,
        check: &str,
        error: &ProbeError,
        device: Option<DeviceId>,
    ) {
        let mut event = ProbeEvent::new(self.state, check, Verdict::Fail, error.to_string())
            .with_diagnostic(error.diagnostic());
        if let ProbeError::UnexpectedValue { actual, .. } = error {
            event = event.with_value(*actual);
        }
        if let Some(device) = device {
            event = event.with_device(device);
        }
        sink.record(event);
    }

    async fn expect(
        &mut self,
        sink: &mut dyn ResultSink,
        check: &str,
        register: VirtualAddress,
        expected: u8,
    ) -> Result<(), ProbeError> {
        let actual = match self.selector.read(register).await {
            Ok(value) => value,
            Err(e) => {
                let e = ProbeError::from(e);
                self.fail(sink, check, &e, None);
                return Err(e);
            }
        };

        if actual != expected {
            let e = ProbeError::UnexpectedValue {
                register,
                expected,
                actual,
            };
            self.fail(sink, check, &e, None);
            return Err(e);
        }

        sink.record(
            ProbeEvent::new(self.state, check, Verdict::Pass, format!("{} = 0x{:02X}", register, actual))
                .with_value(actual),
        );
        Ok(())
    }

    /// DEVICE_TYPE must read 0x40 and HW_VERSION 0x41.
    pub async fn check_identity(&mut self, sink: &mut dyn ResultSink) -> Result<(), ProbeError> {
        debug!("Checking sensor identity");
        self.expect(sink, checks::DEVICE_TYPE, virt::DEVICE_TYPE, identity::DEVICE_TYPE)
            .await?;
        self.expect(sink, checks::HW_VERSION, virt::HW_VERSION, identity::HW_VERSION)
            .await
    }

    /// Query the firmware version. Informational: any value is accepted.
    pub async fn report_firmware(
        &mut self,
        sink: &mut dyn ResultSink,
    ) -> Result<FirmwareVersion, ProbeError> {
        let mut parts = [0u8; 3];
        for (part, query) in parts.iter_mut().zip(1u8..) {
            match self.query_firmware(query).await {
                Ok(value) => *part = value,
                Err(e) => {
                    let e = ProbeError::from(e);
                    self.fail(sink, checks::FIRMWARE, &e, None);
                    return Err(e);
                }
            }
        }

        let version = FirmwareVersion {
            major: parts[0],
            patch: parts[1],
            build: parts[2],
        };
        sink.record(ProbeEvent::new(
            self.state,
            checks::FIRMWARE,
            Verdict::Info,
            format!("firmware {}", version),
        ));
        Ok(version)
    }

    async fn query_firmware(&mut self, query: u8) -> Result<u8, ProtocolError> {
        let channel = self.selector.channel_mut();
        channel.write(virt::FW_VERSION_HIGH, query).await?;
        channel.write(virt::FW_VERSION_LOW, query).await?;
        channel.read(virt::FW_VERSION_LOW).await
    }

    /// Select each die, let it settle, and read its temperature.
    ///
    /// A temperature inside the configured range is a PASS, anything else a
    /// WARN; a die that does not answer fails the run.
    pub async fn check_devices(&mut self, sink: &mut dyn ResultSink) -> Result<(), ProbeError> {
        for device in DeviceId::iter() {
            debug!("Checking {} die", device);
            if let Err(e) = self.selector.select(device).await {
                let e = ProbeError::from(e);
                self.fail(sink, checks::SELECT, &e, Some(device));
                return Err(e);
            }
            tokio::time::sleep(self.settings.settle_delay()).await;

            let celsius = match self.selector.read_temperature().await {
                Ok(value) => value,
                Err(e) => {
                    let e = ProbeError::from(e);
                    self.fail(sink, checks::TEMPERATURE, &e, Some(device));
                    return Err(e);
                }
            };

            let (verdict, detail) = if self.settings.temperature_plausible(celsius) {
                (Verdict::Pass, format!("{}°C", celsius))
            } else {
                (
                    Verdict::Warn,
                    format!(
                        "{}°C outside {}..={}°C",
                        celsius, self.settings.temp_min, self.settings.temp_max
                    ),
                )
            };
            sink.record(
                ProbeEvent::new(self.state, checks::TEMPERATURE, verdict, detail)
                    .with_value(celsius)
                    .with_device(device),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripheral::as7265x::{Phase, PhysicalRegister, PollBudget, SimulatedAs7265x};
    use crate::reset::GpioReset;
    use crate::reset::NoReset;
    use std::time::Duration;

    fn probe(sim: &SimulatedAs7265x) -> SensorProbe<SimulatedAs7265x, NoReset> {
        let settings = ProbeSettings::default();
        SensorProbe::new(
            VirtualRegisterChannel::new(sim.clone(), settings.poll_budget()),
            NoReset,
            settings,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_sensor_passes() {
        let sim = SimulatedAs7265x::new();
        let mut probe = probe(&sim);
        let mut log = ProbeLog::new();

        probe.run(&mut log).await.unwrap();

        assert_eq!(probe.state(), ProbeState::Passed);
        assert!(!log.has_failure());
        let temps = log.check(checks::TEMPERATURE);
        assert_eq!(temps.len(), 3);
        assert_eq!(temps[0].device, Some(DeviceId::Nir));
        assert_eq!(temps[2].device, Some(DeviceId::Uv));
        assert_eq!(log.events().last().unwrap().check, checks::OVERALL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_device_type() {
        let sim = SimulatedAs7265x::new();
        sim.set_register(virt::DEVICE_TYPE, 0x3F);
        let mut probe = probe(&sim);
        let mut log = ProbeLog::new();

        let err = probe.run(&mut log).await.unwrap_err();

        assert_eq!(err.diagnostic(), Diagnostic::WrongType);
        assert!(log.check(checks::HW_VERSION).is_empty());
        assert_eq!(probe.state(), ProbeState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_firmware_reported() {
        let sim = SimulatedAs7265x::new();
        sim.set_firmware(12, 3, 7);
        let mut probe = probe(&sim);
        let mut log = ProbeLog::new();

        let version = probe.report_firmware(&mut log).await.unwrap();

        assert_eq!(version.to_string(), "12.3.7");
        let event = log.check(checks::FIRMWARE)[0];
        assert_eq!(event.verdict, Verdict::Info);
        assert_eq!(event.detail, "firmware 12.3.7");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hot_die_warns() {
        let sim = SimulatedAs7265x::new();
        sim.set_temperature(DeviceId::Visible, 120);
        let mut probe = probe(&sim);
        let mut log = ProbeLog::new();

        probe.run(&mut log).await.unwrap();

        let visible = log.check(checks::TEMPERATURE)[1];
        assert_eq!(visible.verdict, Verdict::Warn);
        assert_eq!(visible.value, Some(120));
        assert_eq!(probe.state(), ProbeState::Passed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_before_each_temperature_read() {
        let sim = SimulatedAs7265x::new();
        let mut probe = probe(&sim);
        let mut log = ProbeLog::new();

        let start = tokio::time::Instant::now();
        probe.check_devices(&mut log).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_die_aborts() {
        let sim = SimulatedAs7265x::new();
        let mut probe = probe(&sim);
        let mut log = ProbeLog::new();

        sim.stall_rx(true);
        let err = probe.check_devices(&mut log).await.unwrap_err();

        assert!(matches!(
            err,
            ProbeError::Protocol(ProtocolError::Timeout {
                phase: Phase::AwaitRxReady,
                ..
            })
        ));
        let failures = log.check(checks::TEMPERATURE);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].device, Some(DeviceId::Nir));
        assert_eq!(failures[0].diagnostic, Some(Diagnostic::NoResponse));
        // Only the NIR selection was attempted
        assert_eq!(sim.selected(), DeviceId::Nir);
        assert_eq!(
            sim.writes_to(PhysicalRegister::Write),
            vec![virt::DEV_SELECT_CONTROL.write_frame(), 0x00, virt::DEVICE_TEMP.read_frame()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_failure() {
        let sim = SimulatedAs7265x::new();
        let settings = ProbeSettings::default();

        struct StuckLine;

        #[async_trait::async_trait]
        impl crate::hw_trait::GpioPin for StuckLine {
            async fn write(&mut self, _value: crate::hw_trait::PinValue) -> crate::hw_trait::Result<()> {
                Err(crate::hw_trait::HwError::Command("pinctrl: not found".into()))
            }
        }

        let mut probe = SensorProbe::new(
            VirtualRegisterChannel::new(sim.clone(), PollBudget::default()),
            GpioReset::new(StuckLine, settings.reset_hold(), settings.reset_settle()),
            settings,
        );
        let mut log = ProbeLog::new();

        let err = probe.run(&mut log).await.unwrap_err();

        assert_eq!(err.diagnostic(), Diagnostic::ResetFailure);
        assert_eq!(log.events()[0].phase, ProbeState::Resetting);
        assert!(sim.log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_runs_first() {
        let sim = SimulatedAs7265x::new();
        let settings = ProbeSettings::default();
        let mut probe = SensorProbe::new(
            VirtualRegisterChannel::new(sim.clone(), settings.poll_budget()),
            GpioReset::new(sim.reset_pin(), settings.reset_hold(), settings.reset_settle()),
            settings,
        );
        let mut log = ProbeLog::new();

        probe.run(&mut log).await.unwrap();

        assert_eq!(log.events()[0].check, checks::RESET);
        assert_eq!(log.events()[0].verdict, Verdict::Pass);
        assert!(!sim.in_reset());
    }
}
