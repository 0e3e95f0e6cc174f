//! Probe outcomes and where they go.

use serde::{Deserialize, Serialize};
use strum::Display;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use super::ProbeState;
use crate::peripheral::as7265x::DeviceId;
use crate::tracing::prelude::*;

/// Coarse result of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    /// Sensor responded but the reading is implausible
    Warn,
    Fail,
    /// Informational, never affects the outcome
    Info,
}

/// Why a check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum Diagnostic {
    /// DEVICE_TYPE is not an AS7265x
    WrongType,
    /// HW_VERSION does not match the expected revision
    WrongVersion,
    /// Handshake timed out or the bus failed
    NoResponse,
    ResetFailure,
    /// Run cancelled by the operator
    Aborted,
}

/// One entry in the ordered probe log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub phase: ProbeState,
    pub check: String,
    pub verdict: Verdict,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
}

impl ProbeEvent {
    pub fn new(
        phase: ProbeState,
        check: impl Into<String>,
        verdict: Verdict,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            phase,
            check: check.into(),
            verdict,
            detail: detail.into(),
            value: None,
            device: None,
            diagnostic: None,
        }
    }

    pub fn with_value(mut self, value: u8) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostic = Some(diagnostic);
        self
    }
}

/// Consumer of probe events, in emission order.
pub trait ResultSink: Send {
    fn record(&mut self, event: ProbeEvent);
}

/// Collects events in memory.
#[derive(Debug, Default, Clone)]
pub struct ProbeLog {
    events: Vec<ProbeEvent>,
}

impl ProbeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ProbeEvent] {
        &self.events
    }

    /// Events for one check name, in order.
    pub fn check(&self, name: &str) -> Vec<&ProbeEvent> {
        self.events.iter().filter(|e| e.check == name).collect()
    }

    pub fn has_failure(&self) -> bool {
        self.events.iter().any(|e| e.verdict == Verdict::Fail)
    }

    pub fn into_events(self) -> Vec<ProbeEvent> {
        self.events
    }
}

impl ResultSink for ProbeLog {
    fn record(&mut self, event: ProbeEvent) {
        self.events.push(event);
    }
}

/// Writes each event to the log at a level matching its verdict.
#[derive(Debug, Default)]
pub struct TracingSink;

impl ResultSink for TracingSink {
    fn record(&mut self, event: ProbeEvent) {
        let device = event.device.map(|d| format!(" [{}]", d)).unwrap_or_default();
        match event.verdict {
            Verdict::Pass => info!("PASS {}{}: {}", event.check, device, event.detail),
            Verdict::Info => info!("{}{}: {}", event.check, device, event.detail),
            Verdict::Warn => warn!("WARN {}{}: {}", event.check, device, event.detail),
            Verdict::Fail => error!("FAIL {}{}: {}", event.check, device, event.detail),
        }
    }
}

/// Streams events to another task.
impl ResultSink for mpsc::UnboundedSender<ProbeEvent> {
    fn record(&mut self, event: ProbeEvent) {
        if self.send(event).is_err() {
            debug!("Probe event receiver dropped");
        }
    }
}

/// The saved result of one probe run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub platform: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started: OffsetDateTime,
    pub outcome: ProbeState,
    pub events: Vec<ProbeEvent>,
}

impl ProbeReport {
    pub fn new(platform: impl Into<String>, started: OffsetDateTime, outcome: ProbeState, log: ProbeLog) -> Self {
        Self {
            platform: platform.into(),
            started,
            outcome,
            events: log.into_events(),
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == ProbeState::Passed
    }

    /// `as7265x_test_<platform>_<YYYYmmdd_HHMMSS>.json`
    pub fn default_file_name(&self) -> String {
        let stamp = self
            .started
            .format(time::macros::format_description!(
                "[year][month][day]_[hour][minute][second]"
            ))
            .unwrap_or_else(|_| self.started.unix_timestamp().to_string());
        format!("as7265x_test_{}_{}.json", self.platform, stamp)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn report() -> ProbeReport {
        let mut log = ProbeLog::new();
        log.record(
            ProbeEvent::new(ProbeState::CheckingIdentity, "device_type", Verdict::Pass, "AS7265x detected")
                .with_value(0x40),
        );
        log.record(
            ProbeEvent::new(ProbeState::CheckingDevices, "temperature", Verdict::Warn, "implausible")
                .with_value(200)
                .with_device(DeviceId::Uv),
        );
        ProbeReport::new(
            "raspberry_pi",
            datetime!(2024-03-05 14:07:09 UTC),
            ProbeState::Passed,
            log,
        )
    }

    #[test]
    fn test_default_file_name() {
        assert_eq!(
            report().default_file_name(),
            "as7265x_test_raspberry_pi_20240305_140709.json"
        );
    }

    #[test]
    fn test_json_shape() {
        let json: serde_json::Value = serde_json::from_str(&report().to_json().unwrap()).unwrap();
        assert_eq!(json["outcome"], "Passed");
        assert_eq!(json["started"], "2024-03-05T14:07:09Z");

        let events = json["events"].as_array().unwrap();
        assert_eq!(events[0]["verdict"], "PASS");
        assert_eq!(events[0]["value"], 0x40);
        assert!(events[0].get("device").is_none());
        assert_eq!(events[1]["device"], "UV");
    }

    #[test]
    fn test_log_queries() {
        let mut log = ProbeLog::new();
        assert!(!log.has_failure());
        log.record(
            ProbeEvent::new(ProbeState::Resetting, "reset", Verdict::Fail, "line stuck")
                .with_diagnostic(Diagnostic::ResetFailure),
        );
        assert!(log.has_failure());
        assert_eq!(log.check("reset").len(), 1);
        assert!(log.check("device_type").is_empty());
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (mut tx, mut rx) = mpsc::unbounded_channel();
        tx.record(ProbeEvent::new(ProbeState::Passed, "overall", Verdict::Pass, "ok"));
        drop(tx);
        assert_eq!(rx.recv().await.unwrap().check, "overall");
        assert!(rx.recv().await.is_none());
    }
}
