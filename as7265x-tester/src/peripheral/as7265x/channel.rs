//! Virtual register access over the STATUS/WRITE/READ slave interface.
//!
//! Every virtual access is a short handshake. A read announces the register
//! on WRITE and collects the answer from READ once RX_VALID rises. A write
//! announces the register with the write bit set, waits for the sensor to
//! drain it, then sends the payload. Each wait is bounded by a
//! [`PollBudget`], so no operation can hang on a dead or wedged sensor.

use std::time::Duration;
use strum::Display;
use thiserror::Error;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::registers::{PhysicalRegister, VirtualAddress};
use super::status::{StatusDecoder, StatusFlags};
use crate::hw_trait::{ByteBus, HwError};
use crate::tracing::prelude::*;

/// Bound on every wait-for-flag loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    /// STATUS samples taken before giving up
    pub max_attempts: u32,
    /// Sleep between samples
    pub interval: Duration,
}

impl PollBudget {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self { max_attempts, interval }
    }

    /// Longest a single phase can block.
    pub fn worst_case(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

impl Default for PollBudget {
    fn default() -> Self {
        Self::new(50, Duration::from_millis(100))
    }
}

/// Handshake step, used to localize failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Phase {
    /// Waiting for WRITE to be free before sending an address
    AwaitTxReady,
    /// Placing the (framed) register address on WRITE
    SendAddress,
    /// Waiting for the sensor to drain the address of a write
    AwaitTxReady2,
    /// Placing the payload on WRITE
    SendValue,
    /// Waiting for the answer to a read request
    AwaitRxReady,
    /// Collecting the answer from READ
    ReceiveValue,
}

/// Virtual register protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("bus fault in {phase}: {source}")]
    BusFault { phase: Phase, source: HwError },
    #[error("no handshake in {phase} after {attempts} polls")]
    Timeout { phase: Phase, attempts: u32 },
    #[error("cancelled in {phase}")]
    Cancelled { phase: Phase },
}

impl ProtocolError {
    pub fn phase(&self) -> Phase {
        match self {
            ProtocolError::BusFault { phase, .. }
            | ProtocolError::Timeout { phase, .. }
            | ProtocolError::Cancelled { phase } => *phase,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProtocolError::Timeout { .. })
    }
}

/// Protocol engine for one AS7265x behind a [`ByteBus`].
///
/// Holds the bus exclusively; operations take `&mut self`, so only one
/// handshake can be in flight at a time.
pub struct VirtualRegisterChannel<B> {
    bus: B,
    budget: PollBudget,
    cancel: Option<CancellationToken>,
}

impl<B: ByteBus> VirtualRegisterChannel<B> {
    pub fn new(bus: B, budget: PollBudget) -> Self {
        Self {
            bus,
            budget,
            cancel: None,
        }
    }

    /// Abort pending waits when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn budget(&self) -> PollBudget {
        self.budget
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_inner(self) -> B {
        self.bus
    }

    /// Read one virtual register.
    pub async fn read(&mut self, addr: VirtualAddress) -> Result<u8, ProtocolError> {
        self.wait_for(Phase::AwaitTxReady, |flags| !flags.tx_busy).await?;
        self.put(Phase::SendAddress, addr.read_frame()).await?;
        self.wait_for(Phase::AwaitRxReady, |flags| flags.rx_ready).await?;

        let value = self
            .bus
            .read_byte(PhysicalRegister::Read.addr())
            .await
            .map_err(|source| ProtocolError::BusFault {
                phase: Phase::ReceiveValue,
                source,
            })?;

        trace!("Virtual read {} -> 0x{:02X}", addr, value);
        Ok(value)
    }

    /// Write one virtual register.
    pub async fn write(&mut self, addr: VirtualAddress, value: u8) -> Result<(), ProtocolError> {
        self.wait_for(Phase::AwaitTxReady, |flags| !flags.tx_busy).await?;
        self.put(Phase::SendAddress, addr.write_frame()).await?;

        // The sensor must consume the address before it takes the payload;
        // writing early overwrites the address in WRITE.
        self.wait_for(Phase::AwaitTxReady2, |flags| !flags.tx_busy).await?;
        self.put(Phase::SendValue, value).await?;

        trace!("Virtual write {} <- 0x{:02X}", addr, value);
        Ok(())
    }

    async fn put(&mut self, phase: Phase, byte: u8) -> Result<(), ProtocolError> {
        self.bus
            .write_byte(PhysicalRegister::Write.addr(), byte)
            .await
            .map_err(|source| ProtocolError::BusFault { phase, source })
    }

    /// Sample STATUS until `ready` holds, at most `max_attempts` times.
    async fn wait_for(
        &mut self,
        phase: Phase,
        ready: impl Fn(StatusFlags) -> bool,
    ) -> Result<(), ProtocolError> {
        let PollBudget { max_attempts, interval } = self.budget;

        for attempt in 1..=max_attempts {
            if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                return Err(ProtocolError::Cancelled { phase });
            }

            let raw = self
                .bus
                .read_byte(PhysicalRegister::Status.addr())
                .await
                .map_err(|source| ProtocolError::BusFault { phase, source })?;

            if ready(StatusDecoder::decode(raw)) {
                if attempt > 1 {
                    trace!("{} satisfied after {} polls", phase, attempt);
                }
                return Ok(());
            }

            if attempt < max_attempts {
                pause(self.cancel.as_ref(), phase, interval).await?;
            }
        }

        debug!("{} gave up after {} polls", phase, max_attempts);
        Err(ProtocolError::Timeout {
            phase,
            attempts: max_attempts,
        })
    }
}

async fn pause(
    cancel: Option<&CancellationToken>,
    phase: Phase,
    interval: Duration,
) -> Result<(), ProtocolError> {
    match cancel {
        Some(token) => tokio::select! {
            _ = token.cancelled() => Err(ProtocolError::Cancelled { phase }),
            _ = time::sleep(interval) => Ok(()),
        },
        None => {
            time::sleep(interval).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripheral::as7265x::registers::{virt, WRITE_BIT};
    use crate::peripheral::as7265x::sim::SimulatedAs7265x;
    use tokio::time::Instant;

    fn channel(sim: &SimulatedAs7265x) -> VirtualRegisterChannel<SimulatedAs7265x> {
        VirtualRegisterChannel::new(sim.clone(), PollBudget::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_then_read_round_trip() {
        let sim = SimulatedAs7265x::new();
        sim.set_busy_polls(3);
        let mut channel = channel(&sim);

        for (raw, value) in [(0x04, 0x5A), (0x30, 0x00), (0x7F, 0xFF)] {
            let addr = VirtualAddress::new(raw).unwrap();
            channel.write(addr, value).await.unwrap();
            assert_eq!(channel.read(addr).await.unwrap(), value);
        }

        assert_eq!(sim.overruns(), 0, "WRITE was written while TX was busy");
        assert_eq!(sim.underruns(), 0, "READ was read before RX was valid");
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_frames_address_with_write_bit() {
        let sim = SimulatedAs7265x::new();
        let mut channel = channel(&sim);

        for raw in 0..=0x7F {
            sim.clear_log();
            channel.write(VirtualAddress::new(raw).unwrap(), 0x11).await.unwrap();
            assert_eq!(sim.writes_to(PhysicalRegister::Write), vec![raw | WRITE_BIT, 0x11]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_frames_address_unmodified() {
        let sim = SimulatedAs7265x::new();
        let mut channel = channel(&sim);

        for raw in 0..=0x7F {
            sim.clear_log();
            channel.read(VirtualAddress::new(raw).unwrap()).await.unwrap();
            assert_eq!(sim.writes_to(PhysicalRegister::Write), vec![raw]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_waits_for_address_to_drain() {
        let sim = SimulatedAs7265x::new();
        sim.set_busy_polls(5);
        let mut channel = channel(&sim);

        channel.write(virt::INTEGRATION_TIME, 0x08).await.unwrap();

        assert_eq!(sim.overruns(), 0);
        assert_eq!(sim.register(virt::INTEGRATION_TIME), 0x08);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rx_timeout_after_exact_budget() {
        let sim = SimulatedAs7265x::new();
        sim.stall_rx(true);
        let budget = PollBudget::new(50, Duration::from_millis(100));
        let mut channel = VirtualRegisterChannel::new(sim.clone(), budget);

        let start = Instant::now();
        let err = channel.read(virt::DEVICE_TYPE).await.unwrap_err();

        assert!(matches!(
            err,
            ProtocolError::Timeout { phase: Phase::AwaitRxReady, attempts: 50 }
        ));
        // One poll for AwaitTxReady, then exactly the budget for AwaitRxReady
        assert_eq!(sim.status_reads(), 1 + 50);
        assert_eq!(start.elapsed(), budget.worst_case());
        assert!(sim.reads_from(PhysicalRegister::Read).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tx_timeout_never_touches_write() {
        let sim = SimulatedAs7265x::new();
        sim.stall_tx(true);
        let mut channel = VirtualRegisterChannel::new(
            sim.clone(),
            PollBudget::new(7, Duration::from_millis(10)),
        );

        let err = channel.write(virt::CONFIG, 0x01).await.unwrap_err();

        assert!(matches!(
            err,
            ProtocolError::Timeout { phase: Phase::AwaitTxReady, attempts: 7 }
        ));
        assert_eq!(sim.status_reads(), 7);
        assert!(sim.writes_to(PhysicalRegister::Write).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_tx_wait_times_out_separately() {
        let sim = SimulatedAs7265x::new();
        let mut channel = VirtualRegisterChannel::new(
            sim.clone(),
            PollBudget::new(4, Duration::from_millis(10)),
        );

        // Sensor accepts the address, then never drains it
        sim.stall_tx_after_next_write();
        let err = channel.write(virt::CONFIG, 0x01).await.unwrap_err();

        assert_eq!(err.phase(), Phase::AwaitTxReady2);
        assert!(err.is_timeout());
        assert_eq!(sim.writes_to(PhysicalRegister::Write), vec![virt::CONFIG.write_frame()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_fault_surfaces_immediately() {
        let sim = SimulatedAs7265x::new();
        sim.fail_register(Some(PhysicalRegister::Write));
        let mut channel = channel(&sim);

        let err = channel.read(virt::HW_VERSION).await.unwrap_err();

        assert!(matches!(
            err,
            ProtocolError::BusFault { phase: Phase::SendAddress, source: HwError::NoAck(_) }
        ));
        assert_eq!(sim.status_reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_fault_is_bus_fault() {
        let sim = SimulatedAs7265x::new();
        sim.fail_register(Some(PhysicalRegister::Status));
        let mut channel = channel(&sim);

        let err = channel.read(virt::HW_VERSION).await.unwrap_err();
        assert!(matches!(err, ProtocolError::BusFault { phase: Phase::AwaitTxReady, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_between_polls() {
        let sim = SimulatedAs7265x::new();
        sim.stall_rx(true);
        let token = CancellationToken::new();
        let mut channel = channel(&sim).with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            time::sleep(Duration::from_millis(350)).await;
            token.cancel();
        });

        let err = channel.read(virt::DEVICE_TYPE).await.unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, ProtocolError::Cancelled { phase: Phase::AwaitRxReady }));
        assert!(sim.status_reads() < 10);
    }

    #[test]
    fn test_default_budget() {
        let budget = PollBudget::default();
        assert_eq!(budget.max_attempts, 50);
        assert_eq!(budget.interval, Duration::from_millis(100));
        assert_eq!(budget.worst_case(), Duration::from_millis(4900));
    }
}
