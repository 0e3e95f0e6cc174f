//! In-memory AS7265x for tests and dry runs.
//!
//! Models the slave side of the handshake: the TX/RX flags, the write-bit
//! framing, the die multiplexer, and the firmware-version query. Handles are
//! cheap clones of shared state, so a test can keep one to inspect the bus
//! traffic while the probe owns another.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use super::registers::{virt, DeviceId, PhysicalRegister, VirtualAddress, SLAVE_ADDRESS, WRITE_BIT};
use super::status::StatusBits;
use crate::hw_trait::{ByteBus, GpioPin, HwError, PinValue, Result};
use crate::tracing::prelude::*;

/// Registers that follow DEV_SELECT_CONTROL.
const DIE_REGISTERS: [VirtualAddress; 2] = [virt::DEVICE_TEMP, virt::LED_CONFIG];

/// One physical register access as seen by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    Read { register: u8, value: u8 },
    Write { register: u8, value: u8 },
}

struct SimState {
    shared: [u8; 0x80],
    dies: [[u8; 0x80]; 3],
    firmware: [u8; 3],
    fw_query: u8,
    selected: DeviceId,
    /// Address of a write whose payload has not arrived yet
    pending_write: Option<u8>,
    rx_latch: Option<u8>,
    last_read: u8,
    /// STATUS polls that report TX busy after each WRITE
    busy_polls: u32,
    busy_remaining: u32,
    stall_tx: bool,
    stall_tx_armed: bool,
    stall_rx: bool,
    failing: Option<PhysicalRegister>,
    in_reset: bool,
    status_reads: u32,
    overruns: u32,
    underruns: u32,
    log: Vec<BusOp>,
}

impl SimState {
    fn new() -> Self {
        let mut shared = [0u8; 0x80];
        shared[virt::DEVICE_TYPE.get() as usize] = 0x40;
        shared[virt::HW_VERSION.get() as usize] = 0x41;
        shared[virt::INTEGRATION_TIME.get() as usize] = 0xFF;

        let mut dies = [[0u8; 0x80]; 3];
        for (die, temp) in dies.iter_mut().zip([28, 29, 27]) {
            die[virt::DEVICE_TEMP.get() as usize] = temp;
        }

        Self {
            shared,
            dies,
            firmware: [12, 0, 0],
            fw_query: 0,
            selected: DeviceId::Nir,
            pending_write: None,
            rx_latch: None,
            last_read: 0,
            busy_polls: 0,
            busy_remaining: 0,
            stall_tx: false,
            stall_tx_armed: false,
            stall_rx: false,
            failing: None,
            in_reset: false,
            status_reads: 0,
            overruns: 0,
            underruns: 0,
            log: Vec::new(),
        }
    }

    fn check_access(&self, register: u8) -> Result<PhysicalRegister> {
        let physical = PhysicalRegister::from_addr(register).ok_or_else(|| {
            HwError::InvalidParameter(format!("no physical register 0x{:02X}", register))
        })?;
        if self.in_reset || self.failing == Some(physical) {
            return Err(HwError::NoAck(SLAVE_ADDRESS));
        }
        Ok(physical)
    }

    fn read(&mut self, register: u8) -> Result<u8> {
        let value = match self.check_access(register)? {
            PhysicalRegister::Status => self.status(),
            PhysicalRegister::Read => match self.rx_latch.take() {
                Some(value) => {
                    self.last_read = value;
                    value
                }
                None => {
                    self.underruns += 1;
                    self.last_read
                }
            },
            PhysicalRegister::Write => 0,
        };
        self.log.push(BusOp::Read { register, value });
        Ok(value)
    }

    fn write(&mut self, register: u8, value: u8) -> Result<()> {
        match self.check_access(register)? {
            PhysicalRegister::Write => self.accept(value),
            other => debug!("Simulator ignoring write to {}", other),
        }
        self.log.push(BusOp::Write { register, value });
        Ok(())
    }

    fn status(&mut self) -> u8 {
        self.status_reads += 1;

        let mut bits = StatusBits::empty();
        if self.stall_tx || self.busy_remaining > 0 {
            bits |= StatusBits::TX_VALID;
        } else if self.rx_latch.is_some() && !self.stall_rx {
            bits |= StatusBits::RX_VALID;
        }
        self.busy_remaining = self.busy_remaining.saturating_sub(1);
        bits.bits()
    }

    fn accept(&mut self, byte: u8) {
        if self.stall_tx || self.busy_remaining > 0 {
            self.overruns += 1;
        }

        match self.pending_write.take() {
            Some(addr) => self.store(addr, byte),
            None if byte & WRITE_BIT != 0 => self.pending_write = Some(byte & !WRITE_BIT),
            None => self.rx_latch = Some(self.load(byte)),
        }

        self.busy_remaining = self.busy_polls;
        if self.stall_tx_armed {
            self.stall_tx_armed = false;
            self.stall_tx = true;
        }
    }

    fn die_index(&self) -> usize {
        self.selected.code() as usize
    }

    fn store(&mut self, addr: u8, value: u8) {
        let vaddr = VirtualAddress::new(addr).unwrap_or(virt::DEVICE_TYPE);
        match vaddr {
            virt::DEV_SELECT_CONTROL => {
                if let Some(device) = DeviceId::from_code(value) {
                    self.selected = device;
                }
            }
            virt::FW_VERSION_HIGH | virt::FW_VERSION_LOW => self.fw_query = value,
            _ => {}
        }

        if DIE_REGISTERS.contains(&vaddr) {
            let die = self.die_index();
            self.dies[die][addr as usize] = value;
        } else {
            self.shared[addr as usize] = value;
        }
    }

    fn load(&self, addr: u8) -> u8 {
        let vaddr = VirtualAddress::new(addr).unwrap_or(virt::DEVICE_TYPE);
        if vaddr == virt::FW_VERSION_LOW && (1..=3).contains(&self.fw_query) {
            return self.firmware[self.fw_query as usize - 1];
        }
        if DIE_REGISTERS.contains(&vaddr) {
            self.dies[self.die_index()][addr as usize]
        } else {
            self.shared[addr as usize]
        }
    }

    /// Clear the handshake state; register contents survive.
    fn restart(&mut self) {
        self.selected = DeviceId::Nir;
        self.pending_write = None;
        self.rx_latch = None;
        self.busy_remaining = 0;
        self.fw_query = 0;
    }
}

/// Simulated AS7265x triad.
#[derive(Clone)]
pub struct SimulatedAs7265x {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedAs7265x {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAs7265x {
    /// A healthy sensor with identity 0x40/0x41 and room-temperature dies.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new())),
        }
    }

    /// Reset line that holds the sensor off the bus while low.
    pub fn reset_pin(&self) -> SimulatedResetPin {
        SimulatedResetPin { sim: self.clone() }
    }

    pub fn set_register(&self, addr: VirtualAddress, value: u8) {
        self.state.lock().shared[addr.get() as usize] = value;
    }

    pub fn register(&self, addr: VirtualAddress) -> u8 {
        self.state.lock().shared[addr.get() as usize]
    }

    pub fn set_die_register(&self, device: DeviceId, addr: VirtualAddress, value: u8) {
        self.state.lock().dies[device.code() as usize][addr.get() as usize] = value;
    }

    pub fn set_temperature(&self, device: DeviceId, celsius: u8) {
        self.set_die_register(device, virt::DEVICE_TEMP, celsius);
    }

    pub fn set_firmware(&self, major: u8, patch: u8, build: u8) {
        self.state.lock().firmware = [major, patch, build];
    }

    /// Report TX busy for `polls` STATUS reads after every WRITE.
    pub fn set_busy_polls(&self, polls: u32) {
        self.state.lock().busy_polls = polls;
    }

    /// Keep TX busy forever.
    pub fn stall_tx(&self, stalled: bool) {
        self.state.lock().stall_tx = stalled;
    }

    /// Accept the next WRITE, then keep TX busy forever.
    pub fn stall_tx_after_next_write(&self) {
        self.state.lock().stall_tx_armed = true;
    }

    /// Never raise RX_VALID.
    pub fn stall_rx(&self, stalled: bool) {
        self.state.lock().stall_rx = stalled;
    }

    /// NACK every access to `register`.
    pub fn fail_register(&self, register: Option<PhysicalRegister>) {
        self.state.lock().failing = register;
    }

    pub fn selected(&self) -> DeviceId {
        self.state.lock().selected
    }

    pub fn in_reset(&self) -> bool {
        self.state.lock().in_reset
    }

    pub fn status_reads(&self) -> u32 {
        self.state.lock().status_reads
    }

    /// WRITE accesses made while TX was still busy.
    pub fn overruns(&self) -> u32 {
        self.state.lock().overruns
    }

    /// READ accesses made without RX_VALID.
    pub fn underruns(&self) -> u32 {
        self.state.lock().underruns
    }

    pub fn log(&self) -> Vec<BusOp> {
        self.state.lock().log.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.log.clear();
        state.status_reads = 0;
    }

    /// Bytes written to one physical register, in order.
    pub fn writes_to(&self, register: PhysicalRegister) -> Vec<u8> {
        self.log()
            .into_iter()
            .filter_map(|op| match op {
                BusOp::Write { register: r, value } if r == register.addr() => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Bytes read from one physical register, in order.
    pub fn reads_from(&self, register: PhysicalRegister) -> Vec<u8> {
        self.log()
            .into_iter()
            .filter_map(|op| match op {
                BusOp::Read { register: r, value } if r == register.addr() => Some(value),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ByteBus for SimulatedAs7265x {
    async fn read_byte(&mut self, register: u8) -> Result<u8> {
        self.state.lock().read(register)
    }

    async fn write_byte(&mut self, register: u8, value: u8) -> Result<()> {
        self.state.lock().write(register, value)
    }
}

/// RST line of a [`SimulatedAs7265x`].
pub struct SimulatedResetPin {
    sim: SimulatedAs7265x,
}

#[async_trait]
impl GpioPin for SimulatedResetPin {
    async fn write(&mut self, value: PinValue) -> Result<()> {
        let mut state = self.sim.state.lock();
        match value {
            PinValue::Low => state.in_reset = true,
            PinValue::High => {
                state.in_reset = false;
                state.restart();
            }
        }
        Ok(())
    }
}
