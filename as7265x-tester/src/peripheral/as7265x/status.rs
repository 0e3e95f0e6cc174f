//! STATUS register decoding.

use bitflags::bitflags;

bitflags! {
    /// Raw bits of the STATUS physical register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusBits: u8 {
        /// Bit 0: a byte is waiting in READ
        const RX_VALID = 0x01;
        /// Bit 1: WRITE still holds a byte the sensor has not consumed
        const TX_VALID = 0x02;
    }
}

/// Handshake state decoded from one STATUS sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags {
    pub tx_busy: bool,
    pub rx_ready: bool,
}

pub struct StatusDecoder;

impl StatusDecoder {
    /// Interpret a raw STATUS byte. Bits 2-7 are reserved and ignored.
    pub fn decode(raw: u8) -> StatusFlags {
        let bits = StatusBits::from_bits_truncate(raw);
        StatusFlags {
            tx_busy: bits.contains(StatusBits::TX_VALID),
            rx_ready: bits.contains(StatusBits::RX_VALID),
        }
    }

    /// Describe a STATUS byte for log output
    pub fn describe(raw: u8) -> Vec<&'static str> {
        let flags = Self::decode(raw);
        let mut desc = Vec::new();
        if flags.tx_busy { desc.push("TX busy"); }
        if flags.rx_ready { desc.push("RX ready"); }
        if desc.is_empty() { desc.push("idle"); }
        desc
    }
}
