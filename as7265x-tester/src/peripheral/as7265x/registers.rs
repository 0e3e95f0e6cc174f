//! AS7265x register map.
//!
//! The slave interface exposes three physical registers. Everything else
//! lives behind them as virtual registers, addressed with a 7-bit number.
//!
//! Datasheet: <https://ams.com/documents/20143/36005/AS7265x_DS000612_1-00.pdf>

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumIter};
use thiserror::Error;

/// 7-bit I2C slave address of the AS7265x master die.
pub const SLAVE_ADDRESS: u8 = 0x49;

/// Bit 7 of the address byte marks a virtual-register write.
pub const WRITE_BIT: u8 = 0x80;

/// Directly addressable registers of the slave interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum PhysicalRegister {
    /// TX/RX handshake flags
    #[strum(to_string = "STATUS")]
    Status = 0x00,
    /// Host-to-sensor data (framed address, then payload)
    #[strum(to_string = "WRITE")]
    Write = 0x01,
    /// Sensor-to-host data
    #[strum(to_string = "READ")]
    Read = 0x02,
}

impl PhysicalRegister {
    pub const fn addr(self) -> u8 {
        self as u8
    }

    pub fn from_addr(addr: u8) -> Option<Self> {
        match addr {
            0x00 => Some(Self::Status),
            0x01 => Some(Self::Write),
            0x02 => Some(Self::Read),
            _ => None,
        }
    }
}

/// Rejected attempt to build a virtual address with the write bit set.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("virtual address 0x{0:02X} overlaps the write indicator bit")]
pub struct InvalidVirtualAddress(pub u8);

/// Logical register number in `0x00..=0x7F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "u8")]
pub struct VirtualAddress(u8);

impl VirtualAddress {
    pub const fn new(addr: u8) -> Result<Self, InvalidVirtualAddress> {
        if addr & WRITE_BIT != 0 {
            Err(InvalidVirtualAddress(addr))
        } else {
            Ok(Self(addr))
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// Byte placed on WRITE to request a read of this register.
    pub const fn read_frame(self) -> u8 {
        self.0
    }

    /// Byte placed on WRITE to announce a write to this register.
    pub const fn write_frame(self) -> u8 {
        self.0 | WRITE_BIT
    }

    /// Datasheet name for the registers this crate knows about.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            virt::DEVICE_TYPE => "DEVICE_TYPE",
            virt::HW_VERSION => "HW_VERSION",
            virt::FW_VERSION_HIGH => "FW_VERSION_HIGH",
            virt::FW_VERSION_LOW => "FW_VERSION_LOW",
            virt::CONFIG => "CONFIG",
            virt::INTEGRATION_TIME => "INTEGRATION_TIME",
            virt::DEVICE_TEMP => "DEVICE_TEMP",
            virt::LED_CONFIG => "LED_CONFIG",
            virt::DEV_SELECT_CONTROL => "DEV_SELECT_CONTROL",
            _ => return None,
        };
        Some(name)
    }
}

impl TryFrom<u8> for VirtualAddress {
    type Error = InvalidVirtualAddress;

    fn try_from(addr: u8) -> Result<Self, Self::Error> {
        Self::new(addr)
    }
}

impl From<VirtualAddress> for u8 {
    fn from(addr: VirtualAddress) -> u8 {
        addr.0
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:02X})", name, self.0),
            None => write!(f, "0x{:02X}", self.0),
        }
    }
}

/// Virtual register addresses
pub mod virt {
    use super::VirtualAddress;

    pub const DEVICE_TYPE: VirtualAddress = VirtualAddress(0x00);
    pub const HW_VERSION: VirtualAddress = VirtualAddress(0x01);
    pub const FW_VERSION_HIGH: VirtualAddress = VirtualAddress(0x02);
    pub const FW_VERSION_LOW: VirtualAddress = VirtualAddress(0x03);
    pub const CONFIG: VirtualAddress = VirtualAddress(0x04);
    pub const INTEGRATION_TIME: VirtualAddress = VirtualAddress(0x05);
    /// Die temperature in °C; follows DEV_SELECT_CONTROL
    pub const DEVICE_TEMP: VirtualAddress = VirtualAddress(0x06);
    pub const LED_CONFIG: VirtualAddress = VirtualAddress(0x07);
    /// Die multiplexer for die-specific registers
    pub const DEV_SELECT_CONTROL: VirtualAddress = VirtualAddress(0x4F);
}

/// Identity values every genuine AS7265x master reports.
pub mod identity {
    pub const DEVICE_TYPE: u8 = 0x40;
    pub const HW_VERSION: u8 = 0x41;
}

/// One of the three sensor dies behind the master's address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceId {
    /// AS72651, the master die (610-860nm)
    #[strum(to_string = "NIR")]
    Nir,
    /// AS72652 (560-940nm)
    #[strum(to_string = "VISIBLE")]
    Visible,
    /// AS72653 (410-535nm)
    #[strum(to_string = "UV")]
    Uv,
}

impl DeviceId {
    /// Selector code written to DEV_SELECT_CONTROL.
    pub const fn code(self) -> u8 {
        match self {
            DeviceId::Nir => 0x00,
            DeviceId::Visible => 0x01,
            DeviceId::Uv => 0x02,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(DeviceId::Nir),
            0x01 => Some(DeviceId::Visible),
            0x02 => Some(DeviceId::Uv),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_virtual_address_rejects_write_bit() {
        assert_eq!(VirtualAddress::new(0x7F).map(VirtualAddress::get), Ok(0x7F));
        assert_eq!(VirtualAddress::new(0x80), Err(InvalidVirtualAddress(0x80)));
        assert!(VirtualAddress::try_from(0xC5).is_err());
    }

    #[test]
    fn test_frames() {
        for raw in 0..=0x7F {
            let addr = VirtualAddress::new(raw).unwrap();
            assert_eq!(addr.read_frame(), raw);
            assert_eq!(addr.write_frame(), raw | 0x80);
        }
    }

    #[test]
    fn test_device_codes_round_trip() {
        for device in DeviceId::iter() {
            assert_eq!(DeviceId::from_code(device.code()), Some(device));
        }
        assert_eq!(DeviceId::from_code(0x03), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(virt::DEVICE_TEMP.to_string(), "DEVICE_TEMP (0x06)");
        assert_eq!(VirtualAddress::new(0x30).unwrap().to_string(), "0x30");
        assert_eq!(DeviceId::Visible.to_string(), "VISIBLE");
        assert_eq!(PhysicalRegister::Write.to_string(), "WRITE");
    }
}
