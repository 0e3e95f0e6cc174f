//! Byte-wide register access to a single I2C slave.

use super::Result;
use async_trait::async_trait;

/// Register-level access to one fixed slave device.
///
/// The slave address is bound when the backend is constructed; callers only
/// name the physical register. Each call is one complete bus transaction.
#[async_trait]
pub trait ByteBus: Send {
    /// Read one byte from a physical register.
    async fn read_byte(&mut self, register: u8) -> Result<u8>;

    /// Write one byte to a physical register.
    async fn write_byte(&mut self, register: u8, value: u8) -> Result<()>;
}

#[async_trait]
impl<B: ByteBus + ?Sized> ByteBus for Box<B> {
    async fn read_byte(&mut self, register: u8) -> Result<u8> {
        (**self).read_byte(register).await
    }

    async fn write_byte(&mut self, register: u8, value: u8) -> Result<()> {
        (**self).write_byte(register, value).await
    }
}
