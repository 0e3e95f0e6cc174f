//! Direct register access through the Linux `i2c-dev` character device.

use async_trait::async_trait;
use nix::errno::Errno;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::HwId;
use crate::hw_trait::{ByteBus, HwError, Result};
use crate::tracing::prelude::*;

// I2C_SLAVE from <linux/i2c-dev.h>
nix::ioctl_write_int_bad!(i2c_set_slave, 0x0703);

/// One slave on a `/dev/i2c-N` adapter.
///
/// The kernel calls block, so each transaction runs on the blocking pool.
pub struct LinuxI2c {
    file: Arc<Mutex<File>>,
    address: u8,
}

impl LinuxI2c {
    /// Device node for a configured bus: a number maps to `/dev/i2c-N`, a
    /// name to `/dev/<name>`, and an absolute path is used as given.
    pub fn device_path(bus: &HwId) -> PathBuf {
        match bus {
            HwId::Number(n) => PathBuf::from(format!("/dev/i2c-{}", n)),
            HwId::Name(name) if name.starts_with('/') => PathBuf::from(name),
            HwId::Name(name) => PathBuf::from(format!("/dev/{}", name)),
        }
    }

    pub fn open(bus: &HwId, address: u8) -> Result<Self> {
        let path = Self::device_path(bus);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        // SAFETY: the fd is owned by `file` and stays open for the call.
        unsafe { i2c_set_slave(file.as_raw_fd(), address as i32) }
            .map_err(|e| HwError::Io(io::Error::from(e)))?;

        debug!("Opened {} for slave 0x{:02x}", path.display(), address);
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            address,
        })
    }

    async fn transact<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut File) -> io::Result<T> + Send + 'static,
    {
        let file = self.file.clone();
        let address = self.address;
        let result = tokio::task::spawn_blocking(move || {
            let mut file = file.lock();
            op(&mut *file)
        })
        .await
        .map_err(|e| HwError::Other(format!("i2c worker failed: {}", e)))?;

        result.map_err(|e| match e.raw_os_error() {
            Some(code) if code == Errno::ENXIO as i32 || code == Errno::EREMOTEIO as i32 => {
                HwError::NoAck(address)
            }
            _ => HwError::Io(e),
        })
    }
}

#[async_trait]
impl ByteBus for LinuxI2c {
    async fn read_byte(&mut self, register: u8) -> Result<u8> {
        let value = self
            .transact(move |file| {
                file.write_all(&[register])?;
                let mut buf = [0u8; 1];
                file.read_exact(&mut buf)?;
                Ok(buf[0])
            })
            .await?;
        trace!("i2c rd 0x{:02x} -> 0x{:02x}", register, value);
        Ok(value)
    }

    async fn write_byte(&mut self, register: u8, value: u8) -> Result<()> {
        trace!("i2c wr 0x{:02x} <- 0x{:02x}", register, value);
        self.transact(move |file| file.write_all(&[register, value]))
            .await
    }
}
