//! Die multiplexing for die-specific virtual registers.

use super::channel::{ProtocolError, VirtualRegisterChannel};
use super::registers::{virt, DeviceId, VirtualAddress};
use crate::hw_trait::ByteBus;
use crate::tracing::prelude::*;

/// Routes die-specific reads to one of the three sensor dies.
///
/// Selection persists on the sensor until the next `select`; reads do not
/// disturb it. After `select` returns, the analog front end still needs a
/// settle delay (about 200ms) before die-specific values can be trusted.
/// Waiting out that delay is the caller's job, so the selector itself never
/// sleeps.
pub struct DeviceSelector<B> {
    channel: VirtualRegisterChannel<B>,
    selected: Option<DeviceId>,
}

impl<B: ByteBus> DeviceSelector<B> {
    pub fn new(channel: VirtualRegisterChannel<B>) -> Self {
        Self {
            channel,
            selected: None,
        }
    }

    /// Switch the active die.
    pub async fn select(&mut self, device: DeviceId) -> Result<(), ProtocolError> {
        // A failed write leaves the multiplexer in an unknown position
        self.selected = None;
        self.channel
            .write(virt::DEV_SELECT_CONTROL, device.code())
            .await?;
        self.selected = Some(device);
        debug!("Selected {} die", device);
        Ok(())
    }

    /// Die named by the last successful `select`, if any.
    pub fn selected(&self) -> Option<DeviceId> {
        self.selected
    }

    /// Read a die-specific register of the selected die.
    pub async fn read(&mut self, addr: VirtualAddress) -> Result<u8, ProtocolError> {
        self.channel.read(addr).await
    }

    /// Temperature of the selected die in °C.
    pub async fn read_temperature(&mut self) -> Result<u8, ProtocolError> {
        self.read(virt::DEVICE_TEMP).await
    }

    pub fn channel_mut(&mut self) -> &mut VirtualRegisterChannel<B> {
        &mut self.channel
    }

    pub fn into_channel(self) -> VirtualRegisterChannel<B> {
        self.channel
    }
}
