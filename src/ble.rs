//! # BLE Link
//!
//! Capability the host provides over its BLE client. Discovery, pairing and
//! the radio stack itself stay on the host side.

use crate::error::Result;

/// Operations the server may request on the BLE client
#[cfg_attr(test, mockall::automock)]
pub trait BleLink {
    /// Write raw bytes to the peripheral's command characteristic
    ///
    /// # Errors
    ///
    /// Returns [`ForwarderError::BleLink`](crate::error::ForwarderError::BleLink)
    /// if the characteristic is unavailable or the write is rejected.
    fn write_command(&mut self, data: &[u8]) -> Result<()>;

    /// Enable or disable the BLE client connection
    fn set_enabled(&mut self, enabled: bool);

    /// Ask the peripheral for a fresh battery reading
    ///
    /// Must not block; the new value arrives later through the battery sensor.
    fn request_battery_refresh(&mut self);
}
