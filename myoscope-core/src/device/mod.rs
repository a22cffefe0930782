//! Device collaborator interface.
//!
//! The armband SDK is consumed only through [`EmgDevice`]: a source that,
//! once notifications start, invokes a data callback with fixed-size byte
//! packets at an approximately fixed rate. The callback runs on a
//! driver-owned thread and must never block.

pub mod ingest;
#[cfg(feature = "simulator")]
pub mod simulated;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MyoscopeError, Result};

/// Called once per notification with the full packet (header byte included).
pub type DataCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Platform device identifier (a MAC address on Linux, a UUID elsewhere).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress(pub String);

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(value: &str) -> Self {
        Self(value.trim().to_string())
    }
}

/// Raw EMG streaming parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStreamConfig {
    /// Per-channel sample rate (Hz).
    pub sample_rate: u32,
    /// Bit mask of enabled channels.
    pub channel_mask: u8,
    /// Payload bytes per packet, excluding the header byte.
    pub packet_length: usize,
    /// Bits per sample. Only 8 is supported.
    pub resolution_bits: u8,
}

impl Default for RawStreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 500,
            channel_mask: 0xFF,
            packet_length: 128,
            resolution_bits: 8,
        }
    }
}

impl RawStreamConfig {
    pub fn validate(&self) -> Result<()> {
        if self.resolution_bits != 8 {
            return Err(MyoscopeError::InvalidConfig(format!(
                "unsupported resolution {} bits (only 8-bit streams are decoded)",
                self.resolution_bits
            )));
        }
        if self.channel_mask != 0xFF {
            return Err(MyoscopeError::InvalidConfig(
                "all eight channels must be enabled".into(),
            ));
        }
        if self.packet_length == 0 || self.packet_length % crate::features::CHANNEL_COUNT != 0 {
            return Err(MyoscopeError::InvalidConfig(format!(
                "packet length {} is not a multiple of the channel count",
                self.packet_length
            )));
        }
        if self.sample_rate == 0 {
            return Err(MyoscopeError::InvalidConfig("sample rate must be > 0".into()));
        }
        Ok(())
    }
}

/// Notification streams a device can be switched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    EmgRaw,
}

/// Contract for armband drivers.
pub trait EmgDevice: Send + 'static {
    /// Discover devices for up to `timeout`.
    fn scan(&mut self, timeout: Duration) -> Result<Vec<DeviceAddress>>;

    fn connect(&mut self, address: &DeviceAddress) -> Result<()>;

    fn configure_raw_stream(&mut self, config: &RawStreamConfig) -> Result<()>;

    fn set_notification(&mut self, kind: NotificationKind, enabled: bool) -> Result<()>;

    /// Start delivering packets to `on_data`.
    fn start_notification(&mut self, on_data: DataCallback) -> Result<()>;

    /// Stop delivering packets. Returns once the callback will not run again.
    fn stop_notification(&mut self) -> Result<()>;
}

/// Connect with a fixed, bounded number of attempts and no timeout.
pub fn connect_with_retry(
    device: &mut dyn EmgDevice,
    address: &DeviceAddress,
    attempts: u32,
    backoff: Duration,
) -> Result<()> {
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match device.connect(address) {
            Ok(()) => {
                info!(%address, attempt, "device connected");
                return Ok(());
            }
            Err(e) => {
                warn!(%address, attempt, attempts, "connect attempt failed: {e}");
                last_err = Some(e);
                if attempt < attempts {
                    std::thread::sleep(backoff);
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| MyoscopeError::Connect {
        address: address.to_string(),
    }))
}
