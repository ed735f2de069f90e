//! Hardware abstraction for command stations.
//!
//! A [`DeviceDriver`] turns loco and accessory requests into whatever the
//! connected device understands. The [`HardwareAdapter`] owns exactly one
//! driver at a time and gates every call on the driver being ready.
//!
//! | Implementation | Purpose |
//! |----------------|---------|
//! | [`VirtualDriver`] | No hardware, logs every request |
//! | [`DccExDriver`] | DCC-EX command station over any async byte stream |
//! | [`MockDriver`] | Records calls for tests |
//!
//! [`HardwareAdapter`]: crate::adapter::HardwareAdapter
//! [`VirtualDriver`]: crate::hal::VirtualDriver
//! [`DccExDriver`]: crate::hal::DccExDriver
//! [`MockDriver`]: crate::hal::MockDriver

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layout::{NodeId, TurnoutState};

/// Direction of loco travel.
///
/// # Default
///
/// Defaults to [`Stopped`](Self::Stopped) for safety.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Moving forward.
    Forward,
    /// Moving in reverse.
    Reverse,
    /// Not moving.
    #[default]
    Stopped,
}

impl Direction {
    /// Returns the direction as a lowercase string.
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_trainlink::Direction;
    ///
    /// assert_eq!(Direction::Forward.as_str(), "forward");
    /// assert_eq!(Direction::Reverse.as_str(), "reverse");
    /// assert_eq!(Direction::Stopped.as_str(), "stopped");
    /// ```
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
            Direction::Stopped => "stopped",
        }
    }

    /// Parse direction from text input.
    ///
    /// Accepts full names and the script opcodes, trimmed and case-insensitive.
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_trainlink::Direction;
    ///
    /// assert_eq!(Direction::from_text("forward"), Some(Direction::Forward));
    /// assert_eq!(Direction::from_text("  FWD "), Some(Direction::Forward));
    /// assert_eq!(Direction::from_text("rev"), Some(Direction::Reverse));
    /// assert_eq!(Direction::from_text("stop"), Some(Direction::Stopped));
    /// assert_eq!(Direction::from_text("sideways"), None);
    /// ```
    pub fn from_text(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" | "fwd" => Some(Direction::Forward),
            "reverse" | "rev" => Some(Direction::Reverse),
            "stopped" | "stop" => Some(Direction::Stopped),
            _ => None,
        }
    }

    /// Direction code used on the wire: forward 1, reverse 0, stopped -1.
    #[inline]
    pub const fn hardware_code(&self) -> i8 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => 0,
            Direction::Stopped => -1,
        }
    }

    /// Forward and reverse swap; stopped stays stopped.
    pub const fn toggled(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
            Direction::Stopped => Direction::Stopped,
        }
    }
}

/// Errors reported by device drivers.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The underlying stream failed.
    #[error("Device I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The device never announced itself.
    #[error("No response from device after {0}ms")]
    HandshakeTimeout(u64),
    /// The device hung up.
    #[error("Device connection closed")]
    Closed,
    /// The adapter has no working driver.
    #[error("Hardware adapter unavailable")]
    Unavailable,
}

/// A command station driver.
///
/// Implementations must be cheap to call concurrently; the adapter holds the
/// driver behind an `Arc` and calls it from many tasks.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Driver name as listed by [`available_drivers`](crate::adapter::HardwareAdapter::available_drivers).
    fn name(&self) -> &str;

    /// Human-readable status, for example the device's banner.
    fn message(&self) -> String;

    /// Sets a loco's speed (0-126) and direction.
    async fn set_speed(&self, address: u16, speed: u8, direction: Direction)
        -> Result<(), DriverError>;

    /// Emergency-stops one loco.
    async fn emergency_stop(&self, address: u16) -> Result<(), DriverError>;

    /// Switches track power.
    async fn set_track_power(&self, on: bool) -> Result<(), DriverError>;

    /// Sets an accessory turnout.
    async fn set_turnout(&self, id: NodeId, state: TurnoutState) -> Result<(), DriverError>;

    /// Sets a loco function (0-28).
    async fn set_function(&self, address: u16, function: u8, on: bool)
        -> Result<(), DriverError>;

    /// Releases the device.
    async fn close(&self) -> Result<(), DriverError>;
}
