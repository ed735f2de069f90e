//! Hardware Abstraction Layer implementations.
//!
//! This module contains the concrete [`DeviceDriver`](crate::traits::DeviceDriver)
//! implementations and the test doubles.
//!
//! # Available Implementations
//!
//! - `virtual_driver`: No device, logs requests
//! - `dccex`: DCC-EX command station over serial-style byte streams or TCP
//! - `mock`: Recording driver and broadcaster for tests

pub mod dccex;
pub mod mock;
pub mod virtual_driver;

pub use dccex::{DccExDriver, PacketReader, DCC_EX_DRIVER_NAME, DCC_EX_PORT};
pub use mock::*;
pub use virtual_driver::{VirtualDriver, VIRTUAL_DRIVER_NAME};
