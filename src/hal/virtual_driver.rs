//! A driver with no device behind it.
//!
//! Every request is logged and succeeds. This is the adapter's starting
//! driver and its fallback whenever a real device cannot be selected.

use async_trait::async_trait;
use tracing::info;

use crate::layout::{NodeId, TurnoutState};
use crate::traits::{DeviceDriver, Direction, DriverError};

/// Name the virtual driver is selected by.
pub const VIRTUAL_DRIVER_NAME: &str = "Virtual";

/// Logs requests instead of sending them anywhere.
#[derive(Clone, Copy, Debug, Default)]
pub struct VirtualDriver;

impl VirtualDriver {
    /// Creates the driver.
    pub fn new() -> Self {
        VirtualDriver
    }
}

#[async_trait]
impl DeviceDriver for VirtualDriver {
    fn name(&self) -> &str {
        VIRTUAL_DRIVER_NAME
    }

    fn message(&self) -> String {
        "Virtual driver ready".to_string()
    }

    async fn set_speed(
        &self,
        address: u16,
        speed: u8,
        direction: Direction,
    ) -> Result<(), DriverError> {
        info!(
            "SetSpeed => {} - {} - {}",
            address,
            speed,
            direction.hardware_code()
        );
        Ok(())
    }

    async fn emergency_stop(&self, address: u16) -> Result<(), DriverError> {
        info!("EStop => {}", address);
        Ok(())
    }

    async fn set_track_power(&self, on: bool) -> Result<(), DriverError> {
        info!("TrackPower => {}", on);
        Ok(())
    }

    async fn set_turnout(&self, id: NodeId, state: TurnoutState) -> Result<(), DriverError> {
        info!("SetTurnout => {} - {}", id, state.hardware_code());
        Ok(())
    }

    async fn set_function(&self, address: u16, function: u8, on: bool) -> Result<(), DriverError> {
        info!("SetFunction => {} - {} - {}", address, function, on);
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        info!("Virtual driver closing");
        Ok(())
    }
}
