//! Hardware adapter: one active driver and a small readiness state machine.
//!
//! ```text
//!            select_device()             driver ready
//! Available ─────────────────► Switching ─────────────► Available
//!                                  │
//!                                  │ handshake failed
//!                                  ▼
//!                             Unavailable ── select_device() ──► Switching
//! ```
//!
//! Loco and turnout requests wait while the adapter is `Switching`, so
//! nothing is sent to a device halfway through a switchover. Requests made
//! while `Unavailable` fail immediately with [`DriverError::Unavailable`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_trainlink::adapter::{DriverStatus, HardwareAdapter};
//! use rs_trainlink::traits::NullBroadcast;
//!
//! let adapter = HardwareAdapter::new(Arc::new(NullBroadcast));
//! assert_eq!(adapter.status(), DriverStatus::Available);
//! assert_eq!(adapter.device().name, "Virtual Device");
//! assert_eq!(HardwareAdapter::available_drivers(), ["Virtual", "DCC-EX"]);
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::hal::{DccExDriver, VirtualDriver, DCC_EX_DRIVER_NAME, VIRTUAL_DRIVER_NAME};
use crate::layout::{NodeId, TurnoutState};
use crate::lock::lock;
use crate::traits::{ClientBroadcast, ClientEvent, DeviceDriver, Direction, DriverError};

/// Default time a device gets to announce itself.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Readiness of the active driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverStatus {
    /// Requests are sent straight away.
    Available,
    /// A new driver is being brought up; requests wait.
    Switching,
    /// The last switchover failed; requests fail.
    Unavailable,
}

/// A device an operator can select.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareDevice {
    /// Display name.
    pub name: String,
    /// Driver used to talk to it.
    pub driver: String,
    /// Where it is reached (`host:port` for network stations).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl HardwareDevice {
    /// The built-in device with no hardware behind it.
    pub fn virtual_device() -> Self {
        Self {
            name: "Virtual Device".to_string(),
            driver: VIRTUAL_DRIVER_NAME.to_string(),
            address: None,
        }
    }

    /// A DCC-EX station reachable at `address`.
    pub fn dcc_ex(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: DCC_EX_DRIVER_NAME.to_string(),
            address: Some(address.into()),
        }
    }
}

/// What clients are told about the adapter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterSnapshot {
    /// Active driver name.
    pub driver: String,
    /// Active device.
    pub device: HardwareDevice,
    /// Readiness.
    pub status: DriverStatus,
    /// Driver status text or the last failure.
    pub message: String,
}

struct ActiveDriver {
    driver: Arc<dyn DeviceDriver>,
    device: HardwareDevice,
    message: String,
    generation: u64,
}

/// Owns the active [`DeviceDriver`] and gates requests on its readiness.
pub struct HardwareAdapter {
    active: Mutex<ActiveDriver>,
    status: watch::Sender<DriverStatus>,
    broadcaster: Arc<dyn ClientBroadcast>,
    devices: Vec<HardwareDevice>,
    handshake_timeout: Duration,
}

impl HardwareAdapter {
    /// Creates an adapter running the virtual driver.
    pub fn new(broadcaster: Arc<dyn ClientBroadcast>) -> Self {
        Self::with_driver(
            Arc::new(VirtualDriver::new()),
            HardwareDevice::virtual_device(),
            broadcaster,
        )
    }

    /// Creates an adapter with an already-ready driver.
    pub fn with_driver(
        driver: Arc<dyn DeviceDriver>,
        device: HardwareDevice,
        broadcaster: Arc<dyn ClientBroadcast>,
    ) -> Self {
        let message = driver.message();
        let (status, _) = watch::channel(DriverStatus::Available);
        Self {
            active: Mutex::new(ActiveDriver {
                driver,
                device,
                message,
                generation: 0,
            }),
            status,
            broadcaster,
            devices: Vec::new(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Adds selectable devices besides the virtual one.
    pub fn with_devices(mut self, devices: Vec<HardwareDevice>) -> Self {
        self.devices = devices;
        self
    }

    /// Sets how long a device gets to finish its handshake.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Drivers that can be selected.
    pub const fn available_drivers() -> [&'static str; 2] {
        [VIRTUAL_DRIVER_NAME, DCC_EX_DRIVER_NAME]
    }

    /// Devices that can be selected, the virtual device first.
    pub fn available_devices(&self) -> Vec<HardwareDevice> {
        let mut devices = vec![HardwareDevice::virtual_device()];
        devices.extend(self.devices.iter().cloned());
        devices
    }

    /// Current readiness.
    pub fn status(&self) -> DriverStatus {
        *self.status.borrow()
    }

    /// Active device.
    pub fn device(&self) -> HardwareDevice {
        lock(&self.active).device.clone()
    }

    /// Driver, device, status and message in one.
    pub fn snapshot(&self) -> AdapterSnapshot {
        let active = lock(&self.active);
        AdapterSnapshot {
            driver: active.driver.name().to_string(),
            device: active.device.clone(),
            status: self.status(),
            message: active.message.clone(),
        }
    }

    // ========================================================================
    // Switching
    // ========================================================================

    /// Selects a driver by name.
    ///
    /// `"DCC-EX"` with an address connects over TCP; anything else, or no
    /// address, selects the virtual driver.
    pub async fn select_driver(self: &Arc<Self>, name: &str, address: Option<&str>) {
        let device = match (name, address) {
            (DCC_EX_DRIVER_NAME, Some(address)) => HardwareDevice::dcc_ex(address, address),
            (VIRTUAL_DRIVER_NAME, _) | (DCC_EX_DRIVER_NAME, None) => HardwareDevice::virtual_device(),
            (other, _) => {
                warn!(driver = other, "Unknown driver, using the virtual driver");
                HardwareDevice::virtual_device()
            }
        };
        self.select_device(device).await;
    }

    /// Switches to `device`.
    ///
    /// The previous driver is closed first. Network devices finish their
    /// handshake in the background; until then the adapter reports
    /// `Switching`.
    pub async fn select_device(self: &Arc<Self>, device: HardwareDevice) {
        match (device.driver.as_str(), device.address.clone()) {
            (DCC_EX_DRIVER_NAME, Some(address)) => {
                let timeout = self.handshake_timeout;
                self.switch_to(device, async move {
                    let driver = DccExDriver::connect_tcp(&address, timeout).await?;
                    Ok(Arc::new(driver) as Arc<dyn DeviceDriver>)
                })
                .await;
            }
            _ => {
                self.switch_to(HardwareDevice::virtual_device(), async {
                    Ok(Arc::new(VirtualDriver::new()) as Arc<dyn DeviceDriver>)
                })
                .await;
            }
        }
    }

    /// Closes the active driver, enters `Switching`, and installs whatever
    /// `connect` produces once it completes.
    ///
    /// If another switch starts before `connect` finishes, its result is
    /// discarded.
    pub async fn switch_to<F>(self: &Arc<Self>, device: HardwareDevice, connect: F)
    where
        F: Future<Output = Result<Arc<dyn DeviceDriver>, DriverError>> + Send + 'static,
    {
        let (previous, generation) = {
            let mut active = lock(&self.active);
            active.generation += 1;
            active.message = format!("Connecting to {}", device.name);
            (Arc::clone(&active.driver), active.generation)
        };
        self.status.send_replace(DriverStatus::Switching);
        info!(device = %device.name, driver = %device.driver, "Switching driver");

        if let Err(err) = previous.close().await {
            warn!(error = %err, "Closing the previous driver failed");
        }

        let adapter = Arc::clone(self);
        tokio::spawn(async move {
            match connect.await {
                Ok(driver) => adapter.install(generation, driver, device).await,
                Err(err) => adapter.fail(generation, &device, err),
            }
        });
    }

    async fn install(&self, generation: u64, driver: Arc<dyn DeviceDriver>, device: HardwareDevice) {
        let stale = {
            let mut active = lock(&self.active);
            if active.generation == generation {
                active.message = driver.message();
                active.driver = Arc::clone(&driver);
                active.device = device;
                false
            } else {
                true
            }
        };
        if stale {
            // A newer switch owns the adapter now.
            if let Err(err) = driver.close().await {
                warn!(error = %err, "Closing a superseded driver failed");
            }
            return;
        }
        self.status.send_replace(DriverStatus::Available);
        info!(driver = driver.name(), "Driver available");
        self.broadcaster
            .broadcast(ClientEvent::ActiveDevice(self.snapshot()));
    }

    fn fail(&self, generation: u64, device: &HardwareDevice, err: DriverError) {
        {
            let mut active = lock(&self.active);
            if active.generation != generation {
                return;
            }
            active.message = err.to_string();
        }
        error!(device = %device.name, error = %err, "Driver switchover failed");
        self.status.send_replace(DriverStatus::Unavailable);
        self.broadcaster
            .broadcast(ClientEvent::ActiveDevice(self.snapshot()));
    }

    /// Waits out a switchover and returns the driver to use.
    async fn ready_driver(&self) -> Result<Arc<dyn DeviceDriver>, DriverError> {
        let mut rx = self.status.subscribe();
        let status = match rx.wait_for(|s| *s != DriverStatus::Switching).await {
            Ok(status) => *status,
            Err(_) => return Err(DriverError::Unavailable),
        };
        if status == DriverStatus::Unavailable {
            return Err(DriverError::Unavailable);
        }
        Ok(Arc::clone(&lock(&self.active).driver))
    }

    // ========================================================================
    // Hardware Requests
    // ========================================================================

    /// Sends a loco speed and direction.
    pub async fn loco_set_speed(
        &self,
        address: u16,
        speed: u8,
        direction: Direction,
    ) -> Result<(), DriverError> {
        self.ready_driver()
            .await?
            .set_speed(address, speed, direction)
            .await
    }

    /// Emergency-stops one loco.
    pub async fn loco_estop(&self, address: u16) -> Result<(), DriverError> {
        self.ready_driver().await?.emergency_stop(address).await
    }

    /// Switches a loco function.
    pub async fn loco_set_function(
        &self,
        address: u16,
        function: u8,
        on: bool,
    ) -> Result<(), DriverError> {
        self.ready_driver()
            .await?
            .set_function(address, function, on)
            .await
    }

    /// Sets a turnout.
    pub async fn turnout_set(&self, id: NodeId, state: TurnoutState) -> Result<(), DriverError> {
        self.ready_driver().await?.set_turnout(id, state).await
    }

    /// Switches track power.
    pub async fn track_power_set(&self, on: bool) -> Result<(), DriverError> {
        self.ready_driver().await?.set_track_power(on).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{DriverCall, MockDriver, RecordingBroadcaster};
    use tokio::sync::oneshot;

    fn mock_adapter() -> (Arc<HardwareAdapter>, MockDriver, RecordingBroadcaster) {
        let driver = MockDriver::new();
        let recorder = RecordingBroadcaster::new();
        let adapter = HardwareAdapter::with_driver(
            Arc::new(driver.clone()),
            HardwareDevice::virtual_device(),
            Arc::new(recorder.clone()),
        );
        (Arc::new(adapter), driver, recorder)
    }

    #[tokio::test]
    async fn requests_reach_the_driver() {
        let (adapter, driver, _) = mock_adapter();
        adapter.loco_set_speed(3, 30, Direction::Reverse).await.unwrap();
        adapter.turnout_set(9, TurnoutState::Closed).await.unwrap();
        adapter.track_power_set(true).await.unwrap();
        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::SetSpeed {
                    address: 3,
                    speed: 30,
                    direction: Direction::Reverse
                },
                DriverCall::Turnout {
                    id: 9,
                    state: TurnoutState::Closed
                },
                DriverCall::TrackPower(true),
            ]
        );
    }

    #[tokio::test]
    async fn requests_wait_for_switchover() {
        let (adapter, old_driver, recorder) = mock_adapter();
        let new_driver = MockDriver::named("New");
        let (ready_tx, ready_rx) = oneshot::channel::<()>();

        let installed = new_driver.clone();
        adapter
            .switch_to(HardwareDevice::dcc_ex("Station", "10.0.0.2"), async move {
                let _ = ready_rx.await;
                Ok(Arc::new(installed) as Arc<dyn DeviceDriver>)
            })
            .await;
        assert_eq!(adapter.status(), DriverStatus::Switching);
        assert_eq!(old_driver.calls(), vec![DriverCall::Close]);

        let pending = {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move { adapter.loco_estop(7).await })
        };
        tokio::task::yield_now().await;
        assert!(new_driver.calls().is_empty());

        ready_tx.send(()).unwrap();
        pending.await.unwrap().unwrap();

        assert_eq!(adapter.status(), DriverStatus::Available);
        assert_eq!(new_driver.calls(), vec![DriverCall::EmergencyStop { address: 7 }]);
        assert_eq!(adapter.device().name, "Station");
        assert_eq!(recorder.count("hardware/newActiveDevice"), 1);
    }

    #[tokio::test]
    async fn failed_handshake_makes_adapter_unavailable() {
        let (adapter, _, recorder) = mock_adapter();
        adapter
            .switch_to(HardwareDevice::dcc_ex("Station", "10.0.0.2"), async {
                Err(DriverError::HandshakeTimeout(10))
            })
            .await;
        let result = adapter.track_power_set(true).await;
        assert!(matches!(result, Err(DriverError::Unavailable)));
        assert_eq!(adapter.status(), DriverStatus::Unavailable);

        let snapshot = adapter.snapshot();
        assert_eq!(snapshot.message, "No response from device after 10ms");
        assert_eq!(recorder.count("hardware/newActiveDevice"), 1);

        adapter.select_driver("Virtual", None).await;
        adapter.track_power_set(true).await.unwrap();
        assert_eq!(adapter.device(), HardwareDevice::virtual_device());
    }

    #[tokio::test]
    async fn superseded_switch_is_discarded() {
        let (adapter, _, _) = mock_adapter();
        let slow = MockDriver::named("Slow");
        let (slow_tx, slow_rx) = oneshot::channel::<()>();
        let slow_driver = slow.clone();
        adapter
            .switch_to(HardwareDevice::dcc_ex("Slow", "10.0.0.3"), async move {
                let _ = slow_rx.await;
                Ok(Arc::new(slow_driver) as Arc<dyn DeviceDriver>)
            })
            .await;
        adapter.select_driver("Virtual", None).await;
        adapter.track_power_set(false).await.unwrap();

        slow_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(adapter.snapshot().driver, "Virtual");
        assert_eq!(slow.calls(), vec![DriverCall::Close]);
    }

    #[tokio::test]
    async fn unknown_driver_falls_back_to_virtual() {
        let (adapter, _, _) = mock_adapter();
        adapter.select_driver("Marklin", Some("/dev/ttyUSB0")).await;
        adapter.loco_estop(1).await.unwrap();
        assert_eq!(adapter.snapshot().driver, "Virtual");
    }

    #[test]
    fn devices_list_virtual_first() {
        let adapter = HardwareAdapter::new(Arc::new(RecordingBroadcaster::new()))
            .with_devices(vec![HardwareDevice::dcc_ex("Layout", "192.168.1.20")]);
        let devices = adapter.available_devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].driver, "Virtual");
        assert_eq!(devices[1].address.as_deref(), Some("192.168.1.20"));
    }
}
