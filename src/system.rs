//! The ownership root.
//!
//! [`TrainSystem`] wires the hardware adapter, turnout map, loco store and
//! script runtime to one store and one broadcaster, and carries the throttle
//! operations that touch more than one of them. Every service (web, MQTT,
//! the binary) holds an `Arc<TrainSystem>` instead of reaching for globals.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_trainlink::config::Config;
//! use rs_trainlink::system::TrainSystem;
//! use rs_trainlink::traits::NullBroadcast;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let system = TrainSystem::from_config(&Config::default(), Arc::new(NullBroadcast))
//!     .await
//!     .unwrap();
//! system.locos().add("Flyer", 3).unwrap();
//! system.set_track_power(true).await.unwrap();
//! assert!(system.track_power());
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::adapter::HardwareAdapter;
use crate::automation::{Runtime, RuntimeError};
use crate::config::Config;
use crate::layout::TurnoutMap;
use crate::locos::{LocoError, LocoIdentifier, LocoStore, SyncLevel};
use crate::storage::{JsonFileStore, MemoryStore};
use crate::traits::{
    ClientBroadcast, ClientEvent, Direction, DriverError, LayoutStore, LocoRegistry, ScriptStore,
    StorageError,
};

/// Startup failures.
#[derive(Debug, Error)]
pub enum SystemError {
    /// The store could not be opened or read.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Saved locos could not be loaded.
    #[error(transparent)]
    Loco(#[from] LocoError),
    /// Saved scripts could not be loaded.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Everything one controller process owns.
pub struct TrainSystem {
    adapter: Arc<HardwareAdapter>,
    turnouts: Arc<TurnoutMap>,
    locos: Arc<LocoStore>,
    runtime: Arc<Runtime>,
    broadcaster: Arc<dyn ClientBroadcast>,
    track_power: AtomicBool,
}

impl TrainSystem {
    /// Builds the system from `config`.
    ///
    /// Opens the JSON store when a path is configured (in memory otherwise),
    /// then selects the configured driver.
    pub async fn from_config(
        config: &Config,
        broadcaster: Arc<dyn ClientBroadcast>,
    ) -> Result<Self, SystemError> {
        let adapter = Arc::new(
            HardwareAdapter::new(Arc::clone(&broadcaster))
                .with_devices(config.hardware.devices.clone())
                .with_handshake_timeout(Duration::from_millis(config.hardware.handshake_timeout_ms)),
        );
        let sync = config.automation.default_sync;
        let system = match &config.storage.path {
            Some(path) => {
                let store = Arc::new(JsonFileStore::open(path)?);
                Self::assemble(store, adapter, broadcaster, sync)?
            }
            None => Self::assemble(Arc::new(MemoryStore::new()), adapter, broadcaster, sync)?,
        };

        if config.hardware.driver != crate::hal::VIRTUAL_DRIVER_NAME {
            system
                .adapter
                .select_driver(&config.hardware.driver, config.hardware.address.as_deref())
                .await;
        }
        Ok(system)
    }

    /// Builds the system around an existing store and adapter.
    ///
    /// Loads the layout, then the saved locos, then the saved scripts.
    pub fn assemble<S>(
        store: Arc<S>,
        adapter: Arc<HardwareAdapter>,
        broadcaster: Arc<dyn ClientBroadcast>,
        default_sync: SyncLevel,
    ) -> Result<Self, SystemError>
    where
        S: ScriptStore + LayoutStore + LocoRegistry + 'static,
    {
        let turnouts = Arc::new(TurnoutMap::load(
            store.clone(),
            Arc::clone(&adapter),
            Arc::clone(&broadcaster),
        )?);
        let locos = Arc::new(LocoStore::new(
            store.clone(),
            Arc::clone(&adapter),
            Arc::clone(&broadcaster),
        ));
        locos.load_saved()?;
        let runtime = Runtime::new(
            Arc::clone(&turnouts),
            Arc::clone(&locos),
            store,
            Arc::clone(&broadcaster),
            default_sync,
        );
        runtime.load_persistent_scripts()?;
        info!(
            turnouts = turnouts.turnouts().len(),
            locos = locos.len(),
            scripts = runtime.all_automations().len(),
            "Train system ready"
        );
        Ok(Self {
            adapter,
            turnouts,
            locos,
            runtime,
            broadcaster,
            track_power: AtomicBool::new(false),
        })
    }

    // ========================================================================
    // Parts
    // ========================================================================

    /// Hardware adapter.
    pub fn adapter(&self) -> &Arc<HardwareAdapter> {
        &self.adapter
    }

    /// Turnouts and routes.
    pub fn turnouts(&self) -> &Arc<TurnoutMap> {
        &self.turnouts
    }

    /// Loco store.
    pub fn locos(&self) -> &Arc<LocoStore> {
        &self.locos
    }

    /// Script runtime.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    // ========================================================================
    // Throttle
    // ========================================================================

    /// Sets a loco's speed on the hardware and tells every client.
    pub async fn set_speed(&self, identifier: &LocoIdentifier, speed: u8) -> Result<(), LocoError> {
        let loco = self.locos.get_loco(identifier, SyncLevel::SerialOnly)?;
        loco.set_speed(speed).await?;
        let speed = loco.snapshot()?.speed;
        self.broadcaster.broadcast(ClientEvent::SpeedUpdate {
            address: loco.address(),
            speed,
        });
        Ok(())
    }

    /// Sets a loco's direction; stopping also zeroes its speed.
    pub async fn set_direction(
        &self,
        identifier: &LocoIdentifier,
        direction: Direction,
    ) -> Result<(), LocoError> {
        let loco = self.locos.get_loco(identifier, SyncLevel::All)?;
        match direction {
            Direction::Stopped => loco.drive(Direction::Stopped, 0).await,
            _ => loco.set_direction(direction).await,
        }
    }

    /// Swaps forward and reverse. A stopped loco stays stopped.
    pub async fn toggle_direction(&self, identifier: &LocoIdentifier) -> Result<Direction, LocoError> {
        let loco = self.locos.get_loco(identifier, SyncLevel::All)?;
        let direction = loco.snapshot()?.direction.toggled();
        loco.set_direction(direction).await?;
        Ok(direction)
    }

    /// Switches a cab function.
    pub async fn set_function(
        &self,
        identifier: &LocoIdentifier,
        function: u8,
        on: bool,
    ) -> Result<(), LocoError> {
        self.locos
            .get_loco(identifier, SyncLevel::All)?
            .set_function(function, on)
            .await
    }

    /// Switches track power.
    pub async fn set_track_power(&self, on: bool) -> Result<(), DriverError> {
        self.adapter.track_power_set(on).await?;
        self.track_power.store(on, Ordering::SeqCst);
        info!(on, "Track power");
        self.broadcaster
            .broadcast(ClientEvent::TrackPowerUpdate { state: on });
        Ok(())
    }

    /// Last track power state that was set.
    pub fn track_power(&self) -> bool {
        self.track_power.load(Ordering::SeqCst)
    }
}
