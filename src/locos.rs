//! Loco registry and the sync proxy.
//!
//! [`LocoStore`] holds the one canonical [`Loco`] per address, indexed by
//! address and by name. Anything that wants to drive a loco asks for a
//! [`ProxyLoco`]; every change made through the proxy lands on the canonical
//! copy first and is then fanned out according to the proxy's [`SyncLevel`]:
//!
//! | Level | Clients | Hardware |
//! |-------|---------|----------|
//! | `None` | - | - |
//! | `SerialOnly` | - | yes |
//! | `ClientOnly` | yes | - |
//! | `All` | yes | yes |
//!
//! A change that came from the hardware is applied with `ClientOnly` so it is
//! not echoed back to the device; a throttle request from one client uses
//! `SerialOnly` because the requesting client already shows the new value.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::adapter::HardwareAdapter;
use crate::lock::lock;
use crate::traits::{
    ClientBroadcast, ClientEvent, Direction, DriverError, LocoRecord, LocoRegistry, StorageError,
};

/// Highest DCC speed step.
pub const MAX_SPEED: u8 = 126;

/// Highest function number.
pub const MAX_FUNCTION: u8 = 28;

/// Highest long DCC address.
pub const MAX_ADDRESS: u16 = 10293;

// ============================================================================
// Loco
// ============================================================================

/// One locomotive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loco {
    /// Display name, unique in the store.
    pub name: String,
    /// DCC address, unique in the store.
    pub address: u16,
    /// Speed step (0-126).
    pub speed: u8,
    /// Direction of travel.
    pub direction: Direction,
    /// Function states, bit `n` is function `n`.
    pub functions: u32,
}

impl Loco {
    /// Creates a stopped loco with every function off.
    pub fn new(name: impl Into<String>, address: u16) -> Self {
        Self {
            name: name.into(),
            address,
            speed: 0,
            direction: Direction::Stopped,
            functions: 0,
        }
    }

    /// Whether function `function` is on.
    pub fn function(&self, function: u8) -> bool {
        function <= MAX_FUNCTION && self.functions & (1 << function) != 0
    }

    /// Switches function `function`; numbers above 28 are ignored.
    pub fn set_function(&mut self, function: u8, on: bool) {
        if function > MAX_FUNCTION {
            return;
        }
        if on {
            self.functions |= 1 << function;
        } else {
            self.functions &= !(1 << function);
        }
    }

    fn record(&self) -> LocoRecord {
        LocoRecord {
            name: self.name.clone(),
            address: self.address,
        }
    }
}

/// Name or address of a loco.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocoIdentifier {
    /// DCC address.
    Address(u16),
    /// Display name.
    Name(String),
}

impl LocoIdentifier {
    /// Numeric text is an address, anything else a name.
    ///
    /// ```
    /// use rs_trainlink::locos::LocoIdentifier;
    ///
    /// assert_eq!(LocoIdentifier::from_text("3"), LocoIdentifier::Address(3));
    /// assert_eq!(
    ///     LocoIdentifier::from_text("Flying Scotsman"),
    ///     LocoIdentifier::Name("Flying Scotsman".into())
    /// );
    /// ```
    pub fn from_text(s: &str) -> Self {
        match s.trim().parse::<u16>() {
            Ok(address) => LocoIdentifier::Address(address),
            Err(_) => LocoIdentifier::Name(s.to_string()),
        }
    }
}

impl From<u16> for LocoIdentifier {
    fn from(address: u16) -> Self {
        LocoIdentifier::Address(address)
    }
}

impl From<&str> for LocoIdentifier {
    fn from(name: &str) -> Self {
        LocoIdentifier::Name(name.to_string())
    }
}

impl fmt::Display for LocoIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocoIdentifier::Address(address) => write!(f, "{}", address),
            LocoIdentifier::Name(name) => f.write_str(name),
        }
    }
}

/// Audiences a loco change is pushed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncLevel {
    /// Canonical copy only.
    None,
    /// Hardware only.
    SerialOnly,
    /// Connected clients only.
    ClientOnly,
    /// Clients and hardware.
    #[default]
    All,
}

impl SyncLevel {
    /// Whether clients hear about the change.
    pub const fn reaches_clients(&self) -> bool {
        matches!(self, SyncLevel::ClientOnly | SyncLevel::All)
    }

    /// Whether the change is sent to the hardware.
    pub const fn reaches_hardware(&self) -> bool {
        matches!(self, SyncLevel::SerialOnly | SyncLevel::All)
    }
}

/// Loco store errors.
#[derive(Debug, Error)]
pub enum LocoError {
    /// No loco matches the identifier.
    #[error("Loco not found in store")]
    NotFound,
    /// Names must not be blank.
    #[error("Loco name must not be empty")]
    InvalidName,
    /// Another loco already uses the name.
    #[error("A loco named \"{0}\" already exists")]
    DuplicateName(String),
    /// Address out of range.
    #[error("Address {0} is outside 1-{max}", max = MAX_ADDRESS)]
    InvalidAddress(u16),
    /// Another loco already uses the address.
    #[error("Address {0} is already in use")]
    DuplicateAddress(u16),
    /// Function number above 28.
    #[error("Function {0} is outside 0-{max}", max = MAX_FUNCTION)]
    InvalidFunction(u8),
    /// The registry rejected the change.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The hardware rejected the change.
    #[error(transparent)]
    Hardware(#[from] DriverError),
}

// ============================================================================
// Store
// ============================================================================

#[derive(Default)]
struct LocoTables {
    by_address: BTreeMap<u16, Loco>,
    by_name: HashMap<String, u16>,
}

impl LocoTables {
    fn address_of(&self, identifier: &LocoIdentifier) -> Option<u16> {
        match identifier {
            LocoIdentifier::Address(address) => {
                self.by_address.contains_key(address).then_some(*address)
            }
            LocoIdentifier::Name(name) => self.by_name.get(name).copied(),
        }
    }

    fn insert(&mut self, loco: Loco) {
        self.by_name.insert(loco.name.clone(), loco.address);
        self.by_address.insert(loco.address, loco);
    }

    fn remove(&mut self, address: u16) -> Option<Loco> {
        let loco = self.by_address.remove(&address)?;
        self.by_name.remove(&loco.name);
        Some(loco)
    }

    /// Checks `name`/`address` are usable, ignoring the loco at `current`.
    fn validate(&self, name: &str, address: u16, current: Option<u16>) -> Result<(), LocoError> {
        if name.trim().is_empty() {
            return Err(LocoError::InvalidName);
        }
        if address == 0 || address > MAX_ADDRESS {
            return Err(LocoError::InvalidAddress(address));
        }
        if let Some(owner) = self.by_name.get(name) {
            if Some(*owner) != current {
                return Err(LocoError::DuplicateName(name.to_string()));
            }
        }
        if self.by_address.contains_key(&address) && Some(address) != current {
            return Err(LocoError::DuplicateAddress(address));
        }
        Ok(())
    }
}

/// Canonical loco state plus persistence and fan-out.
pub struct LocoStore {
    tables: Mutex<LocoTables>,
    registry: Arc<dyn LocoRegistry>,
    adapter: Arc<HardwareAdapter>,
    broadcaster: Arc<dyn ClientBroadcast>,
}

impl LocoStore {
    /// Creates an empty store.
    pub fn new(
        registry: Arc<dyn LocoRegistry>,
        adapter: Arc<HardwareAdapter>,
        broadcaster: Arc<dyn ClientBroadcast>,
    ) -> Self {
        Self {
            tables: Mutex::new(LocoTables::default()),
            registry,
            adapter,
            broadcaster,
        }
    }

    /// Loads saved locos, skipping addresses already present.
    ///
    /// Returns how many were added.
    pub fn load_saved(&self) -> Result<usize, LocoError> {
        let records = self.registry.load_locos()?;
        let mut tables = lock(&self.tables);
        let mut added = 0;
        for record in records {
            if tables.by_address.contains_key(&record.address) {
                continue;
            }
            tables.insert(Loco::new(record.name, record.address));
            added += 1;
        }
        info!(count = added, "Loaded saved locos");
        Ok(added)
    }

    /// Adds and persists a new loco.
    pub fn add(&self, name: &str, address: u16) -> Result<Loco, LocoError> {
        let loco = {
            let mut tables = lock(&self.tables);
            tables.validate(name, address, None)?;
            let loco = Loco::new(name, address);
            self.registry.insert_loco(&loco.record())?;
            tables.insert(loco.clone());
            loco
        };
        info!(name = %loco.name, address = loco.address, "Loco added");
        self.broadcaster
            .broadcast(ClientEvent::LocoAdded(loco.clone()));
        Ok(loco)
    }

    /// Renames and/or readdresses a loco, keeping its speed, direction and
    /// functions.
    pub fn update(
        &self,
        identifier: &LocoIdentifier,
        name: Option<&str>,
        address: Option<u16>,
    ) -> Result<Loco, LocoError> {
        let (previous_address, loco) = {
            let mut tables = lock(&self.tables);
            let current = tables.address_of(identifier).ok_or(LocoError::NotFound)?;
            let existing = tables.by_address.get(&current).ok_or(LocoError::NotFound)?;

            let mut updated = existing.clone();
            if let Some(name) = name {
                updated.name = name.to_string();
            }
            if let Some(address) = address {
                updated.address = address;
            }
            tables.validate(&updated.name, updated.address, Some(current))?;
            self.registry.update_loco(current, &updated.record())?;

            tables.remove(current);
            tables.insert(updated.clone());
            (current, updated)
        };
        info!(address = previous_address, new_address = loco.address, "Loco edited");
        self.broadcaster.broadcast(ClientEvent::LocoEdited {
            previous_address,
            loco: loco.clone(),
        });
        Ok(loco)
    }

    /// Removes a loco from the store and the registry.
    pub fn delete(&self, identifier: &LocoIdentifier) -> Result<Loco, LocoError> {
        let loco = {
            let mut tables = lock(&self.tables);
            let address = tables.address_of(identifier).ok_or(LocoError::NotFound)?;
            self.registry.delete_loco(address)?;
            tables.remove(address).ok_or(LocoError::NotFound)?
        };
        info!(address = loco.address, "Loco deleted");
        self.broadcaster.broadcast(ClientEvent::LocoDeleted {
            address: loco.address,
        });
        Ok(loco)
    }

    /// Every loco, by address.
    pub fn all(&self) -> Vec<Loco> {
        lock(&self.tables).by_address.values().cloned().collect()
    }

    /// Current state of one loco.
    pub fn loco(&self, identifier: &LocoIdentifier) -> Option<Loco> {
        let tables = lock(&self.tables);
        let address = tables.address_of(identifier)?;
        tables.by_address.get(&address).cloned()
    }

    /// Number of locos.
    pub fn len(&self) -> usize {
        lock(&self.tables).by_address.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a proxy that syncs changes at `sync`.
    pub fn get_loco(
        self: &Arc<Self>,
        identifier: &LocoIdentifier,
        sync: SyncLevel,
    ) -> Result<ProxyLoco, LocoError> {
        let tables = lock(&self.tables);
        let address = tables.address_of(identifier).ok_or(LocoError::NotFound)?;
        Ok(ProxyLoco {
            store: Arc::clone(self),
            address,
            sync,
        })
    }

    fn modify<F>(&self, address: u16, change: F) -> Result<Loco, LocoError>
    where
        F: FnOnce(&mut Loco),
    {
        let mut tables = lock(&self.tables);
        let loco = tables
            .by_address
            .get_mut(&address)
            .ok_or(LocoError::NotFound)?;
        change(loco);
        Ok(loco.clone())
    }

    /// Pushes a loco's speed and direction to the audiences in `sync`.
    pub async fn sync_loco(&self, address: u16, sync: SyncLevel) -> Result<(), LocoError> {
        let loco = self
            .loco(&LocoIdentifier::Address(address))
            .ok_or(LocoError::NotFound)?;
        if sync.reaches_clients() {
            self.broadcaster.broadcast(ClientEvent::SpeedUpdate {
                address,
                speed: loco.speed,
            });
            self.broadcaster.broadcast(ClientEvent::DirectionUpdate {
                address,
                direction: loco.direction,
            });
        }
        if sync.reaches_hardware() {
            self.adapter
                .loco_set_speed(address, loco.speed, loco.direction)
                .await?;
        }
        Ok(())
    }

    async fn sync_function(
        &self,
        address: u16,
        function: u8,
        on: bool,
        sync: SyncLevel,
    ) -> Result<(), LocoError> {
        if sync.reaches_clients() {
            self.broadcaster.broadcast(ClientEvent::FunctionUpdate {
                address,
                function,
                state: on,
            });
        }
        if sync.reaches_hardware() {
            self.adapter.loco_set_function(address, function, on).await?;
        }
        Ok(())
    }
}

// ============================================================================
// Proxy
// ============================================================================

/// Handle that writes through to the canonical loco and syncs each change.
///
/// Clones share the same target and sync level.
#[derive(Clone)]
pub struct ProxyLoco {
    store: Arc<LocoStore>,
    address: u16,
    sync: SyncLevel,
}

impl fmt::Debug for ProxyLoco {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyLoco")
            .field("address", &self.address)
            .field("sync", &self.sync)
            .finish()
    }
}

impl ProxyLoco {
    /// Address of the target loco.
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Sync level changes are made at.
    pub fn sync_level(&self) -> SyncLevel {
        self.sync
    }

    /// Current canonical state.
    pub fn snapshot(&self) -> Result<Loco, LocoError> {
        self.store
            .loco(&LocoIdentifier::Address(self.address))
            .ok_or(LocoError::NotFound)
    }

    /// Sets the speed (clamped to 126).
    pub async fn set_speed(&self, speed: u8) -> Result<(), LocoError> {
        self.store
            .modify(self.address, |loco| loco.speed = speed.min(MAX_SPEED))?;
        self.store.sync_loco(self.address, self.sync).await
    }

    /// Sets the direction.
    pub async fn set_direction(&self, direction: Direction) -> Result<(), LocoError> {
        self.store
            .modify(self.address, |loco| loco.direction = direction)?;
        self.store.sync_loco(self.address, self.sync).await
    }

    /// Sets direction and speed with a single sync.
    pub async fn drive(&self, direction: Direction, speed: u8) -> Result<(), LocoError> {
        self.store.modify(self.address, |loco| {
            loco.direction = direction;
            loco.speed = speed.min(MAX_SPEED);
        })?;
        debug!(address = self.address, speed, direction = direction.as_str(), "Drive");
        self.store.sync_loco(self.address, self.sync).await
    }

    /// Stops the loco at once: direction stopped, speed zero.
    pub async fn emergency_stop(&self) -> Result<(), LocoError> {
        self.drive(Direction::Stopped, 0).await
    }

    /// Switches a function.
    pub async fn set_function(&self, function: u8, on: bool) -> Result<(), LocoError> {
        if function > MAX_FUNCTION {
            return Err(LocoError::InvalidFunction(function));
        }
        self.store
            .modify(self.address, |loco| loco.set_function(function, on))?;
        self.store
            .sync_function(self.address, function, on, self.sync)
            .await
    }
}
