//! Store implementations for scripts, layout and loco registrations.
//!
//! - [`MemoryStore`]: everything in a mutex, for tests and throwaway sessions
//! - [`JsonFileStore`]: the same data rewritten to one JSON document after
//!   every mutation
//!
//! # Example
//!
//! ```rust
//! use rs_trainlink::storage::MemoryStore;
//! use rs_trainlink::layout::{Destination, MapPoint, TurnoutLink};
//! use rs_trainlink::traits::LayoutStore;
//!
//! let store = MemoryStore::new()
//!     .with_node(MapPoint::Destination(Destination::new(1, "Up main")))
//!     .with_node(MapPoint::Destination(Destination::new(2, "Down main")))
//!     .with_link(TurnoutLink::new(10, 20, 1, 2));
//!
//! assert_eq!(store.destinations().unwrap().len(), 2);
//! assert_eq!(store.link(10).unwrap().unwrap().length, 20);
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::layout::{Coordinate, LinkId, MapPoint, NodeId, TurnoutLink, TurnoutState};
use crate::lock::lock;
use crate::traits::{LayoutStore, LocoRecord, LocoRegistry, ScriptStore, StorageError, StoredScript};

/// Everything a store holds.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreData {
    /// Scripts by id.
    #[serde(default)]
    pub scripts: BTreeMap<i64, StoredScript>,
    /// Layout nodes by id.
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, MapPoint>,
    /// Layout links by id.
    #[serde(default)]
    pub links: BTreeMap<LinkId, TurnoutLink>,
    /// Loco registrations by address.
    #[serde(default)]
    pub locos: BTreeMap<u16, LocoRecord>,
}

// ============================================================================
// Memory Store
// ============================================================================

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `data`.
    pub fn from_data(data: StoreData) -> Self {
        Self {
            data: Mutex::new(data),
        }
    }

    /// Adds a layout node.
    pub fn with_node(self, node: MapPoint) -> Self {
        lock(&self.data).nodes.insert(node.id(), node);
        self
    }

    /// Adds a layout link.
    pub fn with_link(self, link: TurnoutLink) -> Self {
        lock(&self.data).links.insert(link.id, link);
        self
    }

    /// Adds a script row.
    pub fn with_script(self, script: StoredScript) -> Self {
        lock(&self.data).scripts.insert(script.id, script);
        self
    }

    /// Adds a loco registration.
    pub fn with_loco(self, name: &str, address: u16) -> Self {
        lock(&self.data).locos.insert(
            address,
            LocoRecord {
                name: name.to_string(),
                address,
            },
        );
        self
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> StoreData {
        lock(&self.data).clone()
    }
}

impl ScriptStore for MemoryStore {
    fn load_scripts(&self) -> Result<Vec<StoredScript>, StorageError> {
        Ok(lock(&self.data).scripts.values().cloned().collect())
    }

    fn save_script(&self, script: &StoredScript) -> Result<(), StorageError> {
        lock(&self.data).scripts.insert(script.id, script.clone());
        Ok(())
    }

    fn delete_script(&self, id: i64) -> Result<(), StorageError> {
        lock(&self.data).scripts.remove(&id);
        Ok(())
    }
}

impl LayoutStore for MemoryStore {
    fn nodes(&self) -> Result<Vec<MapPoint>, StorageError> {
        Ok(lock(&self.data).nodes.values().cloned().collect())
    }

    fn links(&self) -> Result<Vec<TurnoutLink>, StorageError> {
        Ok(lock(&self.data).links.values().cloned().collect())
    }

    fn node(&self, id: NodeId) -> Result<Option<MapPoint>, StorageError> {
        Ok(lock(&self.data).nodes.get(&id).cloned())
    }

    fn link(&self, id: LinkId) -> Result<Option<TurnoutLink>, StorageError> {
        Ok(lock(&self.data).links.get(&id).cloned())
    }

    fn save_turnout_state(&self, id: NodeId, state: TurnoutState) -> Result<(), StorageError> {
        match lock(&self.data).nodes.get_mut(&id) {
            Some(MapPoint::Turnout(turnout)) => {
                turnout.state = state;
                Ok(())
            }
            _ => Err(StorageError::Missing { kind: "Turnout", id }),
        }
    }

    fn save_coordinate(&self, id: NodeId, coordinate: Coordinate) -> Result<(), StorageError> {
        match lock(&self.data).nodes.get_mut(&id) {
            Some(MapPoint::Turnout(turnout)) => turnout.coordinate = coordinate,
            Some(MapPoint::Destination(destination)) => destination.coordinate = coordinate,
            None => return Err(StorageError::Missing { kind: "Node", id }),
        }
        Ok(())
    }
}

impl LocoRegistry for MemoryStore {
    fn load_locos(&self) -> Result<Vec<LocoRecord>, StorageError> {
        Ok(lock(&self.data).locos.values().cloned().collect())
    }

    fn insert_loco(&self, loco: &LocoRecord) -> Result<(), StorageError> {
        lock(&self.data).locos.insert(loco.address, loco.clone());
        Ok(())
    }

    fn update_loco(&self, previous_address: u16, loco: &LocoRecord) -> Result<(), StorageError> {
        let mut data = lock(&self.data);
        if data.locos.remove(&previous_address).is_none() {
            return Err(StorageError::Missing {
                kind: "Loco",
                id: i64::from(previous_address),
            });
        }
        data.locos.insert(loco.address, loco.clone());
        Ok(())
    }

    fn delete_loco(&self, address: u16) -> Result<(), StorageError> {
        lock(&self.data).locos.remove(&address);
        Ok(())
    }
}

// ============================================================================
// JSON File Store
// ============================================================================

/// Store backed by a single JSON document.
///
/// The file is read once on open and rewritten (via a temporary file and a
/// rename) after every successful mutation.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    memory: MemoryStore,
}

impl JsonFileStore {
    /// Opens `path`, starting empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice(&bytes)?
        } else {
            StoreData::default()
        };
        debug!(path = %path.display(), "Opened JSON store");
        Ok(Self {
            path,
            memory: MemoryStore::from_data(data),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(&self.memory.snapshot())?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ScriptStore for JsonFileStore {
    fn load_scripts(&self) -> Result<Vec<StoredScript>, StorageError> {
        self.memory.load_scripts()
    }

    fn save_script(&self, script: &StoredScript) -> Result<(), StorageError> {
        self.memory.save_script(script)?;
        self.flush()
    }

    fn delete_script(&self, id: i64) -> Result<(), StorageError> {
        self.memory.delete_script(id)?;
        self.flush()
    }
}

impl LayoutStore for JsonFileStore {
    fn nodes(&self) -> Result<Vec<MapPoint>, StorageError> {
        self.memory.nodes()
    }

    fn links(&self) -> Result<Vec<TurnoutLink>, StorageError> {
        self.memory.links()
    }

    fn node(&self, id: NodeId) -> Result<Option<MapPoint>, StorageError> {
        self.memory.node(id)
    }

    fn link(&self, id: LinkId) -> Result<Option<TurnoutLink>, StorageError> {
        self.memory.link(id)
    }

    fn save_turnout_state(&self, id: NodeId, state: TurnoutState) -> Result<(), StorageError> {
        self.memory.save_turnout_state(id, state)?;
        self.flush()
    }

    fn save_coordinate(&self, id: NodeId, coordinate: Coordinate) -> Result<(), StorageError> {
        self.memory.save_coordinate(id, coordinate)?;
        self.flush()
    }
}

impl LocoRegistry for JsonFileStore {
    fn load_locos(&self) -> Result<Vec<LocoRecord>, StorageError> {
        self.memory.load_locos()
    }

    fn insert_loco(&self, loco: &LocoRecord) -> Result<(), StorageError> {
        self.memory.insert_loco(loco)?;
        self.flush()
    }

    fn update_loco(&self, previous_address: u16, loco: &LocoRecord) -> Result<(), StorageError> {
        self.memory.update_loco(previous_address, loco)?;
        self.flush()
    }

    fn delete_loco(&self, address: u16) -> Result<(), StorageError> {
        self.memory.delete_loco(address)?;
        self.flush()
    }
}
