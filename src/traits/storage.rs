//! Persistence seams.
//!
//! The core treats storage as a row store keyed by numeric id. Every
//! mutation is written through immediately; nothing is batched. Script
//! rows hold source text only, which is re-compiled on load.
//!
//! [`MemoryStore`](crate::storage::MemoryStore) and
//! [`JsonFileStore`](crate::storage::JsonFileStore) implement all three traits.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layout::{Coordinate, Destination, LinkId, MapPoint, NodeId, Turnout, TurnoutLink, TurnoutState};

/// A persisted automation script.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredScript {
    /// Script id.
    pub id: i64,
    /// Script name.
    pub name: String,
    /// Canonical source text.
    pub source: String,
    /// Operator notes.
    #[serde(default)]
    pub description: String,
}

/// A persisted loco registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocoRecord {
    /// Display name, unique.
    pub name: String,
    /// DCC address, unique.
    pub address: u16,
}

/// Storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed.
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The backing document could not be (de)serialized.
    #[error("Malformed store: {0}")]
    Json(#[from] serde_json::Error),
    /// A row to update does not exist.
    #[error("{kind} {id} not found")]
    Missing {
        /// Row kind.
        kind: &'static str,
        /// Row id.
        id: i64,
    },
}

/// Script rows.
pub trait ScriptStore: Send + Sync {
    /// Every stored script.
    fn load_scripts(&self) -> Result<Vec<StoredScript>, StorageError>;

    /// Inserts or replaces the row for `script.id`.
    fn save_script(&self, script: &StoredScript) -> Result<(), StorageError>;

    /// Removes a script row; missing rows are not an error.
    fn delete_script(&self, id: i64) -> Result<(), StorageError>;
}

/// Layout rows: turnouts, destinations and links.
pub trait LayoutStore: Send + Sync {
    /// Every node.
    fn nodes(&self) -> Result<Vec<MapPoint>, StorageError>;

    /// Every link.
    fn links(&self) -> Result<Vec<TurnoutLink>, StorageError>;

    /// Persists a turnout's state.
    fn save_turnout_state(&self, id: NodeId, state: TurnoutState) -> Result<(), StorageError>;

    /// Persists a node's diagram position.
    fn save_coordinate(&self, id: NodeId, coordinate: Coordinate) -> Result<(), StorageError>;

    /// One node.
    fn node(&self, id: NodeId) -> Result<Option<MapPoint>, StorageError> {
        Ok(self.nodes()?.into_iter().find(|n| n.id() == id))
    }

    /// One link.
    fn link(&self, id: LinkId) -> Result<Option<TurnoutLink>, StorageError> {
        Ok(self.links()?.into_iter().find(|l| l.id == id))
    }

    /// Every turnout.
    fn turnouts(&self) -> Result<Vec<Turnout>, StorageError> {
        Ok(self
            .nodes()?
            .into_iter()
            .filter_map(|n| match n {
                MapPoint::Turnout(t) => Some(t),
                MapPoint::Destination(_) => None,
            })
            .collect())
    }

    /// One turnout.
    fn turnout(&self, id: NodeId) -> Result<Option<Turnout>, StorageError> {
        Ok(self.turnouts()?.into_iter().find(|t| t.id == id))
    }

    /// Every destination.
    fn destinations(&self) -> Result<Vec<Destination>, StorageError> {
        Ok(self
            .nodes()?
            .into_iter()
            .filter_map(|n| match n {
                MapPoint::Destination(d) => Some(d),
                MapPoint::Turnout(_) => None,
            })
            .collect())
    }

    /// One destination.
    fn destination(&self, id: NodeId) -> Result<Option<Destination>, StorageError> {
        Ok(self.destinations()?.into_iter().find(|d| d.id == id))
    }
}

/// Loco registrations.
pub trait LocoRegistry: Send + Sync {
    /// Every registered loco.
    fn load_locos(&self) -> Result<Vec<LocoRecord>, StorageError>;

    /// Adds a registration.
    fn insert_loco(&self, loco: &LocoRecord) -> Result<(), StorageError>;

    /// Replaces the registration previously stored under `previous_address`.
    fn update_loco(&self, previous_address: u16, loco: &LocoRecord) -> Result<(), StorageError>;

    /// Removes a registration; missing rows are not an error.
    fn delete_loco(&self, address: u16) -> Result<(), StorageError>;
}
