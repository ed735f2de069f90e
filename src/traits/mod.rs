//! Trait definitions for the seams between the core and its collaborators.
//!
//! # Submodules
//!
//! - `hardware`: command station drivers and loco direction
//! - `network`: client event fan-out
//! - `storage`: script, layout and loco persistence
//!
//! The core only ever holds these as `Arc<dyn Trait>`, built once at startup
//! by [`TrainSystem`](crate::system::TrainSystem) and handed down.

pub mod hardware;
pub mod network;
pub mod storage;

pub use hardware::*;
pub use network::*;
pub use storage::*;
