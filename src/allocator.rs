//! Free-list id allocation for process ids and route ids.
//!
//! Both allocators hand out the oldest released id before advancing their
//! counter, so scripts that are run over and over keep reusing a handful of
//! PIDs instead of growing without bound.
//!
//! # Example
//!
//! ```rust
//! use rs_trainlink::allocator::{FreeListAllocator, PidAllocator};
//!
//! let mut routes = FreeListAllocator::new(1);
//! assert_eq!(routes.allocate(), 1);
//! assert_eq!(routes.allocate(), 2);
//! routes.release(1);
//! assert_eq!(routes.allocate(), 1);
//!
//! let mut pids = PidAllocator::default();
//! let pid = pids.allocate(7);
//! assert_eq!(pid.to_string(), "7#0");
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Free List
// ============================================================================

/// Counter with a FIFO list of released ids.
#[derive(Clone, Debug)]
pub struct FreeListAllocator {
    next: u32,
    first: u32,
    free: VecDeque<u32>,
}

impl FreeListAllocator {
    /// Creates an allocator whose first id is `first`.
    pub fn new(first: u32) -> Self {
        Self {
            next: first,
            first,
            free: VecDeque::new(),
        }
    }

    /// Returns the oldest released id, or the next fresh one.
    pub fn allocate(&mut self) -> u32 {
        if let Some(id) = self.free.pop_front() {
            return id;
        }
        let id = self.next;
        self.next += 1;
        id
    }

    /// Makes `id` available again.
    ///
    /// Ids that were never handed out, or are already free, are ignored.
    pub fn release(&mut self, id: u32) {
        if id < self.first || id >= self.next || self.free.contains(&id) {
            return;
        }
        self.free.push_back(id);
    }

    /// Number of ids currently handed out.
    pub fn in_use(&self) -> usize {
        (self.next - self.first) as usize - self.free.len()
    }
}

impl Default for FreeListAllocator {
    fn default() -> Self {
        Self::new(0)
    }
}

// ============================================================================
// PIDs
// ============================================================================

/// Identifier of one running automation, `"<script id>#<sequence>"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Pid {
    /// Script the process runs.
    pub script: i64,
    /// Sequence number within that script.
    pub sequence: u32,
}

impl Pid {
    /// Creates a PID.
    pub const fn new(script: i64, sequence: u32) -> Self {
        Self { script, sequence }
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.script, self.sequence)
    }
}

/// Malformed PID text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid PID \"{0}\"")]
pub struct ParsePidError(pub String);

impl FromStr for Pid {
    type Err = ParsePidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParsePidError(s.to_string());
        let (script, sequence) = s.trim().split_once('#').ok_or_else(invalid)?;
        Ok(Pid {
            script: script.parse().map_err(|_| invalid())?,
            sequence: sequence.parse().map_err(|_| invalid())?,
        })
    }
}

impl From<Pid> for String {
    fn from(pid: Pid) -> Self {
        pid.to_string()
    }
}

impl TryFrom<String> for Pid {
    type Error = ParsePidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Per-script PID allocation.
#[derive(Clone, Debug, Default)]
pub struct PidAllocator {
    scripts: HashMap<i64, FreeListAllocator>,
}

impl PidAllocator {
    /// Allocates a PID for `script`.
    pub fn allocate(&mut self, script: i64) -> Pid {
        let sequence = self.scripts.entry(script).or_default().allocate();
        Pid::new(script, sequence)
    }

    /// Releases a PID for reuse.
    pub fn release(&mut self, pid: Pid) {
        if let Some(allocator) = self.scripts.get_mut(&pid.script) {
            allocator.release(pid.sequence);
        }
    }
}
