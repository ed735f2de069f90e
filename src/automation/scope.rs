//! Per-run execution context.
//!
//! A [`Scope`] is shared by every command of one run. It carries:
//!
//! - the run state, published on a `watch` channel so paused commands can
//!   wait for it to change,
//! - a stop flag that is never cleared,
//! - the loco bound to the run, if any, and the shared turnout map,
//! - an execution log: start time of every command and the text of the
//!   command (or command pair, for `DELAY`) that started last. Resuming a
//!   paused run replays that text.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::layout::TurnoutMap;
use crate::lock::lock;
use crate::locos::ProxyLoco;

/// Where a run is in its pause cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Commands execute normally.
    Running,
    /// Commands wait before starting.
    Paused,
    /// The interrupted command is being replayed; regular commands still wait.
    Resuming,
}

/// What a command writes into the current-command slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandRecord {
    /// Replaces the slot.
    Simple(String),
    /// Keeps the preceding command and adds the delay after it.
    Delay(String),
}

#[derive(Debug, Default)]
struct ExecutionLog {
    start_times: Vec<Instant>,
    current: heapless::Vec<String, 2>,
}

struct ScopeShared {
    state: watch::Sender<RunState>,
    stopped: AtomicBool,
    loco: Option<ProxyLoco>,
    turnouts: Arc<TurnoutMap>,
    log: Mutex<ExecutionLog>,
}

/// Mutable context threaded through one run.
///
/// Clones are views of the same run. A view is either suspendable (commands
/// wait while the run is paused) or not (used for replays and the pause
/// emergency stop).
#[derive(Clone)]
pub struct Scope {
    shared: Arc<ScopeShared>,
    suspendable: bool,
}

impl Scope {
    /// Creates a running scope.
    pub fn new(turnouts: Arc<TurnoutMap>, loco: Option<ProxyLoco>) -> Self {
        let (state, _) = watch::channel(RunState::Running);
        Self {
            shared: Arc::new(ScopeShared {
                state,
                stopped: AtomicBool::new(false),
                loco,
                turnouts,
                log: Mutex::new(ExecutionLog::default()),
            }),
            suspendable: true,
        }
    }

    /// A separate scope over the same loco and turnouts with its own log.
    /// Commands run through it never wait and never touch this run's log.
    pub fn detached(&self) -> Scope {
        let mut scope = Scope::new(
            Arc::clone(&self.shared.turnouts),
            self.shared.loco.clone(),
        );
        scope.suspendable = false;
        scope
    }

    /// A non-suspendable view of this run.
    pub fn replay_view(&self) -> Scope {
        Scope {
            shared: Arc::clone(&self.shared),
            suspendable: false,
        }
    }

    /// Bound loco.
    pub fn loco(&self) -> Option<&ProxyLoco> {
        self.shared.loco.as_ref()
    }

    /// Shared turnout map.
    pub fn turnouts(&self) -> &Arc<TurnoutMap> {
        &self.shared.turnouts
    }

    /// Whether the run was stopped.
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Current run state.
    pub fn run_state(&self) -> RunState {
        *self.shared.state.borrow()
    }

    /// Publishes a new run state.
    pub fn set_run_state(&self, state: RunState) {
        self.shared.state.send_replace(state);
    }

    /// Moves `from` to `to` only if the state is still `from`.
    pub fn transition(&self, from: RunState, to: RunState) -> bool {
        self.shared.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Stops the run for good and wakes anything waiting on the run state.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.state.send_modify(|_| {});
    }

    /// Start time of every command so far.
    pub fn start_times(&self) -> Vec<Instant> {
        lock(&self.shared.log).start_times.clone()
    }

    /// Start time of the last command.
    pub fn last_start(&self) -> Option<Instant> {
        lock(&self.shared.log).start_times.last().copied()
    }

    /// Text of the command(s) that started last.
    pub fn current_command(&self) -> Vec<String> {
        lock(&self.shared.log).current.iter().cloned().collect()
    }

    /// Pre-execute protocol shared by every command.
    ///
    /// Returns `false` when the command must not run. A paused run blocks
    /// here until it is running again or stopped.
    pub async fn begin(&self, record: CommandRecord) -> bool {
        if self.is_stopped() {
            return false;
        }
        if self.suspendable {
            let mut rx = self.shared.state.subscribe();
            let stopped = &self.shared.stopped;
            // The sender lives as long as `self`, so this cannot fail.
            let _ = rx
                .wait_for(|state| *state == RunState::Running || stopped.load(Ordering::SeqCst))
                .await;
            if self.is_stopped() {
                return false;
            }
        }
        self.record(record);
        true
    }

    fn record(&self, record: CommandRecord) {
        let mut log = lock(&self.shared.log);
        log.start_times.push(Instant::now());
        match record {
            CommandRecord::Simple(text) => {
                log.current.clear();
                let _ = log.current.push(text);
            }
            CommandRecord::Delay(text) => {
                if log.current.is_empty() {
                    let _ = log.current.push(String::new());
                }
                log.current.truncate(1);
                let _ = log.current.push(text);
            }
        }
    }

    /// Sleeps for `duration`. On a suspendable view a pause ends the sleep
    /// early; the remainder is replayed on resume.
    pub async fn sleep(&self, duration: Duration) {
        if !self.suspendable {
            tokio::time::sleep(duration).await;
            return;
        }
        let mut rx = self.shared.state.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = rx.wait_for(|state| *state == RunState::Paused) => {}
        }
    }
}
