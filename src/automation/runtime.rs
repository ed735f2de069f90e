//! Script catalog and process table.
//!
//! The [`Runtime`] keeps every compiled script by id, every live run by
//! [`Pid`], and the turnout event handlers keyed by `(turnout, state)`.
//! Source text is the only thing persisted; scripts are compiled again on
//! load.
//!
//! Every change to the process table is broadcast as
//! `automation/fetchRunningResponse`; every catalog change as
//! `automation/fetchAllResponse`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::commands::{AutomationScript, EventHandlerType, ScriptKind, ScriptTrigger};
use super::compile;
use super::error::AutomationError;
use super::runner::{AutomationStatus, ScriptRunner};
use super::scope::Scope;
use crate::allocator::{Pid, PidAllocator};
use crate::layout::turnout_map::TurnoutEventSink;
use crate::layout::{NodeId, TurnoutMap, TurnoutState};
use crate::lock::lock;
use crate::locos::{LocoError, LocoIdentifier, LocoStore, ProxyLoco, SyncLevel};
use crate::traits::{ClientBroadcast, ClientEvent, ScriptStore, StorageError, StoredScript};

/// PID root of runs started by events.
pub const EVENT_PID_ROOT: i64 = -1;

/// Runtime failures.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No script has the id.
    #[error("No script with id {0}")]
    ScriptNotFound(i64),
    /// No live run has the PID.
    #[error("No running automation with PID {0}")]
    PidNotFound(Pid),
    /// The script text did not compile.
    #[error(transparent)]
    Automation(#[from] AutomationError),
    /// Persisting the catalog failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The requested loco could not be bound.
    #[error(transparent)]
    Loco(#[from] LocoError),
}

/// Catalog entry as shown to clients.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationSummary {
    /// Script id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Script kind.
    #[serde(rename = "type")]
    pub kind: ScriptKind,
    /// Operator notes.
    pub description: String,
    /// Canonical source.
    pub source: String,
    /// Event handler category.
    pub event_handler_type: EventHandlerType,
}

impl From<&AutomationScript> for AutomationSummary {
    fn from(script: &AutomationScript) -> Self {
        Self {
            id: script.id,
            name: script.name.clone(),
            kind: script.kind,
            description: script.description.clone(),
            source: script.source.clone(),
            event_handler_type: script.event_handler_type(),
        }
    }
}

/// Live run as shown to clients.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningAutomation {
    /// Script name.
    pub name: String,
    /// Process id.
    pub pid: Pid,
    /// Script kind.
    #[serde(rename = "type")]
    pub kind: ScriptKind,
    /// Running or paused.
    pub status: AutomationStatus,
    /// Script description.
    pub description: String,
    /// Bound loco.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loco_address: Option<u16>,
}

impl From<&ScriptRunner> for RunningAutomation {
    fn from(runner: &ScriptRunner) -> Self {
        let script = runner.script();
        Self {
            name: script.name.clone(),
            pid: runner.pid(),
            kind: script.kind,
            status: runner.status(),
            description: script.description.clone(),
            loco_address: runner.loco_address(),
        }
    }
}

#[derive(Default)]
struct RuntimeState {
    catalog: BTreeMap<i64, Arc<AutomationScript>>,
    running: BTreeMap<Pid, Arc<ScriptRunner>>,
    handlers: HashMap<(NodeId, TurnoutState), Arc<AutomationScript>>,
    pids: PidAllocator,
}

impl RuntimeState {
    fn register(&mut self, script: Arc<AutomationScript>) {
        if let ScriptTrigger::Turnout { turnout, state } = script.trigger {
            self.handlers.insert((turnout, state), Arc::clone(&script));
        }
        self.catalog.insert(script.id, script);
    }

    fn unregister(&mut self, id: i64) -> Option<Arc<AutomationScript>> {
        let script = self.catalog.remove(&id)?;
        if let ScriptTrigger::Turnout { turnout, state } = script.trigger {
            self.handlers.remove(&(turnout, state));
        }
        Some(script)
    }
}

/// Owns the catalog, the process table and the event handlers.
pub struct Runtime {
    me: Weak<Runtime>,
    state: Mutex<RuntimeState>,
    turnouts: Arc<TurnoutMap>,
    locos: Arc<LocoStore>,
    store: Arc<dyn ScriptStore>,
    broadcaster: Arc<dyn ClientBroadcast>,
    default_sync: SyncLevel,
}

impl Runtime {
    /// Creates a runtime and subscribes it to turnout events from
    /// `turnouts`. Scripts bound to a loco sync at `default_sync`.
    pub fn new(
        turnouts: Arc<TurnoutMap>,
        locos: Arc<LocoStore>,
        store: Arc<dyn ScriptStore>,
        broadcaster: Arc<dyn ClientBroadcast>,
        default_sync: SyncLevel,
    ) -> Arc<Self> {
        let runtime = Arc::new_cyclic(|me: &Weak<Runtime>| Runtime {
            me: me.clone(),
            state: Mutex::new(RuntimeState::default()),
            turnouts,
            locos,
            store,
            broadcaster,
            default_sync,
        });
        let sink: Weak<dyn TurnoutEventSink> = Arc::downgrade(&runtime) as Weak<dyn TurnoutEventSink>;
        runtime.turnouts.attach_event_sink(sink);
        runtime
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    /// Compiles `text` and adds every script in it.
    ///
    /// Nothing is added when the text does not compile; the error is also
    /// broadcast as `automation/processingError`. Each script is saved and
    /// then registered, so a storage failure keeps the ones before it and
    /// never leaves an unsaved script in the catalog.
    pub fn add_script_file(&self, text: &str) -> Result<Vec<i64>, RuntimeError> {
        let scripts = compile(text).map_err(|err| {
            warn!(error = %err, location = ?err.location, "Script failed to compile");
            self.broadcaster
                .broadcast(ClientEvent::ProcessingError(err.clone()));
            err
        })?;

        let mut ids = Vec::with_capacity(scripts.len());
        let mut outcome = Ok(());
        for script in scripts {
            let row = stored(&script);
            if let Err(err) = self.store.save_script(&row) {
                warn!(id = row.id, error = %err, "Saving script failed");
                outcome = Err(err);
                break;
            }
            lock(&self.state).register(Arc::new(script));
            ids.push(row.id);
        }
        info!(?ids, "Scripts added");
        self.broadcast_catalog();
        outcome?;
        Ok(ids)
    }

    /// Compiles every stored script into the catalog.
    ///
    /// Rows that no longer compile are logged and skipped. Returns how many
    /// scripts were loaded.
    pub fn load_persistent_scripts(&self) -> Result<usize, RuntimeError> {
        let rows = self.store.load_scripts()?;
        let mut loaded = 0;
        for row in rows {
            match compile(&row.source) {
                Ok(scripts) => {
                    let mut state = lock(&self.state);
                    for mut script in scripts {
                        if !row.description.is_empty() {
                            script.description = row.description.clone();
                        }
                        state.register(Arc::new(script));
                        loaded += 1;
                    }
                }
                Err(err) => {
                    warn!(id = row.id, error = %err, "Skipping stored script that does not compile")
                }
            }
        }
        info!(count = loaded, "Loaded stored scripts");
        Ok(loaded)
    }

    /// Removes a script from the catalog and the store.
    pub fn delete_automation(&self, id: i64) -> Result<(), RuntimeError> {
        lock(&self.state)
            .unregister(id)
            .ok_or(RuntimeError::ScriptNotFound(id))?;
        self.store.delete_script(id)?;
        self.broadcast_catalog();
        Ok(())
    }

    /// Replaces a script's description.
    pub fn set_description(&self, id: i64, description: &str) -> Result<(), RuntimeError> {
        let row = {
            let mut state = lock(&self.state);
            let current = state
                .catalog
                .get(&id)
                .ok_or(RuntimeError::ScriptNotFound(id))?;
            let mut script = AutomationScript::clone(current);
            script.description = description.to_string();
            let row = stored(&script);
            state.register(Arc::new(script));
            row
        };
        self.store.save_script(&row)?;
        self.broadcast_catalog();
        Ok(())
    }

    /// One catalog entry.
    pub fn script(&self, id: i64) -> Option<Arc<AutomationScript>> {
        lock(&self.state).catalog.get(&id).cloned()
    }

    /// Every catalog entry.
    pub fn all_automations(&self) -> Vec<AutomationSummary> {
        lock(&self.state)
            .catalog
            .values()
            .map(|script| AutomationSummary::from(script.as_ref()))
            .collect()
    }

    // ========================================================================
    // Processes
    // ========================================================================

    /// Starts a catalog script.
    ///
    /// `loco` is bound for sequences and automations; routes and handlers
    /// ignore it.
    pub fn run_script(&self, id: i64, loco: Option<LocoIdentifier>) -> Result<Pid, RuntimeError> {
        let script = self.script(id).ok_or(RuntimeError::ScriptNotFound(id))?;
        let proxy = match loco {
            Some(identifier) if script.binds_loco() => {
                Some(self.locos.get_loco(&identifier, self.default_sync)?)
            }
            _ => None,
        };
        let root = script.id;
        Ok(self.start(script, proxy, root))
    }

    fn start(&self, script: Arc<AutomationScript>, loco: Option<ProxyLoco>, root: i64) -> Pid {
        let scope = Scope::new(Arc::clone(&self.turnouts), loco);
        let runner = {
            let mut state = lock(&self.state);
            let pid = state.pids.allocate(root);
            let runner = Arc::new(ScriptRunner::new(pid, script, scope));
            state.running.insert(pid, Arc::clone(&runner));
            runner
        };
        let pid = runner.pid();
        info!(%pid, script = %runner.script().label(), "Running script");
        self.broadcast_running();

        let me = self.me.clone();
        tokio::spawn(async move {
            runner.run().await;
            if let Some(runtime) = me.upgrade() {
                runtime.finished(&runner);
            }
        });
        pid
    }

    fn finished(&self, runner: &Arc<ScriptRunner>) {
        let pid = runner.pid();
        let removed = {
            let mut state = lock(&self.state);
            match state.running.get(&pid) {
                Some(live) if Arc::ptr_eq(live, runner) => {
                    state.running.remove(&pid);
                    state.pids.release(pid);
                    true
                }
                _ => false,
            }
        };
        if removed {
            debug!(%pid, "Run finished");
            self.broadcast_running();
        }
    }

    /// Live run by PID.
    pub fn runner(&self, pid: Pid) -> Option<Arc<ScriptRunner>> {
        lock(&self.state).running.get(&pid).cloned()
    }

    /// Every live run.
    pub fn running_automations(&self) -> Vec<RunningAutomation> {
        lock(&self.state)
            .running
            .values()
            .map(|runner| RunningAutomation::from(runner.as_ref()))
            .collect()
    }

    /// Pauses a run and emergency-stops its loco.
    pub async fn pause_automation(&self, pid: Pid) -> Result<(), RuntimeError> {
        let runner = self.runner(pid).ok_or(RuntimeError::PidNotFound(pid))?;
        runner.pause().await;
        self.broadcast_running();
        Ok(())
    }

    /// Resumes a paused run in the background.
    pub fn resume_automation(&self, pid: Pid) -> Result<(), RuntimeError> {
        let runner = self.runner(pid).ok_or(RuntimeError::PidNotFound(pid))?;
        let me = self.me.clone();
        tokio::spawn(async move {
            if let Err(err) = runner.resume().await {
                warn!(%pid, error = %err, "Replay after pause failed");
            }
            if let Some(runtime) = me.upgrade() {
                runtime.broadcast_running();
            }
        });
        self.broadcast_running();
        Ok(())
    }

    /// Stops a run, drops it from the table and stops its loco.
    pub async fn stop_automation(&self, pid: Pid) -> Result<(), RuntimeError> {
        let runner = {
            let mut state = lock(&self.state);
            let runner = state
                .running
                .remove(&pid)
                .ok_or(RuntimeError::PidNotFound(pid))?;
            state.pids.release(pid);
            runner
        };
        runner.stop();
        self.broadcast_running();

        if let Some(address) = runner.loco_address() {
            let stopped = match self
                .locos
                .get_loco(&LocoIdentifier::Address(address), SyncLevel::All)
            {
                Ok(loco) => loco.emergency_stop().await,
                Err(err) => Err(err),
            };
            if let Err(err) = stopped {
                warn!(%pid, address, error = %err, "Could not stop loco of stopped automation");
            }
        }
        Ok(())
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Starts the handler for `event` (`turnout/<throw|close>/<id>`).
    ///
    /// Returns the new PID, or `None` when no handler matches.
    pub fn trigger_event(&self, event: &str) -> Option<Pid> {
        let event = event.to_lowercase();
        let parts: Vec<&str> = event.split('/').collect();
        let key = match parts.as_slice() {
            ["turnout", verb, id] => {
                let state = match *verb {
                    "throw" => TurnoutState::Thrown,
                    "close" => TurnoutState::Closed,
                    _ => return None,
                };
                (id.trim().parse::<NodeId>().ok()?, state)
            }
            _ => return None,
        };
        let handler = lock(&self.state).handlers.get(&key).cloned()?;
        debug!(%event, handler = %handler.label(), "Turnout event");
        Some(self.start(handler, None, EVENT_PID_ROOT))
    }

    // ========================================================================
    // Broadcasts
    // ========================================================================

    fn broadcast_running(&self) {
        self.broadcaster
            .broadcast(ClientEvent::RunningAutomations(self.running_automations()));
    }

    fn broadcast_catalog(&self) {
        self.broadcaster
            .broadcast(ClientEvent::AutomationList(self.all_automations()));
    }
}

impl TurnoutEventSink for Runtime {
    fn trigger_event(&self, event: &str) {
        match Runtime::trigger_event(self, event) {
            Some(pid) => debug!(%event, %pid, "Handler started"),
            None => debug!(%event, "No handler for event"),
        }
    }
}

fn stored(script: &AutomationScript) -> StoredScript {
    StoredScript {
        id: script.id,
        name: script.name.clone(),
        source: script.source.clone(),
        description: script.description.clone(),
    }
}
