//! One run of one script.
//!
//! A [`ScriptRunner`] pairs a script with the [`Scope`] of a single run and
//! implements the pause protocol:
//!
//! - **pause** publishes [`RunState::Paused`], cuts a running `DELAY` short
//!   and emergency-stops the bound loco through a detached scope so the
//!   run's own log stays intact.
//! - **resume** replays the command that was interrupted. When it was a
//!   `DELAY`, only the time that had not yet elapsed at the pause is
//!   waited. Commands that were held back start once the replay is done.
//! - **stop** is final and cooperative: commands that have not started yet
//!   become no-ops, a `DELAY` in progress runs to the end.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use super::commands::{AutomationScript, Command};
use super::error::AutomationError;
use super::scope::{RunState, Scope};
use crate::allocator::Pid;
use crate::lock::lock;

/// Run status reported to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationStatus {
    /// Executing or resuming.
    Running,
    /// Held by a pause.
    Paused,
}

/// Drives one script run.
pub struct ScriptRunner {
    pid: Pid,
    script: Arc<AutomationScript>,
    scope: Scope,
    pause_time: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for ScriptRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRunner")
            .field("pid", &self.pid)
            .field("script", &self.script.label())
            .field("state", &self.scope.run_state())
            .finish()
    }
}

impl ScriptRunner {
    /// Creates a runner; nothing executes until [`run`](Self::run).
    pub fn new(pid: Pid, script: Arc<AutomationScript>, scope: Scope) -> Self {
        Self {
            pid,
            script,
            scope,
            pause_time: Mutex::new(None),
        }
    }

    /// Process id.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Script being run.
    pub fn script(&self) -> &Arc<AutomationScript> {
        &self.script
    }

    /// Scope of this run.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Address of the bound loco.
    pub fn loco_address(&self) -> Option<u16> {
        self.scope.loco().map(|loco| loco.address())
    }

    /// Executes the script to the end, or until stopped.
    pub async fn run(&self) {
        info!(pid = %self.pid, script = %self.script.label(), "ScriptRunner running");
        self.script.execute(&self.scope).await;
        info!(pid = %self.pid, "ScriptRunner finished");
    }

    /// Stops the run for good.
    pub fn stop(&self) {
        info!(pid = %self.pid, "Stopping automation");
        self.scope.stop();
    }

    /// Pauses a running run and emergency-stops its loco.
    ///
    /// Does nothing when the run is stopped, already paused or resuming.
    pub async fn pause(&self) {
        if self.scope.is_stopped() || !self.scope.transition(RunState::Running, RunState::Paused) {
            return;
        }
        *lock(&self.pause_time) = Some(Instant::now());
        info!(pid = %self.pid, current = ?self.scope.current_command(), "Pausing automation");
        Command::Estop.execute(&self.scope.detached()).await;
    }

    /// Resumes a paused run.
    ///
    /// Returns the replayed script text, or `None` when nothing needed
    /// replaying or the run was not paused.
    pub async fn resume(&self) -> Result<Option<String>, AutomationError> {
        if !self.scope.transition(RunState::Paused, RunState::Resuming) {
            return Ok(None);
        }
        let replay = self.replay_text();
        if let Some(text) = &replay {
            info!(pid = %self.pid, replay = %text, "Resuming automation");
            let scripts = match super::compile(text) {
                Ok(scripts) => scripts,
                Err(err) => {
                    self.scope.transition(RunState::Resuming, RunState::Running);
                    return Err(err);
                }
            };
            if let Some(script) = scripts.first() {
                script.execute(&self.scope.replay_view()).await;
            }
        }
        self.scope.transition(RunState::Resuming, RunState::Running);
        Ok(replay)
    }

    /// Builds `AUTOMATION(0) <interrupted command> DONE`.
    fn replay_text(&self) -> Option<String> {
        let mut items = self.scope.current_command();
        if items.iter().all(|item| item.trim().is_empty()) {
            return None;
        }

        if let [_, delay] = items.as_mut_slice() {
            if let Some(declared) = delay_millis(delay) {
                let pause_time = *lock(&self.pause_time);
                let elapsed = match (pause_time, self.scope.last_start()) {
                    (Some(paused), Some(started)) => {
                        paused.saturating_duration_since(started).as_millis() as i64
                    }
                    _ => 0,
                };
                let remaining = (declared - elapsed).max(0);
                debug!(declared, elapsed, remaining, "Delay remaining after pause");
                *delay = format!("DELAY({})", remaining);
            }
        }

        let body = items
            .iter()
            .filter(|item| !item.trim().is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        Some(format!("AUTOMATION(0) {} DONE", body))
    }

    /// Client-facing status.
    pub fn status(&self) -> AutomationStatus {
        match self.scope.run_state() {
            RunState::Paused => AutomationStatus::Paused,
            RunState::Running | RunState::Resuming => AutomationStatus::Running,
        }
    }
}

fn delay_millis(text: &str) -> Option<i64> {
    text.trim()
        .strip_prefix("DELAY(")?
        .strip_suffix(')')?
        .trim()
        .parse()
        .ok()
}
