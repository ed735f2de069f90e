//! The command tree and how each command executes.
//!
//! | Opcode | Effect |
//! |--------|--------|
//! | `FWD(s)` / `REV(s)` | Drive the bound loco at speed `s`; `-1` is an emergency stop |
//! | `SPEED(s)` | Change speed, keep direction |
//! | `STOP` | Speed 0 |
//! | `ESTOP` | Emergency stop |
//! | `FON(n)` / `FOFF(n)` | Switch function `n` |
//! | `THROW(t)` / `CLOSE(t)` | Set turnout `t` |
//! | `DELAY(ms)` | Wait |
//! | `IFTHROWN(t) ... ENDIF` | Run the body if turnout `t` is thrown |
//! | `IFCLOSED(t) ... ENDIF` | Run the body if turnout `t` is closed |
//!
//! Top-level forms are `SEQUENCE(id, name?)`, `ROUTE(id, name?)`,
//! `AUTOMATION(id, name?)` and the turnout event handlers `ONCLOSE(t)` and
//! `ONTHROW(t)`, each closed by `DONE` (or `ENDTASK`).
//!
//! Every command serializes back to canonical script text; parsing that text
//! gives the same tree.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::scope::{CommandRecord, Scope};
use crate::layout::{NodeId, TurnoutState};
use crate::locos::{LocoError, MAX_FUNCTION, MAX_SPEED};
use crate::traits::Direction;

const INDENT: &str = "    ";

/// Future returned by [`Command::execute`].
pub type CommandFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

// ============================================================================
// Commands
// ============================================================================

/// One step of a script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `FWD(speed)`
    Fwd(i64),
    /// `REV(speed)`
    Rev(i64),
    /// `SPEED(speed)`
    Speed(i64),
    /// `STOP`
    Stop,
    /// `ESTOP`
    Estop,
    /// `FON(function)`
    Fon(i64),
    /// `FOFF(function)`
    Foff(i64),
    /// `THROW(turnout)`
    Throw(NodeId),
    /// `CLOSE(turnout)`
    Close(NodeId),
    /// `DELAY(milliseconds)`
    Delay(i64),
    /// `IFTHROWN(turnout) ... ENDIF`
    IfThrown {
        /// Turnout to test.
        turnout: NodeId,
        /// Body.
        children: Vec<Command>,
    },
    /// `IFCLOSED(turnout) ... ENDIF`
    IfClosed {
        /// Turnout to test.
        turnout: NodeId,
        /// Body.
        children: Vec<Command>,
    },
}

fn clamp_speed(speed: i64) -> u8 {
    speed.clamp(0, i64::from(MAX_SPEED)) as u8
}

fn log_loco_error(command: &Command, err: LocoError) {
    warn!(command = %command, error = %err, "Loco command failed");
}

impl Command {
    /// Runs the command against `scope`.
    pub fn execute<'a>(&'a self, scope: &'a Scope) -> CommandFuture<'a> {
        Box::pin(async move {
            let record = match self {
                Command::Delay(_) => CommandRecord::Delay(self.to_string()),
                _ => CommandRecord::Simple(self.to_string()),
            };
            if !scope.begin(record).await {
                return;
            }

            match self {
                Command::Fwd(speed) => drive(self, scope, Direction::Forward, *speed).await,
                Command::Rev(speed) => drive(self, scope, Direction::Reverse, *speed).await,
                Command::Speed(speed) => {
                    if let Some(loco) = scope.loco() {
                        debug!(address = loco.address(), speed, "Set speed");
                        if let Err(err) = loco.set_speed(clamp_speed(*speed)).await {
                            log_loco_error(self, err);
                        }
                    }
                }
                Command::Stop => {
                    if let Some(loco) = scope.loco() {
                        debug!(address = loco.address(), "Stopping loco");
                        if let Err(err) = loco.set_speed(0).await {
                            log_loco_error(self, err);
                        }
                    }
                }
                Command::Estop => estop(self, scope).await,
                Command::Fon(function) => switch_function(self, scope, *function, true).await,
                Command::Foff(function) => switch_function(self, scope, *function, false).await,
                Command::Throw(id) => set_turnout(scope, *id, TurnoutState::Thrown).await,
                Command::Close(id) => set_turnout(scope, *id, TurnoutState::Closed).await,
                Command::Delay(ms) => {
                    let ms = (*ms).max(0) as u64;
                    debug!(ms, "Pausing");
                    scope.sleep(Duration::from_millis(ms)).await;
                }
                Command::IfThrown { turnout, children } => {
                    run_if(scope, *turnout, TurnoutState::Thrown, children).await
                }
                Command::IfClosed { turnout, children } => {
                    run_if(scope, *turnout, TurnoutState::Closed, children).await
                }
            }
        })
    }

    /// Opcode keyword.
    pub const fn keyword(&self) -> &'static str {
        match self {
            Command::Fwd(_) => "FWD",
            Command::Rev(_) => "REV",
            Command::Speed(_) => "SPEED",
            Command::Stop => "STOP",
            Command::Estop => "ESTOP",
            Command::Fon(_) => "FON",
            Command::Foff(_) => "FOFF",
            Command::Throw(_) => "THROW",
            Command::Close(_) => "CLOSE",
            Command::Delay(_) => "DELAY",
            Command::IfThrown { .. } => "IFTHROWN",
            Command::IfClosed { .. } => "IFCLOSED",
        }
    }

    fn write_indented(&self, out: &mut String, depth: usize) {
        let pad = INDENT.repeat(depth);
        out.push_str(&pad);
        match self {
            Command::Stop | Command::Estop => out.push_str(self.keyword()),
            Command::Fwd(n)
            | Command::Rev(n)
            | Command::Speed(n)
            | Command::Fon(n)
            | Command::Foff(n)
            | Command::Throw(n)
            | Command::Close(n)
            | Command::Delay(n) => out.push_str(&format!("{}({})", self.keyword(), n)),
            Command::IfThrown { turnout, children } | Command::IfClosed { turnout, children } => {
                out.push_str(&format!("{}({})", self.keyword(), turnout));
                for child in children {
                    out.push('\n');
                    child.write_indented(out, depth + 1);
                }
                out.push('\n');
                out.push_str(&pad);
                out.push_str("ENDIF");
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_indented(&mut out, 0);
        f.write_str(&out)
    }
}

async fn drive(command: &Command, scope: &Scope, direction: Direction, speed: i64) {
    let Some(loco) = scope.loco() else { return };
    if speed == -1 {
        estop(command, scope).await;
        return;
    }
    debug!(address = loco.address(), speed, direction = direction.as_str(), "Move loco");
    if let Err(err) = loco.drive(direction, clamp_speed(speed)).await {
        log_loco_error(command, err);
    }
}

async fn estop(command: &Command, scope: &Scope) {
    let Some(loco) = scope.loco() else { return };
    info!(address = loco.address(), "Estop loco");
    if let Err(err) = loco.emergency_stop().await {
        log_loco_error(command, err);
    }
}

async fn switch_function(command: &Command, scope: &Scope, function: i64, on: bool) {
    let Some(loco) = scope.loco() else { return };
    let Ok(function) = u8::try_from(function) else {
        warn!(function, "Function number out of range (0-{})", MAX_FUNCTION);
        return;
    };
    if let Err(err) = loco.set_function(function, on).await {
        log_loco_error(command, err);
    }
}

async fn set_turnout(scope: &Scope, id: NodeId, state: TurnoutState) {
    info!(turnout = id, state = state.as_str(), "Set turnout");
    if let Err(err) = scope.turnouts().set_turnout(id, state).await {
        warn!(turnout = id, error = %err, "Turnout command failed");
    }
}

async fn run_if(scope: &Scope, turnout: NodeId, wanted: TurnoutState, children: &[Command]) {
    match scope.turnouts().turnout_state(turnout) {
        Some(state) if state == wanted => {
            for child in children {
                child.execute(scope).await;
            }
        }
        Some(_) => {}
        None => warn!(turnout, "Condition on unknown turnout"),
    }
}

// ============================================================================
// Scripts
// ============================================================================

/// Kind of top-level script.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScriptKind {
    /// `SEQUENCE`: a loco-bound series of moves.
    Sequence,
    /// `ROUTE`: sets turnouts, never bound to a loco.
    Route,
    /// `AUTOMATION`: a loco-bound task.
    Automation,
    /// `ONCLOSE`/`ONTHROW`: started by a turnout event.
    EventHandler,
}

/// Whether a script is started by an event, and which kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventHandlerType {
    /// Started by users.
    None,
    /// Started by a turnout changing state.
    Turnout,
}

/// What starts a script.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptTrigger {
    /// Started on request.
    Manual,
    /// Started when `turnout` reaches `state`.
    Turnout {
        /// Watched turnout.
        turnout: NodeId,
        /// State that fires the handler.
        state: TurnoutState,
    },
}

/// Default description for new scripts.
pub const DEFAULT_DESCRIPTION: &str = "Add a description";

/// Catalog id of the handler for `turnout` reaching `state`.
///
/// Handler ids are negative so they never collide with user ids:
/// `ONCLOSE(t)` is `-(2t+1)`, `ONTHROW(t)` is `-(2t+2)`.
pub const fn handler_id(turnout: NodeId, state: TurnoutState) -> i64 {
    match state {
        TurnoutState::Closed => -(2 * turnout + 1),
        TurnoutState::Thrown => -(2 * turnout + 2),
    }
}

/// A compiled top-level script.
#[derive(Clone, Debug, PartialEq)]
pub struct AutomationScript {
    /// Catalog id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Free text set by users.
    pub description: String,
    /// Kind.
    pub kind: ScriptKind,
    /// What starts it.
    pub trigger: ScriptTrigger,
    /// Body.
    pub children: Vec<Command>,
    /// Canonical source text.
    pub source: String,
}

impl AutomationScript {
    /// Creates a user-started script. An empty name becomes `"<Kind> <id>"`.
    pub fn new(kind: ScriptKind, id: i64, name: &str, children: Vec<Command>) -> Self {
        let name = if name.trim().is_empty() {
            match kind {
                ScriptKind::Sequence => format!("Sequence {}", id),
                ScriptKind::Route => format!("Route {}", id),
                _ => format!("Automation {}", id),
            }
        } else {
            name.to_string()
        };
        let mut script = Self {
            id,
            name,
            description: DEFAULT_DESCRIPTION.to_string(),
            kind,
            trigger: ScriptTrigger::Manual,
            children,
            source: String::new(),
        };
        script.create_source();
        script
    }

    /// Creates a turnout event handler.
    pub fn event_handler(turnout: NodeId, state: TurnoutState, children: Vec<Command>) -> Self {
        let keyword = match state {
            TurnoutState::Closed => "ONCLOSE",
            TurnoutState::Thrown => "ONTHROW",
        };
        let mut script = Self {
            id: handler_id(turnout, state),
            name: format!("{} {}", keyword, turnout),
            description: DEFAULT_DESCRIPTION.to_string(),
            kind: ScriptKind::EventHandler,
            trigger: ScriptTrigger::Turnout { turnout, state },
            children,
            source: String::new(),
        };
        script.create_source();
        script
    }

    /// Opening keyword.
    pub const fn keyword(&self) -> &'static str {
        match (self.kind, self.trigger) {
            (_, ScriptTrigger::Turnout { state: TurnoutState::Closed, .. }) => "ONCLOSE",
            (_, ScriptTrigger::Turnout { state: TurnoutState::Thrown, .. }) => "ONTHROW",
            (ScriptKind::Sequence, _) => "SEQUENCE",
            (ScriptKind::Route, _) => "ROUTE",
            _ => "AUTOMATION",
        }
    }

    /// `"<KEYWORD> <id>"`, used in error locations.
    pub fn label(&self) -> String {
        match self.trigger {
            ScriptTrigger::Turnout { turnout, .. } => format!("{} {}", self.keyword(), turnout),
            ScriptTrigger::Manual => format!("{} {}", self.keyword(), self.id),
        }
    }

    /// Event handler category.
    pub const fn event_handler_type(&self) -> EventHandlerType {
        match self.trigger {
            ScriptTrigger::Manual => EventHandlerType::None,
            ScriptTrigger::Turnout { .. } => EventHandlerType::Turnout,
        }
    }

    /// Whether runs of this script drive a loco.
    pub const fn binds_loco(&self) -> bool {
        matches!(self.kind, ScriptKind::Sequence | ScriptKind::Automation)
    }

    /// Regenerates [`source`](Self::source) from the tree.
    pub fn create_source(&mut self) {
        self.source = self.to_string();
    }

    /// Runs every child in order.
    pub async fn execute(&self, scope: &Scope) {
        info!(script = %self.label(), "Script running");
        for child in &self.children {
            child.execute(scope).await;
        }
        info!(script = %self.label(), "Script finished");
    }
}

impl fmt::Display for AutomationScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.trigger {
            ScriptTrigger::Turnout { turnout, .. } => write!(f, "{}({})", self.keyword(), turnout)?,
            ScriptTrigger::Manual => {
                let name = self.name.replace(['"', '\''], "").replace("//", "\\//");
                write!(f, "{}({}, \"{}\")", self.keyword(), self.id, name)?
            }
        }
        let mut body = String::new();
        for child in &self.children {
            body.push('\n');
            child.write_indented(&mut body, 1);
        }
        write!(f, "{}\nDONE", body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_text() {
        assert_eq!(Command::Fwd(50).to_string(), "FWD(50)");
        assert_eq!(Command::Estop.to_string(), "ESTOP");
        assert_eq!(Command::Delay(250).to_string(), "DELAY(250)");
    }

    #[test]
    fn nested_text_is_indented() {
        let script = AutomationScript::new(
            ScriptKind::Automation,
            2,
            "",
            vec![
                Command::Throw(5),
                Command::IfThrown {
                    turnout: 5,
                    children: vec![Command::Fwd(80)],
                },
            ],
        );
        assert_eq!(
            script.source,
            "AUTOMATION(2, \"Automation 2\")\n    THROW(5)\n    IFTHROWN(5)\n        FWD(80)\n    ENDIF\nDONE"
        );
    }

    #[test]
    fn handler_ids_are_negative_and_distinct() {
        assert_eq!(handler_id(0, TurnoutState::Closed), -1);
        assert_eq!(handler_id(0, TurnoutState::Thrown), -2);
        assert_eq!(handler_id(7, TurnoutState::Closed), -15);
        assert_eq!(handler_id(7, TurnoutState::Thrown), -16);
    }

    #[test]
    fn handler_source_and_metadata() {
        let script = AutomationScript::event_handler(7, TurnoutState::Thrown, vec![Command::Close(8)]);
        assert_eq!(script.source, "ONTHROW(7)\n    CLOSE(8)\nDONE");
        assert_eq!(script.event_handler_type(), EventHandlerType::Turnout);
        assert_eq!(script.label(), "ONTHROW 7");
        assert!(!script.binds_loco());
    }

    #[test]
    fn names_are_escaped_for_the_lexer() {
        let script = AutomationScript::new(ScriptKind::Route, 4, "Yard // east", vec![]);
        assert_eq!(script.source, "ROUTE(4, \"Yard \\// east\")\nDONE");
    }

    #[test]
    fn loco_binding_by_kind() {
        assert!(AutomationScript::new(ScriptKind::Sequence, 1, "", vec![]).binds_loco());
        assert!(AutomationScript::new(ScriptKind::Automation, 1, "", vec![]).binds_loco());
        assert!(!AutomationScript::new(ScriptKind::Route, 1, "", vec![]).binds_loco());
    }
}
