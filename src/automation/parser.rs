//! [`Symbol`]s to [`AutomationScript`]s.
//!
//! The parser consumes symbols front to back. Each script opens with one of
//! the top-level forms; bodies nest through `IFTHROWN`/`IFCLOSED` and are
//! closed by `DONE`, `ENDTASK` or `ENDIF`. Every opcode declares its
//! parameter signature in [`Opcode::params`] and arguments are checked
//! against it before a command is built.
//!
//! # Example
//!
//! ```rust
//! use rs_trainlink::automation::{lexer::lex, parser::parse, Command};
//!
//! let scripts = parse(lex("SEQUENCE(1) FWD(50) DELAY(200) STOP DONE").unwrap()).unwrap();
//! assert_eq!(scripts[0].id, 1);
//! assert_eq!(
//!     scripts[0].children,
//!     vec![Command::Fwd(50), Command::Delay(200), Command::Stop]
//! );
//! ```

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use super::commands::{handler_id, AutomationScript, Command, ScriptKind};
use super::error::{AutomationError, Result};
use super::lexer::Symbol;
use crate::layout::{NodeId, TurnoutState};

/// Parameter type in an opcode signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Param {
    /// Integer, required.
    Number,
    /// Free text, optional.
    OptionalText,
}

impl Param {
    const fn name(&self) -> &'static str {
        match self {
            Param::Number => "number",
            Param::OptionalText => "string",
        }
    }

    const fn required(&self) -> bool {
        matches!(self, Param::Number)
    }
}

const NONE: &[Param] = &[];
const NUMBER: &[Param] = &[Param::Number];
const SCRIPT_HEADER: &[Param] = &[Param::Number, Param::OptionalText];

/// Every opcode the parser understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    /// `SEQUENCE(id, name?)`
    Sequence,
    /// `ROUTE(id, name?)`
    Route,
    /// `AUTOMATION(id, name?)`
    Automation,
    /// `ONCLOSE(turnout)`
    OnClose,
    /// `ONTHROW(turnout)`
    OnThrow,
    /// `FWD(speed)`
    Fwd,
    /// `REV(speed)`
    Rev,
    /// `SPEED(speed)`
    Speed,
    /// `STOP`
    Stop,
    /// `ESTOP`
    Estop,
    /// `FON(function)`
    Fon,
    /// `FOFF(function)`
    Foff,
    /// `THROW(turnout)`
    Throw,
    /// `CLOSE(turnout)`
    Close,
    /// `DELAY(ms)`
    Delay,
    /// `IFTHROWN(turnout)`
    IfThrown,
    /// `IFCLOSED(turnout)`
    IfClosed,
    /// `DONE`
    Done,
    /// `ENDTASK`
    EndTask,
    /// `ENDIF`
    EndIf,
}

impl Opcode {
    /// Looks up an upper-case keyword.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "SEQUENCE" => Opcode::Sequence,
            "ROUTE" => Opcode::Route,
            "AUTOMATION" => Opcode::Automation,
            "ONCLOSE" => Opcode::OnClose,
            "ONTHROW" => Opcode::OnThrow,
            "FWD" => Opcode::Fwd,
            "REV" => Opcode::Rev,
            "SPEED" => Opcode::Speed,
            "STOP" => Opcode::Stop,
            "ESTOP" => Opcode::Estop,
            "FON" => Opcode::Fon,
            "FOFF" => Opcode::Foff,
            "THROW" => Opcode::Throw,
            "CLOSE" => Opcode::Close,
            "DELAY" => Opcode::Delay,
            "IFTHROWN" => Opcode::IfThrown,
            "IFCLOSED" => Opcode::IfClosed,
            "DONE" => Opcode::Done,
            "ENDTASK" => Opcode::EndTask,
            "ENDIF" => Opcode::EndIf,
            _ => return None,
        })
    }

    /// Declared parameter signature.
    pub const fn params(&self) -> &'static [Param] {
        match self {
            Opcode::Sequence | Opcode::Route | Opcode::Automation => SCRIPT_HEADER,
            Opcode::Stop | Opcode::Estop | Opcode::Done | Opcode::EndTask | Opcode::EndIf => NONE,
            _ => NUMBER,
        }
    }

    /// Whether the opcode starts a script.
    pub const fn is_top_level(&self) -> bool {
        matches!(
            self,
            Opcode::Sequence | Opcode::Route | Opcode::Automation | Opcode::OnClose | Opcode::OnThrow
        )
    }
}

/// Opcodes from the wider EX-RAIL vocabulary that are recognised but not
/// supported.
pub const UNIMPLEMENTED: &[&str] = &[
    "AFTER", "ALIAS", "AMBER", "AT", "ATTIMEOUT", "CALL", "DELAYMINS", "DELAYRANDOM", "ENDEXE",
    "FADE", "FOLLOW", "FREE", "GREEN", "IF", "IFNOT", "IFRANDOM", "IFRESERVE", "IFTIMEOUT",
    "INVERT_DIRECTION", "JOIN", "LATCH", "LCD", "ONACTIVATE", "ONDEACTIVATE", "PAUSE", "POWEROFF",
    "POWERON", "PRINT", "READ_LOCO", "RED", "RESERVE", "RESET", "RESUME", "RETURN", "ROSTER",
    "SENDLOCO", "SERIAL", "SERVO", "SET", "SETLOCO", "SIGNAL", "START", "TURNOUT", "UNJOIN",
    "UNLATCH",
];

/// Parses every script in `symbols`.
///
/// Ids must be unique across the whole call. The first error aborts the
/// parse.
pub fn parse(symbols: Vec<Symbol>) -> Result<Vec<AutomationScript>> {
    let mut input: VecDeque<Symbol> = symbols.into();
    let mut taken = HashSet::new();
    let mut scripts = Vec::new();
    while let Some(front) = input.front() {
        if is_closer(&front.name) {
            // A surplus closer after a finished script has nothing to close.
            debug!(symbol = %front, "Skipping stray closer");
            input.pop_front();
            continue;
        }
        scripts.push(parse_script(&mut input, &mut taken)?);
    }
    Ok(scripts)
}

fn is_closer(name: &str) -> bool {
    matches!(
        Opcode::from_name(name),
        Some(Opcode::Done | Opcode::EndTask | Opcode::EndIf)
    )
}

/// Checks `args` against `params`.
pub fn verify_params(location: &str, params: &[Param], args: &[String]) -> Result<()> {
    let fail = |message: String| Err(AutomationError::syntax(message).at(location));

    if params.is_empty() && !args.is_empty() {
        return fail(format!(
            "Unexpected parameters given ({} given but none needed)",
            args.len()
        ));
    }
    let required = params.iter().filter(|p| p.required()).count();
    if args.len() < required || args.len() > params.len() {
        return fail(format!(
            "Wrong number of arguments given ({} instead of {})",
            args.len(),
            params.len()
        ));
    }
    for (index, (param, arg)) in params.iter().zip(args).enumerate() {
        if *param == Param::Number && arg.trim().parse::<i64>().is_err() {
            return fail(format!(
                "Incorrect data type for argument {} (Should be a {} but \"{}\" was given)",
                index + 1,
                param.name(),
                arg
            ));
        }
    }
    Ok(())
}

fn number(args: &[String], index: usize) -> i64 {
    // Only called after verify_params.
    args.get(index)
        .and_then(|a| a.trim().parse().ok())
        .unwrap_or_default()
}

/// An open body: the root or an `IF` block.
struct Frame {
    condition: Option<(NodeId, TurnoutState)>,
    children: Vec<Command>,
}

struct Header {
    kind: ScriptKind,
    id: i64,
    name: String,
    handler: Option<(NodeId, TurnoutState)>,
    label: String,
}

impl Header {
    fn build(self, children: Vec<Command>) -> AutomationScript {
        match self.handler {
            Some((turnout, state)) => AutomationScript::event_handler(turnout, state, children),
            None => AutomationScript::new(self.kind, self.id, &self.name, children),
        }
    }
}

fn parse_header(symbol: &Symbol, taken: &mut HashSet<i64>) -> Result<Header> {
    let location = format!("At {}", symbol);
    let opcode = Opcode::from_name(&symbol.name)
        .filter(Opcode::is_top_level)
        .ok_or_else(|| {
            AutomationError::syntax(format!(
                "Scripts must start with SEQUENCE, ROUTE, AUTOMATION, ONCLOSE or ONTHROW but \"{}\" was given",
                symbol.name
            ))
            .at(&location)
        })?;
    verify_params(&location, opcode.params(), &symbol.args)?;

    let first = number(&symbol.args, 0);
    let (kind, handler) = match opcode {
        Opcode::Sequence => (ScriptKind::Sequence, None),
        Opcode::Route => (ScriptKind::Route, None),
        Opcode::OnClose => (ScriptKind::EventHandler, Some((first, TurnoutState::Closed))),
        Opcode::OnThrow => (ScriptKind::EventHandler, Some((first, TurnoutState::Thrown))),
        _ => (ScriptKind::Automation, None),
    };
    if first < 0 {
        return Err(AutomationError::syntax(format!(
            "The id {} is negative; ids must be 0 or above",
            first
        ))
        .at(&location));
    }
    let id = match handler {
        Some((turnout, state)) => handler_id(turnout, state),
        None => first,
    };
    if !taken.insert(id) {
        return Err(AutomationError::syntax(format!("The id {} is already being used", id)).at(&location));
    }

    let label = match handler {
        Some((turnout, _)) => format!("{} {}", symbol.name, turnout),
        None => format!("{} {}", symbol.name, id),
    };
    Ok(Header {
        kind,
        id,
        name: symbol.args.get(1).cloned().unwrap_or_default(),
        handler,
        label,
    })
}

fn parse_script(input: &mut VecDeque<Symbol>, taken: &mut HashSet<i64>) -> Result<AutomationScript> {
    let Some(first) = input.pop_front() else {
        return Err(AutomationError::syntax("Empty script"));
    };
    let header = parse_header(&first, taken)?;
    let mut stack = vec![Frame {
        condition: None,
        children: Vec::new(),
    }];

    loop {
        let Some(symbol) = input.pop_front() else {
            return Err(AutomationError::syntax("Missing DONE keyword").at(format!("At {}", header.label)));
        };
        let location = format!("At {} in {}", symbol, header.label);

        let Some(opcode) = Opcode::from_name(&symbol.name) else {
            return Err(if UNIMPLEMENTED.contains(&symbol.name.as_str()) {
                AutomationError::syntax(format!(
                    "The command \"{}\" hasn't been implemented yet so it won't work.",
                    symbol.name
                ))
                .at(format!("In {}", header.label))
            } else {
                AutomationError::syntax(format!(
                    "Unknown command \"{}\" in {}",
                    symbol.name, header.label
                ))
            });
        };
        if opcode.is_top_level() {
            return Err(AutomationError::syntax("Missing DONE keyword").at(format!("At {}", header.label)));
        }
        verify_params(&location, opcode.params(), &symbol.args)?;
        let arg = number(&symbol.args, 0);

        let command = match opcode {
            Opcode::Fwd => Command::Fwd(arg),
            Opcode::Rev => Command::Rev(arg),
            Opcode::Speed => Command::Speed(arg),
            Opcode::Stop => Command::Stop,
            Opcode::Estop => Command::Estop,
            Opcode::Fon => Command::Fon(arg),
            Opcode::Foff => Command::Foff(arg),
            Opcode::Throw => Command::Throw(arg),
            Opcode::Close => Command::Close(arg),
            Opcode::Delay => Command::Delay(arg),
            Opcode::IfThrown | Opcode::IfClosed => {
                let state = if opcode == Opcode::IfThrown {
                    TurnoutState::Thrown
                } else {
                    TurnoutState::Closed
                };
                stack.push(Frame {
                    condition: Some((arg, state)),
                    children: Vec::new(),
                });
                continue;
            }
            _ => {
                // DONE, ENDTASK and ENDIF all close the innermost body.
                let Some(frame) = stack.pop() else { continue };
                match (frame.condition, stack.last_mut()) {
                    (Some((turnout, state)), Some(parent)) => {
                        parent.children.push(match state {
                            TurnoutState::Thrown => Command::IfThrown {
                                turnout,
                                children: frame.children,
                            },
                            TurnoutState::Closed => Command::IfClosed {
                                turnout,
                                children: frame.children,
                            },
                        });
                        continue;
                    }
                    _ => return Ok(header.build(frame.children)),
                }
            }
        };
        if let Some(frame) = stack.last_mut() {
            frame.children.push(command);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::lexer::lex;
    use crate::automation::{EventHandlerType, ScriptTrigger};

    fn compile(text: &str) -> Result<Vec<AutomationScript>> {
        parse(lex(text)?)
    }

    fn error(text: &str) -> AutomationError {
        compile(text).unwrap_err()
    }

    // ===== Structure Tests =====

    #[test]
    fn nested_conditionals() {
        let scripts = compile("AUTOMATION(2) THROW(5) IFTHROWN(5) IFCLOSED(6) FWD(80) ENDIF DONE DONE").unwrap();
        assert_eq!(
            scripts[0].children,
            vec![
                Command::Throw(5),
                Command::IfThrown {
                    turnout: 5,
                    children: vec![Command::IfClosed {
                        turnout: 6,
                        children: vec![Command::Fwd(80)]
                    }]
                }
            ]
        );
    }

    #[test]
    fn several_scripts_in_one_file() {
        let scripts = compile("SEQUENCE(1) STOP DONE ROUTE(2, \"Yard\") THROW(3) ENDTASK ONCLOSE(4) ESTOP DONE").unwrap();
        assert_eq!(scripts.len(), 3);
        assert_eq!(scripts[0].name, "Sequence 1");
        assert_eq!(scripts[1].name, "Yard");
        assert_eq!(scripts[1].kind, ScriptKind::Route);
        assert_eq!(scripts[2].id, -9);
        assert_eq!(
            scripts[2].trigger,
            ScriptTrigger::Turnout {
                turnout: 4,
                state: TurnoutState::Closed
            }
        );
        assert_eq!(scripts[2].event_handler_type(), EventHandlerType::Turnout);
    }

    #[test]
    fn source_round_trips() {
        let text = "automation(7, 'Shuttle') fwd(20) delay(500) ifclosed(3) rev(20) endif fon(1) done";
        let first = compile(text).unwrap();
        let second = compile(&first[0].source).unwrap();
        assert_eq!(first, second);
        assert_eq!(lex(&second[0].source).unwrap(), lex(&first[0].source).unwrap());
    }

    // ===== Error Tests =====

    #[test]
    fn missing_done() {
        let err = error("SEQUENCE(1) FWD(5)");
        assert_eq!(err.message, "Missing DONE keyword");
        assert_eq!(err.location.as_deref(), Some("At SEQUENCE 1"));
    }

    #[test]
    fn new_script_before_done() {
        for opener in ["SEQUENCE(2)", "ROUTE(2)", "AUTOMATION(2)", "ONCLOSE(2)", "ONTHROW(2)"] {
            let err = error(&format!("SEQUENCE(1) FWD(5) {} DONE", opener));
            assert_eq!(err.message, "Missing DONE keyword");
        }
    }

    #[test]
    fn duplicate_ids() {
        let err = error("SEQUENCE(1) DONE AUTOMATION(1) DONE");
        assert_eq!(err.message, "The id 1 is already being used");
        assert_eq!(err.location.as_deref(), Some("At AUTOMATION(1)"));
    }

    #[test]
    fn wrong_argument_type() {
        let err = error("SEQUENCE(1) FWD(\"abc\") DONE");
        assert_eq!(
            err.message,
            "Incorrect data type for argument 1 (Should be a number but \"abc\" was given)"
        );
        assert_eq!(err.location.as_deref(), Some("At FWD(abc) in SEQUENCE 1"));
    }

    #[test]
    fn argument_counts() {
        assert_eq!(
            error("SEQUENCE(1) STOP(3) DONE").message,
            "Unexpected parameters given (1 given but none needed)"
        );
        assert_eq!(
            error("SEQUENCE(1) FWD(3, 4) DONE").message,
            "Wrong number of arguments given (2 instead of 1)"
        );
        assert_eq!(
            error("SEQUENCE(1) FWD DONE").message,
            "Wrong number of arguments given (0 instead of 1)"
        );
        assert_eq!(
            error("SEQUENCE DONE").message,
            "Wrong number of arguments given (0 instead of 2)"
        );
    }

    #[test]
    fn unimplemented_and_unknown_commands() {
        let err = error("SEQUENCE(1) POWERON DONE");
        assert_eq!(
            err.message,
            "The command \"POWERON\" hasn't been implemented yet so it won't work."
        );
        assert_eq!(err.location.as_deref(), Some("In SEQUENCE 1"));

        let err = error("AUTOMATION(4) WIBBLE DONE");
        assert_eq!(err.message, "Unknown command \"WIBBLE\" in AUTOMATION 4");
    }

    #[test]
    fn scripts_must_open_with_a_top_level_form() {
        let err = error("FWD(5) DONE");
        assert!(err.message.starts_with("Scripts must start with"));
    }

    #[test]
    fn surplus_closers_between_scripts_are_skipped() {
        let scripts = compile("AUTOMATION(2) THROW(5) IFTHROWN(5) FWD(80) DONE ENDIF DONE").unwrap();
        assert_eq!(scripts.len(), 1);
        assert_eq!(
            scripts[0].children,
            vec![
                Command::Throw(5),
                Command::IfThrown {
                    turnout: 5,
                    children: vec![Command::Fwd(80)]
                }
            ]
        );
    }

    #[test]
    fn negative_ids_are_rejected() {
        let err = error("SEQUENCE(-3) DONE");
        assert!(err.message.contains("negative"));
    }

    #[test]
    fn zero_arg_header_rejected_for_handlers() {
        assert_eq!(
            error("ONTHROW(1, 2) DONE").message,
            "Wrong number of arguments given (2 instead of 1)"
        );
    }
}
