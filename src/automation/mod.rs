//! The automation language and its scheduler.
//!
//! Script text goes through [`lexer::lex`] and [`parser::parse`] into
//! [`AutomationScript`] trees. The [`Runtime`] keeps the catalog and the
//! table of running processes; each run is driven by a [`ScriptRunner`]
//! against its own [`Scope`].
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`lexer`] | Comment stripping and symbol extraction |
//! | [`parser`] | Opcode table, argument checks, nesting |
//! | [`commands`] | Command tree, canonical text, execution |
//! | [`scope`] | Per-run state, pause signal and execution log |
//! | [`runner`] | One run: pause, resume, stop |
//! | [`runtime`] | Catalog, process table, event handlers, persistence |
//!
//! # Example
//!
//! ```rust
//! use rs_trainlink::automation::compile;
//!
//! let scripts = compile("ROUTE(3, \"Yard\") THROW(4) CLOSE(5) DONE").unwrap();
//! assert_eq!(scripts[0].name, "Yard");
//! assert_eq!(scripts[0].source, "ROUTE(3, \"Yard\")\n    THROW(4)\n    CLOSE(5)\nDONE");
//! ```

pub mod commands;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod runner;
pub mod runtime;
pub mod scope;

pub use commands::{
    handler_id, AutomationScript, Command, EventHandlerType, ScriptKind, ScriptTrigger,
    DEFAULT_DESCRIPTION,
};
pub use error::{AutomationError, AutomationErrorKind};
pub use lexer::Symbol;
pub use runner::{AutomationStatus, ScriptRunner};
pub use runtime::{AutomationSummary, RunningAutomation, Runtime, RuntimeError};
pub use scope::{RunState, Scope};

/// Lexes and parses `text`.
pub fn compile(text: &str) -> error::Result<Vec<AutomationScript>> {
    parser::parse(lexer::lex(text)?)
}
