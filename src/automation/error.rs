//! Structured automation errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of an [`AutomationError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AutomationErrorKind {
    /// The script text is malformed.
    Syntax,
    /// Anything else.
    Unknown,
}

/// Error sent back to whoever submitted a script.
///
/// `location` names the offending construct and its enclosing script, for
/// example `At FWD(abc) in SEQUENCE 1`.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct AutomationError {
    /// Category.
    pub kind: AutomationErrorKind,
    /// What went wrong.
    pub message: String,
    /// Where it went wrong.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl AutomationError {
    /// A syntax error without a location.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self {
            kind: AutomationErrorKind::Syntax,
            message: message.into(),
            location: None,
        }
    }

    /// A catch-all error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            kind: AutomationErrorKind::Unknown,
            message: message.into(),
            location: None,
        }
    }

    /// Attaches a location.
    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Result type for lexing and parsing.
pub type Result<T> = core::result::Result<T, AutomationError>;
