//! Script text to [`Symbol`]s.
//!
//! Lexing runs in four stages:
//!
//! 1. Comments are removed: `// line` and `/* block */`. `\//` keeps a
//!    literal `//`.
//! 2. Whitespace (spaces, tabs, newlines) splits the text into tokens.
//! 3. Tokens that were split inside brackets are joined back together,
//!    keeping the space only when the split happened inside quotes.
//! 4. Each token becomes a symbol: `NAME(a, b)` or a bare `NAME`.
//!
//! Nesting is not resolved here; the output is flat.
//!
//! # Example
//!
//! ```rust
//! use rs_trainlink::automation::lexer::{lex, Symbol};
//!
//! let symbols = lex("sequence(1) // demo\n  fwd(50)\n  DONE").unwrap();
//! assert_eq!(symbols[0], Symbol::new("SEQUENCE", &["1"]));
//! assert_eq!(symbols[1], Symbol::new("FWD", &["50"]));
//! assert_eq!(symbols[2], Symbol::new("DONE", &[]));
//! ```

use std::fmt;

use super::error::{AutomationError, Result};

/// One opcode and its raw arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    /// Upper-cased opcode.
    pub name: String,
    /// Arguments with quotes stripped.
    pub args: Vec<String>,
}

impl Symbol {
    /// Builds a symbol from string slices.
    pub fn new(name: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}({})", self.name, self.args.join(","))
        }
    }
}

/// Lexes a whole script file.
pub fn lex(input: &str) -> Result<Vec<Symbol>> {
    let text = strip_comments(input)?;
    let tokens = regroup(text.split_whitespace().collect())?;
    Ok(tokens.iter().flat_map(|token| classify(token)).collect())
}

// ============================================================================
// Stage 1: Comments
// ============================================================================

fn strip_comments(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(c) = rest.chars().next() {
        if rest.starts_with("\\//") {
            out.push_str("//");
            rest = &rest[3..];
        } else if rest.starts_with("//") {
            rest = match rest.find('\n') {
                Some(end) => &rest[end..],
                None => "",
            };
        } else if rest.starts_with("/*") {
            let end = rest[2..]
                .find("*/")
                .ok_or_else(|| AutomationError::syntax("Missing end of comment block"))?;
            out.push(' ');
            rest = &rest[2 + end + 2..];
        } else if rest.starts_with("*/") {
            return Err(AutomationError::syntax("Missing start of comment block"));
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    Ok(out)
}

// ============================================================================
// Stage 3: Regrouping
// ============================================================================

fn quote_count(s: &str) -> usize {
    s.chars().filter(|c| *c == '"' || *c == '\'').count()
}

fn regroup(tokens: Vec<&str>) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter();

    while let Some(token) = iter.next() {
        let mut merged = token.to_string();
        while merged.contains('(') && !merged.contains(')') {
            let next = iter.next().ok_or_else(|| {
                AutomationError::syntax("Missing closing bracket").at(format!("At {}", merged))
            })?;
            if quote_count(&merged) % 2 == 1 {
                merged.push(' ');
            }
            merged.push_str(next);
        }
        out.push(merged);
    }
    Ok(out)
}

// ============================================================================
// Stage 4: Classification
// ============================================================================

/// Splits `a, "b, c"` on commas outside quotes.
fn split_args(inner: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in inner.chars() {
        match (c, quote) {
            ('"' | '\'', None) => quote = Some(c),
            (q, Some(open)) if q == open => quote = None,
            (',', None) => args.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    args.push(current);
    args.into_iter().map(|a| a.trim().to_string()).collect()
}

/// Byte offset of the first `)` outside quotes.
fn closing_bracket(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match (c, quote) {
            ('"' | '\'', None) => quote = Some(c),
            (q, Some(open)) if q == open => quote = None,
            (')', None) => return Some(i),
            _ => {}
        }
    }
    None
}

/// One token can hold more than one symbol when brackets are glued to the
/// next opcode (`FWD(5)STOP`).
fn classify(token: &str) -> Vec<Symbol> {
    let mut symbols = Vec::new();
    let mut rest = token;

    while !rest.is_empty() {
        let Some(open) = rest.find('(') else {
            symbols.push(Symbol {
                name: rest.to_uppercase(),
                args: Vec::new(),
            });
            break;
        };
        let name = rest[..open].to_uppercase();
        let after = &rest[open + 1..];
        let (inner, tail) = match closing_bracket(after) {
            Some(close) => (&after[..close], &after[close + 1..]),
            None => (after, ""),
        };
        let args = if inner.trim().is_empty() {
            Vec::new()
        } else {
            split_args(inner)
        };
        symbols.push(Symbol { name, args });
        rest = tail;
    }
    symbols
}
