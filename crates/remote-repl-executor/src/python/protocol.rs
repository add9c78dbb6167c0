//! JSON-lines protocol spoken with the interpreter process.
//!
//! The host writes one [`EvalRequest`] per line to the child's stdin. The
//! child answers with any number of `output` events followed by exactly one
//! `done` or `error` event.

use serde::{Deserialize, Serialize};

/// Evaluation request sent to the interpreter.
#[derive(Debug, Clone, Serialize)]
pub struct EvalRequest<'a> {
    pub source: &'a str,
    /// Compile the whole source as one block instead of an interactive unit.
    pub multiline: bool,
}

/// Event emitted by the interpreter while evaluating.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvalEvent {
    /// Text written to stdout or stderr.
    Output { text: String },
    /// Evaluation finished.
    Done { more: bool },
    /// Evaluation raised.
    Error { message: String },
}
