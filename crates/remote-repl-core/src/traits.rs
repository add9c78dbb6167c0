//! Core traits for interpreter engines.

use async_trait::async_trait;
use thiserror::Error;

use crate::OutputSink;

/// Fault raised by an interpreter while evaluating a unit.
#[derive(Debug, Error)]
pub enum ExecutionFault {
    /// The evaluated code raised.
    #[error("{0}")]
    Raised(String),
    /// The engine stopped responding or exited.
    #[error("Interpreter unavailable: {0}")]
    Unavailable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Interpreter creation error.
#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One interpreter instance, owned by a single session.
#[async_trait]
pub trait Interpreter: Send {
    /// Parse `source` and execute it if it forms a complete unit.
    ///
    /// `self_contained` is set when the client sent a multi-line unit in one
    /// fragment. Output produced while executing is written to `out`.
    ///
    /// Returns `true` when more input is needed to complete the unit.
    async fn parse_or_execute(
        &mut self,
        source: &str,
        self_contained: bool,
        out: &mut OutputSink,
    ) -> Result<bool, ExecutionFault>;

    /// Release the engine. Called once when the owning session ends.
    async fn close(&mut self);
}

/// Creates a fresh interpreter for each new connection.
#[async_trait]
pub trait InterpreterFactory: Send + Sync {
    /// Create a new interpreter instance.
    async fn create(&self) -> Result<Box<dyn Interpreter>, InterpreterError>;
}
