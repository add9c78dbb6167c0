//! Python subprocess interpreter.

pub mod interpreter;
pub mod protocol;

pub use interpreter::{PythonInterpreter, PythonInterpreterFactory};

/// Host-side program run by the interpreter process.
pub const BOOTSTRAP: &str = include_str!("bootstrap.py");
