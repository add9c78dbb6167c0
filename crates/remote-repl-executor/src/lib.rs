//! Python interpreter engine for remote REPL sessions.
//!
//! Provides:
//! - `PythonInterpreter` - A Python subprocess driven over JSON lines
//! - Command building and executable resolution

pub mod command;
pub mod python;
pub mod resolve;

pub use command::{CommandBuildError, CommandBuilder, CommandParts};
pub use python::{PythonInterpreter, PythonInterpreterFactory};
pub use resolve::resolve_executable_path;
