//! Core abstractions for remote interactive interpreter sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `OutboundMessage` / `Command` - Wire envelope and typed inbound commands
//! - `Connection` - Handle to one client's outbound channel
//! - `OutputSink` - Line-buffered capture of interpreter output
//! - `Interpreter` and `InterpreterFactory` traits

pub mod connection;
pub mod message;
pub mod sink;
pub mod traits;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use connection::{Connection, ConnectionId, Outgoing};
pub use message::{Command, MessageType, OutboundMessage, Status};
pub use sink::OutputSink;
pub use traits::{Interpreter, InterpreterFactory};
