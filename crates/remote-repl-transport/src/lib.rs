//! Transport layer for remote REPL clients.
//!
//! Provides:
//! - WebSocket transport (feature: websocket)

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "websocket")]
pub use websocket::{WsState, create_ws_router};
