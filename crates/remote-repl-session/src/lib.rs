//! Session orchestration for remote interpreter connections.
//!
//! Provides:
//! - `SessionManager` - Authentication, dispatch and continuation handling
//! - `SessionStore` - Connection to session table

pub mod manager;
pub mod store;

pub use manager::{Flow, ManagerError, SessionManager};
pub use store::{Session, SessionStore};
