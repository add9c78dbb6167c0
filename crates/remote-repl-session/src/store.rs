//! In-memory connection to session table.

use std::{collections::HashMap, sync::Arc};

use remote_repl_core::{Connection, ConnectionId, Interpreter, OutputSink};
use tokio::sync::{Mutex, RwLock};

/// State of one live connection.
///
/// Owns the interpreter and the output sink wired into it, so both are
/// released together when the session ends.
pub struct Session {
    pub(crate) connection: Connection,
    pub(crate) interpreter: Box<dyn Interpreter>,
    pub(crate) sink: OutputSink,
    pub(crate) authenticated: bool,
    pub(crate) input_buffer: String,
}

impl Session {
    /// Create a session for a freshly opened connection.
    #[must_use]
    pub fn new(connection: Connection, interpreter: Box<dyn Interpreter>, authenticated: bool) -> Self {
        let sink = OutputSink::new(connection.clone());
        Self {
            connection,
            interpreter,
            sink,
            authenticated,
            input_buffer: String::new(),
        }
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Source accumulated from fragments that did not complete a unit.
    #[must_use]
    pub fn input_buffer(&self) -> &str {
        &self.input_buffer
    }

    /// Release the interpreter.
    ///
    /// Output still waiting for a newline is discarded.
    pub(crate) async fn shutdown(&mut self) {
        if !self.sink.pending().is_empty() {
            tracing::debug!(
                connection = %self.connection.id(),
                bytes = self.sink.pending().len(),
                "Discarding unterminated output"
            );
        }
        self.interpreter.close().await;
    }
}

/// Shared handle to a stored session.
pub type SharedSession = Arc<Mutex<Session>>;

/// Process-wide table of live sessions.
///
/// One entry per open connection: inserted on open, removed on close.
pub struct SessionStore {
    sessions: RwLock<HashMap<ConnectionId, SharedSession>>,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a session, returning `false` if the connection already has one.
    pub async fn insert(&self, session: Session) -> bool {
        let id = session.connection.id();
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            return false;
        }
        sessions.insert(id, Arc::new(Mutex::new(session)));
        true
    }

    /// Look up a session.
    pub async fn get(&self, id: ConnectionId) -> Option<SharedSession> {
        self.sessions.read().await.get(&id).map(Arc::clone)
    }

    /// Remove a session, returning it if present.
    pub async fn remove(&self, id: ConnectionId) -> Option<SharedSession> {
        self.sessions.write().await.remove(&id)
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
