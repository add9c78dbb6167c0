//! Session manager: the per-connection protocol engine.

use remote_repl_core::{
    Command, Connection, ConnectionId, InterpreterFactory, OutboundMessage,
    connection::{INTERNAL_ERROR, NORMAL_CLOSURE},
    traits::InterpreterError,
};

use crate::store::{Session, SessionStore, SharedSession};

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Interpreter error: {0}")]
    Interpreter(#[from] InterpreterError),
    #[error("Connection not found: {0}")]
    UnknownConnection(ConnectionId),
    #[error("Connection already open: {0}")]
    AlreadyOpen(ConnectionId),
}

/// What the transport should do after a frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading frames.
    Continue,
    /// The session ended; stop reading and tear the connection down.
    Close,
}

/// Drives authentication, dispatch and continuation for every connection.
pub struct SessionManager<F>
where
    F: InterpreterFactory,
{
    factory: F,
    password: Option<String>,
    store: SessionStore,
}

impl<F> SessionManager<F>
where
    F: InterpreterFactory,
{
    /// Create a new session manager.
    ///
    /// An empty password is the same as none: sessions start authenticated.
    #[must_use]
    pub fn new(factory: F, password: Option<String>) -> Self {
        Self {
            factory,
            password: password.filter(|p| !p.is_empty()),
            store: SessionStore::new(),
        }
    }

    /// Whether clients must log in before running code.
    #[must_use]
    pub const fn requires_login(&self) -> bool {
        self.password.is_some()
    }

    /// Set up a session for a newly opened connection.
    ///
    /// # Errors
    /// Returns error if the connection is already open or the interpreter
    /// cannot be created. In the latter case the connection is asked to
    /// close with an internal-error code.
    pub async fn open(&self, connection: Connection) -> Result<(), ManagerError> {
        let id = connection.id();
        if self.store.contains(id).await {
            return Err(ManagerError::AlreadyOpen(id));
        }

        let interpreter = match self.factory.create().await {
            Ok(interpreter) => interpreter,
            Err(e) => {
                tracing::error!(connection = %id, "Failed to create interpreter: {e}");
                connection.close(INTERNAL_ERROR);
                return Err(e.into());
            }
        };

        let authenticated = !self.requires_login();
        let session = Session::new(connection, interpreter, authenticated);
        if !self.store.insert(session).await {
            return Err(ManagerError::AlreadyOpen(id));
        }

        tracing::info!(connection = %id, authenticated, "New connection");
        Ok(())
    }

    /// Tear down a connection's session.
    ///
    /// Safe to call more than once and for connections that were never opened.
    pub async fn close(&self, id: ConnectionId) {
        let Some(session) = self.store.remove(id).await else {
            tracing::debug!(connection = %id, "Close for unknown connection");
            return;
        };
        session.lock().await.shutdown().await;
        tracing::info!(connection = %id, "Connection closed");
    }

    /// Handle an inbound text frame.
    ///
    /// # Errors
    /// Returns error if the connection has no session.
    pub async fn handle_text(&self, id: ConnectionId, text: &str) -> Result<Flow, ManagerError> {
        let session = self.lookup(id).await?;
        let mut session = session.lock().await;

        let command = match Command::decode(text) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(connection = %id, "Invalid client message: {e}");
                session.connection.send(OutboundMessage::unidentified_action_type());
                return Ok(Flow::Continue);
            }
        };
        tracing::debug!(connection = %id, kind = command.name(), "Received message");

        match command {
            Command::Login { password } => self.login(&mut session, password.as_deref()),
            Command::Logout => {
                session.connection.send(OutboundMessage::logout_successful());
                session.connection.close(NORMAL_CLOSURE);
                return Ok(Flow::Close);
            }
            Command::Interactive { command } => {
                if session.authenticated {
                    Self::interactive(&mut session, &command).await;
                } else {
                    session.connection.send(OutboundMessage::not_authenticated());
                }
            }
            Command::File => {
                tracing::info!(connection = %id, "File messages are not implemented yet");
            }
            Command::Unrecognized { kind } => {
                tracing::warn!(connection = %id, kind = %kind, "Unidentified action type");
                session.connection.send(OutboundMessage::unidentified_action_type());
            }
        }
        Ok(Flow::Continue)
    }

    /// Handle an inbound binary frame.
    ///
    /// # Errors
    /// Returns error if the connection has no session.
    pub async fn handle_binary(&self, id: ConnectionId, payload: &[u8]) -> Result<Flow, ManagerError> {
        let session = self.lookup(id).await?;
        let session = session.lock().await;

        if session.authenticated {
            tracing::info!(connection = %id, bytes = payload.len(), "Binary messages are not implemented yet");
            session.connection.send(OutboundMessage::binary_not_implemented());
        } else {
            session.connection.send(OutboundMessage::not_authenticated());
        }
        Ok(Flow::Continue)
    }

    /// Whether the connection has logged in.
    pub async fn is_authenticated(&self, id: ConnectionId) -> Option<bool> {
        let session = self.store.get(id).await?;
        let authenticated = session.lock().await.authenticated;
        Some(authenticated)
    }

    /// Source buffered for the connection's unfinished unit.
    pub async fn pending_input(&self, id: ConnectionId) -> Option<String> {
        let session = self.store.get(id).await?;
        let buffer = session.lock().await.input_buffer.clone();
        Some(buffer)
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.store.len().await
    }

    async fn lookup(&self, id: ConnectionId) -> Result<SharedSession, ManagerError> {
        self.store.get(id).await.ok_or_else(|| {
            tracing::error!(connection = %id, "Message for connection without a session");
            ManagerError::UnknownConnection(id)
        })
    }

    fn login(&self, session: &mut Session, password: Option<&str>) {
        if password == self.password.as_deref() {
            session.authenticated = true;
            tracing::info!(connection = %session.connection.id(), "Login successful");
            session.connection.send(OutboundMessage::login_successful());
        } else {
            tracing::warn!(connection = %session.connection.id(), "Login failed");
            session.connection.send(OutboundMessage::login_failed());
        }
    }

    /// Run one fragment through the continuation algorithm.
    ///
    /// A fragment with its own line breaks is evaluated on its own and leaves
    /// the buffer alone; any other fragment is appended to the buffer and the
    /// whole buffer is evaluated. A completed unit always clears the buffer.
    async fn interactive(session: &mut Session, command: &str) {
        let Session {
            connection,
            interpreter,
            sink,
            input_buffer,
            ..
        } = session;

        let result = if command.contains('\n') {
            interpreter.parse_or_execute(command, true, sink).await
        } else {
            input_buffer.push('\n');
            input_buffer.push_str(command);
            interpreter
                .parse_or_execute(input_buffer.as_str(), false, sink)
                .await
        };

        // A faulted unit is finished.
        let more = match result {
            Ok(more) => more,
            Err(fault) => {
                tracing::error!(connection = %connection.id(), "[interpreter] {fault}");
                connection.send(OutboundMessage::execution_fault());
                false
            }
        };

        if more {
            connection.send(OutboundMessage::more_input_expected());
        } else {
            input_buffer.clear();
            connection.send(OutboundMessage::expecting_input());
        }
    }
}

#[cfg(test)]
mod tests {
    use remote_repl_core::{
        Connection, MessageType, Outgoing,
        message::code,
        testing::{ScriptedFactory, Submission},
        traits::ExecutionFault,
    };
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;

    fn drain(rx: &mut UnboundedReceiver<Outgoing>) -> Vec<Outgoing> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(frame);
        }
        out
    }

    fn messages(rx: &mut UnboundedReceiver<Outgoing>) -> Vec<OutboundMessage> {
        drain(rx)
            .into_iter()
            .map(|frame| match frame {
                Outgoing::Message(msg) => msg,
                Outgoing::Close(code) => panic!("unexpected close {code}"),
            })
            .collect()
    }

    async fn connect(
        manager: &SessionManager<ScriptedFactory>,
    ) -> (ConnectionId, UnboundedReceiver<Outgoing>) {
        let (connection, rx) = Connection::channel();
        let id = connection.id();
        manager.open(connection).await.unwrap();
        (id, rx)
    }

    fn interactive(command: &str) -> String {
        json!({ "type": "interactive", "command": command }).to_string()
    }

    fn login(password: &str) -> String {
        json!({ "type": "login", "password": password }).to_string()
    }

    #[tokio::test]
    async fn test_no_password_starts_authenticated() {
        let manager = SessionManager::new(ScriptedFactory::toy(), None);
        let (id, _rx) = connect(&manager).await;

        assert!(!manager.requires_login());
        assert_eq!(manager.is_authenticated(id).await, Some(true));
    }

    #[tokio::test]
    async fn test_empty_password_means_no_login() {
        let manager = SessionManager::new(ScriptedFactory::toy(), Some(String::new()));
        let (id, _rx) = connect(&manager).await;

        assert_eq!(manager.is_authenticated(id).await, Some(true));
    }

    #[tokio::test]
    async fn test_expression_without_login() {
        let factory = ScriptedFactory::toy();
        let transcript = factory.transcript();
        let manager = SessionManager::new(factory, None);
        let (id, mut rx) = connect(&manager).await;

        let flow = manager.handle_text(id, &interactive("1+1")).await.unwrap();
        assert_eq!(flow, Flow::Continue);

        assert_eq!(transcript.sources(), vec!["\n1+1".to_string()]);
        let msgs = messages(&mut rx);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0], OutboundMessage::output_line("2\n"));
        assert_eq!(msgs[1].kind, MessageType::Login);
        assert_eq!(msgs[1].status.code, code::EXPECTING_INPUT);
        assert_eq!(msgs[1].prompt.as_deref(), Some(">>> "));
    }

    #[tokio::test]
    async fn test_interactive_before_login_is_rejected() {
        let factory = ScriptedFactory::toy();
        let transcript = factory.transcript();
        let manager = SessionManager::new(factory, Some("secret".to_string()));
        let (id, mut rx) = connect(&manager).await;

        manager.handle_text(id, &interactive("x=1")).await.unwrap();

        assert_eq!(messages(&mut rx), vec![OutboundMessage::not_authenticated()]);
        assert_eq!(manager.pending_input(id).await.as_deref(), Some(""));
        assert!(transcript.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_login_wrong_then_right() {
        let manager = SessionManager::new(ScriptedFactory::toy(), Some("secret".to_string()));
        let (id, mut rx) = connect(&manager).await;
        assert_eq!(manager.is_authenticated(id).await, Some(false));

        manager.handle_text(id, &login("wrong")).await.unwrap();
        assert_eq!(messages(&mut rx), vec![OutboundMessage::login_failed()]);
        assert_eq!(manager.is_authenticated(id).await, Some(false));

        manager.handle_text(id, &login("secret")).await.unwrap();
        assert_eq!(messages(&mut rx), vec![OutboundMessage::login_successful()]);
        assert_eq!(manager.is_authenticated(id).await, Some(true));
    }

    #[tokio::test]
    async fn test_failed_login_never_revokes() {
        let manager = SessionManager::new(ScriptedFactory::toy(), Some("secret".to_string()));
        let (id, mut rx) = connect(&manager).await;

        manager.handle_text(id, &login("secret")).await.unwrap();
        manager.handle_text(id, &login("nope")).await.unwrap();
        assert_eq!(manager.is_authenticated(id).await, Some(true));

        let codes: Vec<u16> = messages(&mut rx).iter().map(|m| m.status.code).collect();
        assert_eq!(codes, vec![code::SUCCESS, code::FAILURE]);
    }

    #[tokio::test]
    async fn test_login_without_password_field_fails() {
        let manager = SessionManager::new(ScriptedFactory::toy(), Some("secret".to_string()));
        let (id, mut rx) = connect(&manager).await;

        manager.handle_text(id, r#"{"type":"LOGIN"}"#).await.unwrap();
        assert_eq!(messages(&mut rx), vec![OutboundMessage::login_failed()]);
        assert_eq!(manager.is_authenticated(id).await, Some(false));
    }

    #[tokio::test]
    async fn test_login_password_is_case_sensitive() {
        let manager = SessionManager::new(ScriptedFactory::toy(), Some("secret".to_string()));
        let (id, mut rx) = connect(&manager).await;

        manager.handle_text(id, &login("SECRET")).await.unwrap();
        assert_eq!(messages(&mut rx), vec![OutboundMessage::login_failed()]);
    }

    #[tokio::test]
    async fn test_continuation_across_fragments() {
        let factory = ScriptedFactory::toy();
        let transcript = factory.transcript();
        let manager = SessionManager::new(factory, None);
        let (id, mut rx) = connect(&manager).await;

        manager.handle_text(id, &interactive("if True:")).await.unwrap();
        assert_eq!(manager.pending_input(id).await.as_deref(), Some("\nif True:"));
        assert_eq!(messages(&mut rx), vec![OutboundMessage::more_input_expected()]);

        manager.handle_text(id, &interactive("    pass")).await.unwrap();
        assert_eq!(manager.pending_input(id).await.as_deref(), Some(""));
        assert_eq!(messages(&mut rx), vec![OutboundMessage::expecting_input()]);

        assert_eq!(
            transcript.sources(),
            vec!["\nif True:".to_string(), "\nif True:\n    pass".to_string()]
        );
    }

    #[tokio::test]
    async fn test_buffer_is_concatenation_of_fragments() {
        let factory = ScriptedFactory::new(|source, _, _| Ok(!source.ends_with("end")));
        let transcript = factory.transcript();
        let manager = SessionManager::new(factory, None);
        let (id, _rx) = connect(&manager).await;

        for fragment in ["a", "b", "c"] {
            manager.handle_text(id, &interactive(fragment)).await.unwrap();
        }
        assert_eq!(manager.pending_input(id).await.as_deref(), Some("\na\nb\nc"));

        manager.handle_text(id, &interactive("end")).await.unwrap();
        assert_eq!(transcript.sources().last().map(String::as_str), Some("\na\nb\nc\nend"));
        assert_eq!(manager.pending_input(id).await.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_multiline_fragment_bypasses_buffer() {
        let factory = ScriptedFactory::toy();
        let transcript = factory.transcript();
        let manager = SessionManager::new(factory, None);
        let (id, mut rx) = connect(&manager).await;

        manager.handle_text(id, &interactive("for x in y:")).await.unwrap();
        messages(&mut rx);

        manager
            .handle_text(id, &interactive("print(a)\nprint(b)"))
            .await
            .unwrap();

        assert_eq!(
            transcript.submissions().last().cloned(),
            Some(Submission {
                source: "print(a)\nprint(b)".to_string(),
                self_contained: true,
            })
        );
        // The multi-line unit completed, which resets the buffer.
        assert_eq!(manager.pending_input(id).await.as_deref(), Some(""));

        let msgs = messages(&mut rx);
        assert_eq!(msgs[0].result.as_deref(), Some("a\n"));
        assert_eq!(msgs[1].result.as_deref(), Some("b\n"));
        assert_eq!(msgs[2], OutboundMessage::expecting_input());
    }

    #[tokio::test]
    async fn test_incomplete_multiline_fragment_keeps_buffer() {
        let factory = ScriptedFactory::toy();
        let manager = SessionManager::new(factory, None);
        let (id, mut rx) = connect(&manager).await;

        manager.handle_text(id, &interactive("while x:")).await.unwrap();
        manager
            .handle_text(id, &interactive("def f():\n    if y:"))
            .await
            .unwrap();

        assert_eq!(manager.pending_input(id).await.as_deref(), Some("\nwhile x:"));
        let msgs = messages(&mut rx);
        assert_eq!(msgs, vec![
            OutboundMessage::more_input_expected(),
            OutboundMessage::more_input_expected(),
        ]);
    }

    #[tokio::test]
    async fn test_fault_resets_buffer_and_reports() {
        let manager = SessionManager::new(ScriptedFactory::toy(), None);
        let (id, mut rx) = connect(&manager).await;

        manager.handle_text(id, &interactive("try:")).await.unwrap();
        messages(&mut rx);

        // The toy language sees "\ntry:\nraise boom" and faults.
        manager.handle_text(id, &interactive("raise boom")).await.unwrap();
        assert_eq!(manager.pending_input(id).await.as_deref(), Some(""));

        let msgs = messages(&mut rx);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].result.as_deref(), Some("Traceback (most recent call last):\n"));
        assert_eq!(msgs[1], OutboundMessage::execution_fault());
        assert!(msgs[1].prompt.is_none());
        assert_eq!(msgs[2], OutboundMessage::expecting_input());

        manager.handle_text(id, &interactive("1+2")).await.unwrap();
        assert_eq!(messages(&mut rx)[0].result.as_deref(), Some("3\n"));
    }

    #[tokio::test]
    async fn test_unavailable_interpreter_is_a_fault() {
        let factory = ScriptedFactory::new(|_, _, _| {
            Err(ExecutionFault::Unavailable("exited".to_string()))
        });
        let manager = SessionManager::new(factory, None);
        let (id, mut rx) = connect(&manager).await;

        let flow = manager.handle_text(id, &interactive("x")).await.unwrap();
        assert_eq!(flow, Flow::Continue);
        assert_eq!(messages(&mut rx), vec![
            OutboundMessage::execution_fault(),
            OutboundMessage::expecting_input(),
        ]);
    }

    #[tokio::test]
    async fn test_partial_output_is_held() {
        let factory = ScriptedFactory::new(|source, _, out| {
            out.write_str(source.trim());
            Ok(false)
        });
        let manager = SessionManager::new(factory, None);
        let (id, mut rx) = connect(&manager).await;

        manager.handle_text(id, &interactive("abc")).await.unwrap();
        assert_eq!(messages(&mut rx), vec![OutboundMessage::expecting_input()]);
    }

    #[tokio::test]
    async fn test_logout_closes_normally() {
        let factory = ScriptedFactory::toy();
        let transcript = factory.transcript();
        let manager = SessionManager::new(factory, Some("secret".to_string()));
        let (id, mut rx) = connect(&manager).await;
        manager.handle_text(id, &login("secret")).await.unwrap();
        drain(&mut rx);

        let flow = manager.handle_text(id, r#"{"type":"logout"}"#).await.unwrap();
        assert_eq!(flow, Flow::Close);
        assert_eq!(drain(&mut rx), vec![
            Outgoing::Message(OutboundMessage::logout_successful()),
            Outgoing::Close(NORMAL_CLOSURE),
        ]);

        manager.close(id).await;
        assert_eq!(transcript.closed(), 1);
        assert!(matches!(
            manager.handle_text(id, &interactive("1+1")).await,
            Err(ManagerError::UnknownConnection(_))
        ));
    }

    #[tokio::test]
    async fn test_file_is_log_only() {
        let manager = SessionManager::new(ScriptedFactory::toy(), Some("secret".to_string()));
        let (id, mut rx) = connect(&manager).await;

        let flow = manager.handle_text(id, r#"{"type":"file"}"#).await.unwrap();
        assert_eq!(flow, Flow::Continue);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_and_malformed_frames() {
        let manager = SessionManager::new(ScriptedFactory::toy(), None);
        let (id, mut rx) = connect(&manager).await;

        manager.handle_text(id, r#"{"type":"dance"}"#).await.unwrap();
        manager.handle_text(id, "{not json").await.unwrap();

        let msgs = messages(&mut rx);
        assert_eq!(msgs, vec![
            OutboundMessage::unidentified_action_type(),
            OutboundMessage::unidentified_action_type(),
        ]);
        assert_eq!(msgs[0].kind, MessageType::Undefined);
        assert_eq!(msgs[0].status.code, code::FAILURE);
    }

    #[tokio::test]
    async fn test_binary_frames() {
        let manager = SessionManager::new(ScriptedFactory::toy(), Some("secret".to_string()));
        let (id, mut rx) = connect(&manager).await;

        manager.handle_binary(id, b"\x00\x01").await.unwrap();
        assert_eq!(messages(&mut rx), vec![OutboundMessage::not_authenticated()]);

        manager.handle_text(id, &login("secret")).await.unwrap();
        drain(&mut rx);

        manager.handle_binary(id, b"\x00\x01").await.unwrap();
        let msgs = messages(&mut rx);
        assert_eq!(msgs, vec![OutboundMessage::binary_not_implemented()]);
        assert_eq!(msgs[0].kind, MessageType::Execute);
        assert_eq!(msgs[0].status.code, code::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let factory = ScriptedFactory::toy();
        let transcript = factory.transcript();
        let manager = SessionManager::new(factory, None);
        let (id, _rx) = connect(&manager).await;
        assert_eq!(manager.session_count().await, 1);

        manager.close(id).await;
        manager.close(id).await;
        assert_eq!(manager.session_count().await, 0);
        assert_eq!(transcript.closed(), 1);

        let (never_opened, _rx) = Connection::channel();
        manager.close(never_opened.id()).await;
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let manager = SessionManager::new(ScriptedFactory::toy(), Some("secret".to_string()));
        let (a, mut rx_a) = connect(&manager).await;
        let (b, mut rx_b) = connect(&manager).await;

        manager.handle_text(a, &login("secret")).await.unwrap();
        manager.handle_text(a, &interactive("if x:")).await.unwrap();

        assert_eq!(manager.is_authenticated(b).await, Some(false));
        assert_eq!(manager.pending_input(b).await.as_deref(), Some(""));
        assert_eq!(messages(&mut rx_a).len(), 2);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_open_failure_closes_connection() {
        let manager = SessionManager::new(ScriptedFactory::failing(), None);
        let (connection, mut rx) = Connection::channel();
        let id = connection.id();

        let result = manager.open(connection).await;
        assert!(matches!(result, Err(ManagerError::Interpreter(_))));
        assert_eq!(drain(&mut rx), vec![Outgoing::Close(INTERNAL_ERROR)]);
        assert_eq!(manager.session_count().await, 0);
        assert!(manager.is_authenticated(id).await.is_none());
    }

    #[tokio::test]
    async fn test_open_twice_is_rejected() {
        let factory = ScriptedFactory::toy();
        let transcript = factory.transcript();
        let manager = SessionManager::new(factory, None);
        let (connection, _rx) = Connection::channel();

        manager.open(connection.clone()).await.unwrap();
        assert!(matches!(
            manager.open(connection).await,
            Err(ManagerError::AlreadyOpen(_))
        ));
        assert_eq!(transcript.created(), 1);
    }

    #[tokio::test]
    async fn test_unknown_connection_fails_loudly() {
        let manager = SessionManager::new(ScriptedFactory::toy(), None);
        let (stranger, _rx) = Connection::channel();

        let result = manager.handle_text(stranger.id(), &interactive("1+1")).await;
        assert!(matches!(result, Err(ManagerError::UnknownConnection(_))));
        let result = manager.handle_binary(stranger.id(), b"x").await;
        assert!(matches!(result, Err(ManagerError::UnknownConnection(_))));
    }
}
