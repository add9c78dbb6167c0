//! Wire envelope exchanged with interactive clients.
//!
//! Inbound frames are JSON objects carrying a case-insensitive `type` plus the
//! optional `password` (login) and `command` (interactive) fields. Outbound
//! frames always carry a `type` label and a `status`, and optionally a
//! `result` or `prompt`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status codes reported to clients.
pub mod code {
    /// Generic success.
    pub const SUCCESS: u16 = 100;
    /// The current unit is incomplete.
    pub const MORE_INPUT: u16 = 101;
    /// Ready for the next unit.
    pub const EXPECTING_INPUT: u16 = 102;
    /// The interpreter raised while evaluating.
    pub const EXECUTION_FAULT: u16 = 3;
    /// Message form is not supported.
    pub const NOT_IMPLEMENTED: u16 = 4;
    /// Login failed or the action type is unknown.
    pub const FAILURE: u16 = 500;
    /// Action attempted before logging in.
    pub const NOT_AUTHENTICATED: u16 = 501;
}

/// Prompt sent while a unit is still being continued.
pub const CONTINUATION_PROMPT: &str = "... ";

/// Prompt sent when the session is ready for a new unit.
pub const READY_PROMPT: &str = ">>> ";

/// Protocol-level outcome attached to every outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: u16,
    pub text: String,
}

impl Status {
    #[must_use]
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }
}

/// Label carried in the `type` field of outbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Login,
    Interactive,
    Execute,
    Undefined,
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl OutboundMessage {
    /// Create a message with only a label and a status.
    #[must_use]
    pub const fn new(kind: MessageType, status: Status) -> Self {
        Self {
            kind,
            status,
            result: None,
            prompt: None,
        }
    }

    /// Attach a prompt.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Attach captured interpreter output.
    #[must_use]
    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    #[must_use]
    pub fn login_successful() -> Self {
        Self::new(MessageType::Login, Status::new(code::SUCCESS, "Login successful"))
    }

    #[must_use]
    pub fn login_failed() -> Self {
        Self::new(MessageType::Login, Status::new(code::FAILURE, "Login failed"))
    }

    #[must_use]
    pub fn logout_successful() -> Self {
        Self::new(MessageType::Login, Status::new(code::SUCCESS, "Logout successful"))
    }

    #[must_use]
    pub fn not_authenticated() -> Self {
        Self::new(
            MessageType::Login,
            Status::new(code::NOT_AUTHENTICATED, "Not authenticated"),
        )
    }

    /// Continuation prompt: the buffered unit is incomplete.
    #[must_use]
    pub fn more_input_expected() -> Self {
        Self::new(
            MessageType::Interactive,
            Status::new(code::MORE_INPUT, "More input expected"),
        )
        .with_prompt(CONTINUATION_PROMPT)
    }

    /// Ready prompt.
    ///
    /// Labeled `login` rather than `interactive`; clients key on this label.
    #[must_use]
    pub fn expecting_input() -> Self {
        Self::new(
            MessageType::Login,
            Status::new(code::EXPECTING_INPUT, "Expecting input"),
        )
        .with_prompt(READY_PROMPT)
    }

    #[must_use]
    pub fn execution_fault() -> Self {
        Self::new(
            MessageType::Interactive,
            Status::new(code::EXECUTION_FAULT, "Python Exception"),
        )
    }

    /// One flushed line of interpreter output.
    #[must_use]
    pub fn output_line(line: impl Into<String>) -> Self {
        Self::new(
            MessageType::Interactive,
            Status::new(code::SUCCESS, "Sending result"),
        )
        .with_result(line)
    }

    #[must_use]
    pub fn binary_not_implemented() -> Self {
        Self::new(
            MessageType::Execute,
            Status::new(code::NOT_IMPLEMENTED, "not implemented"),
        )
    }

    #[must_use]
    pub fn unidentified_action_type() -> Self {
        Self::new(
            MessageType::Undefined,
            Status::new(code::FAILURE, "Unidentified action type"),
        )
    }

    /// Serialize to the JSON wire form.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Envelope decode error.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct InboundEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    command: Option<String>,
}

/// Typed command decoded from an inbound text frame.
#[derive(Clone, PartialEq, Eq)]
pub enum Command {
    /// Authenticate with the shared secret.
    Login { password: Option<String> },
    /// Submit a source fragment.
    Interactive { command: String },
    /// File transfer placeholder.
    File,
    /// End the session.
    Logout,
    /// Any other `type` value.
    Unrecognized { kind: String },
}

impl Command {
    /// Decode a JSON text frame.
    ///
    /// The `type` field is matched case-insensitively. A missing `command`
    /// on an interactive message decodes as an empty fragment.
    ///
    /// # Errors
    /// Returns error if the frame is not a JSON object with a string `type`.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let envelope: InboundEnvelope = serde_json::from_str(text)?;
        Ok(match envelope.kind.to_ascii_lowercase().as_str() {
            "login" => Self::Login {
                password: envelope.password,
            },
            "interactive" => Self::Interactive {
                command: envelope.command.unwrap_or_default(),
            },
            "file" => Self::File,
            "logout" => Self::Logout,
            _ => Self::Unrecognized {
                kind: envelope.kind,
            },
        })
    }

    /// Wire name of the command, for logging.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Login { .. } => "login",
            Self::Interactive { .. } => "interactive",
            Self::File => "file",
            Self::Logout => "logout",
            Self::Unrecognized { kind } => kind,
        }
    }
}

// Passwords never reach the logs.
impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login { password } => f
                .debug_struct("Login")
                .field("password", &password.as_ref().map(|_| "<redacted>"))
                .finish(),
            Self::Interactive { command } => f
                .debug_struct("Interactive")
                .field("command", command)
                .finish(),
            Self::File => f.write_str("File"),
            Self::Logout => f.write_str("Logout"),
            Self::Unrecognized { kind } => f
                .debug_struct("Unrecognized")
                .field("kind", kind)
                .finish(),
        }
    }
}
