//! Connection handle shared by the session layer and the transport.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::OutboundMessage;

/// Connection identifier.
pub type ConnectionId = Uuid;

/// Close code for a normal, requested closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code used when the server cannot set up a session.
pub const INTERNAL_ERROR: u16 = 1011;

/// Frame queued for the transport to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// A protocol message.
    Message(OutboundMessage),
    /// Close the channel with the given code.
    Close(u16),
}

/// Handle to one client's ordered outbound channel.
///
/// Sends and closes after the transport has gone away are silently dropped.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl Connection {
    /// Create a connection with a fresh identity.
    ///
    /// Returns the handle and the receiver the transport drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message for delivery.
    pub fn send(&self, message: OutboundMessage) {
        if self.tx.send(Outgoing::Message(message)).is_err() {
            tracing::trace!(connection = %self.id, "Dropping message for closed connection");
        }
    }

    /// Ask the transport to close the channel.
    pub fn close(&self, code: u16) {
        if self.tx.send(Outgoing::Close(code)).is_err() {
            tracing::trace!(connection = %self.id, "Connection already closed");
        }
    }
}
