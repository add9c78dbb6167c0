//! Line-buffered capture of interpreter output.

use std::fmt;

use crate::{Connection, OutboundMessage};

/// Accumulates interpreter output and emits one message per completed line.
///
/// Each line is sent as soon as its newline is written, so output produced
/// during an evaluation reaches the client before the prompt that follows
/// it. Text without a trailing newline stays buffered until a later write.
#[derive(Debug)]
pub struct OutputSink {
    connection: Connection,
    buffer: String,
}

impl OutputSink {
    /// Create a sink bound to a connection.
    #[must_use]
    pub const fn new(connection: Connection) -> Self {
        Self {
            connection,
            buffer: String::new(),
        }
    }

    /// Append text, flushing at every newline.
    pub fn write_str(&mut self, text: &str) {
        for ch in text.chars() {
            self.buffer.push(ch);
            if ch == '\n' {
                self.flush_line();
            }
        }
    }

    /// Text written since the last newline.
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn flush_line(&mut self) {
        let line = std::mem::take(&mut self.buffer);
        tracing::debug!(
            connection = %self.connection.id(),
            "[interpreter] {}",
            line.strip_suffix('\n').unwrap_or(&line)
        );
        self.connection.send(OutboundMessage::output_line(line));
    }
}

impl fmt::Write for OutputSink {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Self::write_str(self, s);
        Ok(())
    }
}
