//! Text sinks used to capture engine output.

use std::io::Write as _;
use std::sync::{Arc, Mutex, PoisonError};

/// Something engine output text can be written to.
pub trait TextSink: Send + Sync {
    /// Append `text` to the sink.
    fn write_text(&self, text: &str);
}

/// Shared handle to a sink.
pub type SinkRef = Arc<dyn TextSink>;

/// In-memory sink; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    buf: Arc<Mutex<String>>,
}

impl SharedBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> String {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Take everything written so far, leaving the buffer empty.
    pub fn take(&self) -> String {
        std::mem::take(&mut *self.buf.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl TextSink for SharedBuffer {
    fn write_text(&self, text: &str) {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(text);
    }
}

/// Sink forwarding to the process standard streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleSink {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl TextSink for ConsoleSink {
    fn write_text(&self, text: &str) {
        match self {
            ConsoleSink::Stdout => {
                let mut out = std::io::stdout().lock();
                let _ = out.write_all(text.as_bytes());
                let _ = out.flush();
            }
            ConsoleSink::Stderr => {
                let mut err = std::io::stderr().lock();
                let _ = err.write_all(text.as_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_buffer_clones_share_contents() {
        let buf = SharedBuffer::new();
        let sink: SinkRef = Arc::new(buf.clone());
        sink.write_text("hello ");
        sink.write_text("world");
        assert_eq!(buf.contents(), "hello world");
        assert_eq!(buf.take(), "hello world");
        assert_eq!(buf.contents(), "");
    }
}
