//! Receiver error types

use feedline_protocol::ProtocolError;
use thiserror::Error;

/// Result type for receiver operations
pub type Result<T> = std::result::Result<T, ReceiverError>;

/// Errors from the receiver listener and its connections
#[derive(Debug, Error)]
pub enum ReceiverError {
    /// Failed to bind to address
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing broke; the connection cannot continue
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Sender stayed silent past the idle timeout
    #[error("sender idle for {idle_ms}ms")]
    Idle { idle_ms: u64 },
}

impl ReceiverError {
    /// Whether this error is an ordinary end of a connection
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            )
        )
    }
}
