//! Transport endpoint error types

use feedline_protocol::ProtocolError;
use thiserror::Error;

/// Result type for endpoint operations
pub type Result<T> = std::result::Result<T, EndpointError>;

/// Errors from a transport endpoint
#[derive(Debug, Error)]
pub enum EndpointError {
    /// Delivery attempts were exhausted; the endpoint accepts no more sends
    #[error("endpoint '{endpoint}' is dead")]
    Dead { endpoint: String },

    /// Endpoint was closed before the send completed
    #[error("endpoint '{endpoint}' is closed")]
    Closed { endpoint: String },

    /// Connection failed
    #[error("connection failed to {address}: {source}")]
    ConnectionFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Write or read failed
    #[error("io failed: {0}")]
    Io(#[from] std::io::Error),

    /// Receiver answered with a nack
    #[error("batch {batch_id} rejected by receiver")]
    Rejected { batch_id: u64 },

    /// Peer closed the connection
    #[error("connection closed by peer")]
    Disconnected,

    /// Timeout
    #[error("operation timed out")]
    Timeout,

    /// Frame could not be encoded or a reply could not be decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl EndpointError {
    /// Create a Dead error
    #[inline]
    pub fn dead(endpoint: impl Into<String>) -> Self {
        Self::Dead {
            endpoint: endpoint.into(),
        }
    }

    /// Create a Closed error
    #[inline]
    pub fn closed(endpoint: impl Into<String>) -> Self {
        Self::Closed {
            endpoint: endpoint.into(),
        }
    }

    /// Whether the endpoint has been marked dead
    #[inline]
    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Dead { .. })
    }

    /// Whether the endpoint was closed under the sender
    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}
