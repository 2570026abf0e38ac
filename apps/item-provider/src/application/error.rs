//! Provider Errors
//!
//! Failures writing to a connection. Admission rejections and post naks are
//! not errors; they are delivered to the consumer as statuses and acks.

use crate::application::ports::{CodecError, SubmitStatus};
use crate::domain::types::{ConnectionId, StreamId};

/// Failure producing or delivering a response.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The connection was never registered or is already gone.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The transport had no buffer for the encoded message.
    #[error("no transport buffer of {size} bytes on connection {connection}")]
    BufferUnavailable {
        /// Target connection.
        connection: ConnectionId,
        /// Requested size.
        size: usize,
    },

    /// Growing the encode buffer did not make the message fit.
    #[error("{kind} message still too large at {size} bytes after {attempts} encode attempts")]
    BufferCeilingExceeded {
        /// Message class.
        kind: &'static str,
        /// Size of the last buffer tried.
        size: usize,
        /// Encode attempts made.
        attempts: u32,
    },

    /// The codec failed for a reason other than buffer size.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The transport refused the write.
    #[error("submit on connection {connection} stream {stream_id} failed: {status}")]
    Submit {
        /// Target connection.
        connection: ConnectionId,
        /// Target stream.
        stream_id: StreamId,
        /// Transport status.
        status: SubmitStatus,
    },
}

impl ProviderError {
    /// Whether the connection must be torn down.
    ///
    /// Only a retryable submit leaves the connection usable; the write
    /// itself is lost.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Submit {
                status: SubmitStatus::Retryable,
                ..
            }
        )
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownConnection(_) => "unknown_connection",
            Self::BufferUnavailable { .. } => "buffer_unavailable",
            Self::BufferCeilingExceeded { .. } => "buffer_ceiling_exceeded",
            Self::Codec(_) => "codec",
            Self::Submit { .. } => "submit",
        }
    }
}
