//! Port Definitions
//!
//! Interfaces the provider consumes: the transport channel of one consumer
//! connection and the wire codec that turns responses into bytes.
//!
//! # Design
//!
//! Both ports are synchronous. The provider runs on a single owner task
//! and a submit only hands bytes to the transport; it never waits for the
//! consumer.

use std::fmt;
use std::io;

use crate::domain::message::ResponseMsg;
use crate::domain::types::{ConnectionId, StreamId};

// =============================================================================
// Transport Channel
// =============================================================================

/// Outcome of handing a buffer to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    /// The transport accepted the buffer.
    Success,
    /// The write was dropped but the connection is healthy.
    Retryable,
    /// The connection is unusable and must be torn down.
    Fatal,
}

impl SubmitStatus {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Retryable => "retryable",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for SubmitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write buffer obtained from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl TransportBuffer {
    /// Empty buffer that accepts up to `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Replace the contents with `bytes`. Returns `false` when they do not fit.
    pub fn fill(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.capacity {
            return false;
        }

        self.data.clear();
        self.data.extend_from_slice(bytes);
        true
    }

    /// Bytes written so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Maximum number of bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take the written bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// One consumer connection as seen by the provider.
#[cfg_attr(test, mockall::automock)]
pub trait Channel: Send + Sync {
    /// Connection id.
    fn id(&self) -> ConnectionId;

    /// Stream id of the consumer's login, once logged in.
    fn login_stream_id(&self) -> Option<StreamId>;

    /// Whether the connection can still be written to.
    fn is_active(&self) -> bool;

    /// A buffer of at least `size` bytes, or `None` when the transport has
    /// none available.
    fn get_buffer(&self, size: usize) -> Option<TransportBuffer>;

    /// Hand a filled buffer to the transport.
    fn submit(&self, buffer: TransportBuffer) -> SubmitStatus;
}

// =============================================================================
// Wire Codec
// =============================================================================

/// Capacity-limited encode target.
///
/// Writes past the limit fail, which the codec reports as
/// [`CodecError::BufferTooSmall`].
#[derive(Debug, Default)]
pub struct EncodeBuffer {
    bytes: Vec<u8>,
    limit: usize,
}

impl EncodeBuffer {
    /// Buffer that accepts at most `limit` bytes.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(limit),
            limit,
        }
    }

    /// Reuse `bytes` as the backing storage with a new limit.
    #[must_use]
    pub fn from_vec(mut bytes: Vec<u8>, limit: usize) -> Self {
        bytes.clear();
        Self { bytes, limit }
    }

    /// Byte limit.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Encoded bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of encoded bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing is encoded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Discard the contents, keeping the limit.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Give back the backing storage.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl io::Write for EncodeBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.bytes.len() + buf.len() > self.limit {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "encode buffer limit reached",
            ));
        }

        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Codec failure.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The message does not fit the encode buffer.
    #[error("encode buffer too small ({limit} bytes)")]
    BufferTooSmall {
        /// Limit of the buffer that overflowed.
        limit: usize,
    },
    /// The message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(String),
    /// The bytes are not a valid message.
    #[error("failed to decode message: {0}")]
    Decode(String),
}

/// Serialization of responses to and from bytes.
pub trait WireCodec: Send + Sync + fmt::Debug {
    /// Encode `msg` into `buf`, replacing its contents.
    ///
    /// # Errors
    ///
    /// [`CodecError::BufferTooSmall`] when the encoding exceeds the buffer
    /// limit; [`CodecError::Encode`] for any other failure.
    fn encode(&self, msg: &ResponseMsg, buf: &mut EncodeBuffer) -> Result<(), CodecError>;

    /// Decode one message.
    ///
    /// # Errors
    ///
    /// [`CodecError::Decode`] when the bytes are not a valid message.
    fn decode(&self, bytes: &[u8]) -> Result<ResponseMsg, CodecError>;
}
