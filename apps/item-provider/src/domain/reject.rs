//! Request Rejection
//!
//! Every way a request can fail admission, and the state delivered to the
//! consumer on the rejected stream.

use std::fmt;

use crate::domain::state::{DataState, State, StateCode, StreamState};
use crate::domain::types::StreamId;

/// Why a request was not admitted.
///
/// An admitted request simply has no reason; there is no "none" variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// The connection or the slot pool is at capacity.
    ItemCountReached,
    /// Missing or unknown service id.
    InvalidServiceId,
    /// Requested QoS cannot be met.
    QosNotSupported,
    /// The item is already open on another stream of this connection.
    ItemAlreadyOpened,
    /// The stream id is in use by a different item.
    StreamAlreadyInUse,
    /// The key carried attribute bytes.
    KeyAttribNotSupported,
    /// The item name is missing or not served.
    ItemNotSupported,
    /// The item is only available on a private stream.
    PrivateStreamRedirect,
    /// A reissue disagreed with the stream's private flag.
    PrivateStreamMismatch,
    /// A batch named an item already open on its derived stream.
    BatchItemReissue,
    /// The domain is not served.
    DomainNotSupported,
}

impl RejectReason {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ItemCountReached => "item_count_reached",
            Self::InvalidServiceId => "invalid_service_id",
            Self::QosNotSupported => "qos_not_supported",
            Self::ItemAlreadyOpened => "item_already_opened",
            Self::StreamAlreadyInUse => "stream_already_in_use",
            Self::KeyAttribNotSupported => "key_attrib_not_supported",
            Self::ItemNotSupported => "item_not_supported",
            Self::PrivateStreamRedirect => "private_stream_redirect",
            Self::PrivateStreamMismatch => "private_stream_mismatch",
            Self::BatchItemReissue => "batch_item_reissue",
            Self::DomainNotSupported => "domain_not_supported",
        }
    }

    /// Stream state, code and text delivered on the rejected stream.
    #[must_use]
    pub fn status(self, stream_id: StreamId) -> State {
        let (stream, code, detail) = match self {
            Self::ItemCountReached => (
                StreamState::ClosedRecover,
                StateCode::TooManyItems,
                "item count reached for this channel",
            ),
            Self::InvalidServiceId => (
                StreamState::Closed,
                StateCode::UsageError,
                "service id invalid",
            ),
            Self::QosNotSupported => (
                StreamState::Closed,
                StateCode::UsageError,
                "QoS not supported",
            ),
            Self::ItemAlreadyOpened => (
                StreamState::Closed,
                StateCode::AlreadyOpen,
                "item already open with exact same key on another stream",
            ),
            Self::StreamAlreadyInUse => (
                StreamState::Closed,
                StateCode::UsageError,
                "stream already in use with a different key",
            ),
            Self::KeyAttribNotSupported => (
                StreamState::Closed,
                StateCode::UsageError,
                "this provider does not support key attribute information",
            ),
            Self::ItemNotSupported => (
                StreamState::Closed,
                StateCode::UsageError,
                "item not supported",
            ),
            Self::PrivateStreamRedirect => {
                return State::new(
                    StreamState::Redirected,
                    DataState::Suspect,
                    StateCode::None,
                    format!(
                        "Standard stream redirect to private for stream id {stream_id} - this item must be requested via private stream"
                    ),
                );
            }
            Self::PrivateStreamMismatch => (
                StreamState::Closed,
                StateCode::UsageError,
                "private stream flag does not match the open stream",
            ),
            Self::BatchItemReissue => (
                StreamState::Closed,
                StateCode::UsageError,
                "reissue via batch request is not allowed",
            ),
            Self::DomainNotSupported => (
                StreamState::Closed,
                StateCode::UsageError,
                "domain not supported",
            ),
        };

        State::new(
            stream,
            DataState::Suspect,
            code,
            format!("Item request rejected for stream id {stream_id} - {detail}"),
        )
    }

    /// Whether the reject status goes out on a private stream.
    #[must_use]
    pub const fn is_private(self) -> bool {
        matches!(self, Self::PrivateStreamRedirect | Self::PrivateStreamMismatch)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(RejectReason::ItemCountReached, StreamState::ClosedRecover, StateCode::TooManyItems)]
    #[test_case(RejectReason::InvalidServiceId, StreamState::Closed, StateCode::UsageError)]
    #[test_case(RejectReason::QosNotSupported, StreamState::Closed, StateCode::UsageError)]
    #[test_case(RejectReason::ItemAlreadyOpened, StreamState::Closed, StateCode::AlreadyOpen)]
    #[test_case(RejectReason::StreamAlreadyInUse, StreamState::Closed, StateCode::UsageError)]
    #[test_case(RejectReason::KeyAttribNotSupported, StreamState::Closed, StateCode::UsageError)]
    #[test_case(RejectReason::ItemNotSupported, StreamState::Closed, StateCode::UsageError)]
    #[test_case(RejectReason::PrivateStreamRedirect, StreamState::Redirected, StateCode::None)]
    #[test_case(RejectReason::PrivateStreamMismatch, StreamState::Closed, StateCode::UsageError)]
    #[test_case(RejectReason::BatchItemReissue, StreamState::Closed, StateCode::UsageError)]
    #[test_case(RejectReason::DomainNotSupported, StreamState::Closed, StateCode::UsageError)]
    fn reject_status_mapping(reason: RejectReason, stream: StreamState, code: StateCode) {
        let state = reason.status(7);

        assert_eq!(state.stream, stream);
        assert_eq!(state.data, DataState::Suspect);
        assert_eq!(state.code, code);
        assert!(state.text.contains("stream id 7"));
    }

    #[test]
    fn only_private_stream_reasons_are_private() {
        assert!(RejectReason::PrivateStreamRedirect.is_private());
        assert!(RejectReason::PrivateStreamMismatch.is_private());
        assert!(!RejectReason::ItemAlreadyOpened.is_private());
    }
}
