//! Stream State Types
//!
//! The state carried on refresh and status messages, and the nak codes
//! carried on negative post acknowledgements.

use serde::{Deserialize, Serialize};

/// Stream state of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// Streaming; further updates follow.
    Open,
    /// Snapshot; no updates follow.
    NonStreaming,
    /// Closed, the consumer may retry later.
    ClosedRecover,
    /// Closed for good.
    Closed,
    /// The consumer should re-request elsewhere (e.g. on a private stream).
    Redirected,
}

impl StreamState {
    /// Whether the stream is finished after this state is delivered.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed | Self::ClosedRecover | Self::Redirected)
    }
}

/// Data state of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataState {
    /// Data state unchanged.
    NoChange,
    /// Data is good.
    Ok,
    /// Data may be stale or missing.
    Suspect,
}

/// Status code refining a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateCode {
    /// No additional information.
    #[default]
    None,
    /// The consumer holds too many open items.
    TooManyItems,
    /// The request was malformed or not permitted.
    UsageError,
    /// The item is already open on another stream.
    AlreadyOpen,
}

/// Full state of a stream: stream and data state, code and text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Stream state.
    pub stream: StreamState,
    /// Data state.
    pub data: DataState,
    /// Refining code.
    #[serde(default)]
    pub code: StateCode,
    /// Human-readable explanation.
    #[serde(default)]
    pub text: String,
}

impl State {
    /// Build a state from its parts.
    #[must_use]
    pub fn new(stream: StreamState, data: DataState, code: StateCode, text: impl Into<String>) -> Self {
        Self {
            stream,
            data,
            code,
            text: text.into(),
        }
    }

    /// Open/Ok with no code.
    #[must_use]
    pub fn open_ok(text: impl Into<String>) -> Self {
        Self::new(StreamState::Open, DataState::Ok, StateCode::None, text)
    }

    /// Closed/Suspect with no code.
    #[must_use]
    pub fn closed_suspect(text: impl Into<String>) -> Self {
        Self::new(StreamState::Closed, DataState::Suspect, StateCode::None, text)
    }
}

/// Reason a post was negatively acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NakCode {
    /// The post content or addressing was invalid.
    InvalidContent,
    /// The posted item is unknown to the provider.
    SymbolUnknown,
}

impl NakCode {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidContent => "invalid_content",
            Self::SymbolUnknown => "symbol_unknown",
        }
    }
}
