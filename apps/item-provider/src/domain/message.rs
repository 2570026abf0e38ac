//! Provider Messages
//!
//! Inbound requests and posts as decoded by the transport layer, and the
//! outbound responses the provider produces.
//!
//! # Design
//!
//! Responses are a closed enum over refresh, update, status and ack so a
//! codec can serialize any of them and tests can match on what a channel
//! received.

use serde::{Deserialize, Serialize};

use crate::domain::payload::{FieldEntry, MapEntry};
use crate::domain::state::{NakCode, State};
use crate::domain::types::{DomainType, MsgKey, Qos, ServiceId, StreamId};

// =============================================================================
// Requests
// =============================================================================

/// Behavior flags of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct RequestFlags {
    /// Streaming (updates follow the refresh) rather than snapshot.
    pub streaming: bool,
    /// The consumer does not want a refresh.
    pub no_refresh: bool,
    /// The consumer asks for a private stream.
    pub private_stream: bool,
    /// Updates should carry the item key.
    pub msg_key_in_updates: bool,
}

/// An item request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMsg {
    /// Stream the consumer opened for this request.
    pub stream_id: StreamId,
    /// Requested domain.
    pub domain: DomainType,
    /// Item key. For batch requests only the service id and attributes apply.
    pub key: MsgKey,
    /// Requested QoS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qos: Option<Qos>,
    /// Worst acceptable QoS; only meaningful with `qos`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worst_qos: Option<Qos>,
    /// Behavior flags.
    #[serde(default)]
    pub flags: RequestFlags,
    /// Item names of a batch request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<Vec<String>>,
}

impl RequestMsg {
    /// Streaming request for one named item.
    #[must_use]
    pub fn item(
        stream_id: StreamId,
        domain: DomainType,
        name: impl Into<String>,
        service_id: ServiceId,
    ) -> Self {
        Self {
            stream_id,
            domain,
            key: MsgKey::named(name, service_id),
            qos: None,
            worst_qos: None,
            flags: RequestFlags {
                streaming: true,
                ..RequestFlags::default()
            },
            batch: None,
        }
    }

    /// Streaming batch request for several named items.
    #[must_use]
    pub fn batch<I, S>(stream_id: StreamId, domain: DomainType, service_id: ServiceId, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stream_id,
            domain,
            key: MsgKey {
                name: None,
                service_id: Some(service_id),
                attrib: None,
            },
            qos: None,
            worst_qos: None,
            flags: RequestFlags {
                streaming: true,
                ..RequestFlags::default()
            },
            batch: Some(names.into_iter().map(Into::into).collect()),
        }
    }

    /// Turn this into a snapshot request.
    #[must_use]
    pub const fn snapshot(mut self) -> Self {
        self.flags.streaming = false;
        self
    }

    /// Mark this request private.
    #[must_use]
    pub const fn private(mut self) -> Self {
        self.flags.private_stream = true;
        self
    }

    /// Suppress the refresh.
    #[must_use]
    pub const fn without_refresh(mut self) -> Self {
        self.flags.no_refresh = true;
        self
    }

    /// Ask for the key on every update.
    #[must_use]
    pub const fn with_key_in_updates(mut self) -> Self {
        self.flags.msg_key_in_updates = true;
        self
    }

    /// Request a QoS, optionally with a worst acceptable QoS.
    #[must_use]
    pub const fn with_qos(mut self, qos: Qos, worst: Option<Qos>) -> Self {
        self.qos = Some(qos);
        self.worst_qos = worst;
        self
    }

    /// Whether this is a batch request.
    #[must_use]
    pub const fn is_batch(&self) -> bool {
        self.batch.is_some()
    }
}

// =============================================================================
// Posts
// =============================================================================

/// Identity of the user who submitted a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostUserInfo {
    /// Network address of the posting user.
    pub address: u32,
    /// User id of the posting user.
    pub user_id: u32,
}

/// Rights the posting user holds over the item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostUserRights(u16);

impl PostUserRights {
    /// No rights.
    pub const NONE: Self = Self(0);
    /// May create items.
    pub const CREATE: Self = Self(0x1);
    /// May delete items.
    pub const DELETE: Self = Self(0x2);
    /// May change item permissions.
    pub const MODIFY_PERMISSION: Self = Self(0x4);

    /// Raw bit set.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Whether every bit of `other` is held.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two right sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Content of a post: a bare field list or a nested message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostContent {
    /// Bare field list; reflected as an update.
    Fields(Vec<FieldEntry>),
    /// Nested refresh.
    Refresh {
        /// State to publish.
        state: State,
        /// Fields to apply and publish.
        fields: Vec<FieldEntry>,
    },
    /// Nested update.
    Update {
        /// Fields to apply and publish.
        fields: Vec<FieldEntry>,
    },
    /// Nested status.
    Status {
        /// State to publish, if any.
        state: Option<State>,
    },
}

/// A consumer post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMsg {
    /// Stream the post arrived on: the login stream for off-stream posts,
    /// an item stream for on-stream posts.
    pub stream_id: StreamId,
    /// Domain of the posted item.
    pub domain: DomainType,
    /// Item key; required for off-stream posts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<MsgKey>,
    /// Poster-assigned id, echoed as the ack id.
    pub post_id: u32,
    /// Optional sequence number, echoed on the ack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_num: Option<u32>,
    /// Whether the poster wants an ack.
    #[serde(default)]
    pub ack_requested: bool,
    /// Posting user.
    #[serde(default)]
    pub user: PostUserInfo,
    /// Posting user's rights.
    #[serde(default)]
    pub user_rights: PostUserRights,
    /// Post content.
    pub content: PostContent,
}

impl PostMsg {
    /// Off-stream field post to a named item, asking for an ack.
    #[must_use]
    pub fn off_stream(
        login_stream_id: StreamId,
        domain: DomainType,
        key: MsgKey,
        post_id: u32,
        content: PostContent,
    ) -> Self {
        Self {
            stream_id: login_stream_id,
            domain,
            key: Some(key),
            post_id,
            seq_num: None,
            ack_requested: true,
            user: PostUserInfo::default(),
            user_rights: PostUserRights::NONE,
            content,
        }
    }

    /// On-stream post on an item stream, asking for an ack.
    #[must_use]
    pub fn on_stream(stream_id: StreamId, domain: DomainType, post_id: u32, content: PostContent) -> Self {
        Self {
            stream_id,
            domain,
            key: None,
            post_id,
            seq_num: None,
            ack_requested: true,
            user: PostUserInfo::default(),
            user_rights: PostUserRights::NONE,
            content,
        }
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Map payload: optional summary fields plus keyed entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapPayload {
    /// Summary fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub summary: Vec<FieldEntry>,
    /// Keyed entries.
    pub entries: Vec<MapEntry>,
}

/// Payload of a refresh or update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// No payload.
    #[default]
    None,
    /// Flat field list.
    FieldList(Vec<FieldEntry>),
    /// Keyed map.
    Map(MapPayload),
}

/// Full image of an item, possibly one part of several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct RefreshMsg {
    /// Target stream.
    pub stream_id: StreamId,
    /// Item domain.
    pub domain: DomainType,
    /// Item key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<MsgKey>,
    /// Stream state.
    pub state: State,
    /// QoS the item is published at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qos: Option<Qos>,
    /// Sent in response to a request.
    pub solicited: bool,
    /// Last part of the refresh.
    pub complete: bool,
    /// The consumer should clear cached data first.
    pub clear_cache: bool,
    /// Sent on a private stream.
    #[serde(default)]
    pub private_stream: bool,
    /// Zero-based part number of a multi-part refresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_number: Option<u32>,
    /// User who posted this content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_user: Option<PostUserInfo>,
    /// Item data.
    pub payload: Payload,
}

/// Change to an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMsg {
    /// Target stream.
    pub stream_id: StreamId,
    /// Item domain.
    pub domain: DomainType,
    /// Item key, when the consumer asked for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<MsgKey>,
    /// User who posted this content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_user: Option<PostUserInfo>,
    /// Changed data.
    pub payload: Payload,
}

/// State-only message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMsg {
    /// Target stream.
    pub stream_id: StreamId,
    /// Item domain.
    pub domain: DomainType,
    /// Item key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<MsgKey>,
    /// New stream state, if it changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    /// Sent on a private stream.
    #[serde(default)]
    pub private_stream: bool,
    /// User who posted this content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_user: Option<PostUserInfo>,
}

/// Acknowledgement of a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMsg {
    /// Stream the post arrived on.
    pub stream_id: StreamId,
    /// Domain of the post.
    pub domain: DomainType,
    /// Echo of the post id.
    pub ack_id: u32,
    /// Echo of the post sequence number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_num: Option<u32>,
    /// Set on a negative acknowledgement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nak_code: Option<NakCode>,
    /// Explanation of a nak.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Any message the provider sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMsg {
    /// Refresh.
    Refresh(RefreshMsg),
    /// Update.
    Update(UpdateMsg),
    /// Status.
    Status(StatusMsg),
    /// Ack or nak.
    Ack(AckMsg),
}

impl ResponseMsg {
    /// Stream the message is addressed to.
    #[must_use]
    pub const fn stream_id(&self) -> StreamId {
        match self {
            Self::Refresh(m) => m.stream_id,
            Self::Update(m) => m.stream_id,
            Self::Status(m) => m.stream_id,
            Self::Ack(m) => m.stream_id,
        }
    }

    /// Message class label, for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Refresh(_) => "refresh",
            Self::Update(_) => "update",
            Self::Status(_) => "status",
            Self::Ack(_) => "ack",
        }
    }

    /// The refresh, if this is one.
    #[must_use]
    pub const fn as_refresh(&self) -> Option<&RefreshMsg> {
        match self {
            Self::Refresh(m) => Some(m),
            _ => None,
        }
    }

    /// The update, if this is one.
    #[must_use]
    pub const fn as_update(&self) -> Option<&UpdateMsg> {
        match self {
            Self::Update(m) => Some(m),
            _ => None,
        }
    }

    /// The status, if this is one.
    #[must_use]
    pub const fn as_status(&self) -> Option<&StatusMsg> {
        match self {
            Self::Status(m) => Some(m),
            _ => None,
        }
    }

    /// The ack, if this is one.
    #[must_use]
    pub const fn as_ack(&self) -> Option<&AckMsg> {
        match self {
            Self::Ack(m) => Some(m),
            _ => None,
        }
    }
}
