//! Post Handling
//!
//! Resolves the item a post targets, applies its content and builds the
//! message reflected to every stream viewing the item.
//!
//! # Design
//!
//! Validation outcomes are naks, not errors: a failed post is answered on
//! the poster's stream and nothing is applied or fanned out. A post either
//! passes every check and is applied whole, or is nakked with the first
//! failed check's code.

use std::fmt;

use crate::application::encoder::response_key;
use crate::application::ports::Channel;
use crate::domain::message::{
    Payload, PostContent, PostMsg, PostUserInfo, PostUserRights, RefreshMsg, ResponseMsg, StatusMsg,
    UpdateMsg,
};
use crate::domain::payload::{FieldDictionary, FieldEntry};
use crate::domain::registry::{ItemId, ItemRegistry, RequestSlot};
use crate::domain::state::{NakCode, State, StreamState};

/// Negative acknowledgement of a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nak {
    /// Nak code.
    pub code: NakCode,
    /// Human-readable reason.
    pub text: String,
}

impl Nak {
    /// Nak with `code` and `text`.
    #[must_use]
    pub fn new(code: NakCode, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    fn invalid(text: impl Into<String>) -> Self {
        Self::new(NakCode::InvalidContent, text)
    }
}

impl fmt::Display for Nak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.text)
    }
}

/// The effective message an applied post publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reflection {
    /// Fields reflected as an update.
    Update(Vec<FieldEntry>),
    /// Nested refresh reflected unsolicited.
    Refresh {
        /// Posted state.
        state: State,
        /// Posted fields.
        fields: Vec<FieldEntry>,
    },
    /// Nested status.
    Status {
        /// Posted state.
        state: Option<State>,
        /// The status closes the item: every viewing stream is released
        /// after it is delivered.
        closes: bool,
    },
}

impl Reflection {
    /// Whether the item is deleted once the reflection is delivered.
    #[must_use]
    pub const fn closes_item(&self) -> bool {
        matches!(self, Self::Status { closes: true, .. })
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Update(_) => "update",
            Self::Refresh { .. } => "refresh",
            Self::Status { .. } => "status",
        }
    }
}

/// Validates and applies posts.
#[derive(Debug, Clone)]
pub struct PostingPipeline {
    dictionary: FieldDictionary,
}

impl Default for PostingPipeline {
    fn default() -> Self {
        Self::new(FieldDictionary::standard())
    }
}

impl PostingPipeline {
    /// Pipeline checking field kinds against `dictionary`.
    #[must_use]
    pub const fn new(dictionary: FieldDictionary) -> Self {
        Self { dictionary }
    }

    /// Field dictionary in use.
    #[must_use]
    pub const fn dictionary(&self) -> &FieldDictionary {
        &self.dictionary
    }

    /// Find the item a post targets.
    ///
    /// Off-stream posts arrive on the login stream and name the item in
    /// their key; on-stream posts target the item of the poster's own
    /// stream.
    ///
    /// # Errors
    ///
    /// `INVALID_CONTENT` before login, for an off-stream post without a
    /// key name, or for an on-stream post on a stream that is not open.
    /// `SYMBOL_UNKNOWN` when no public item has the posted name.
    pub fn resolve_target(
        &self,
        registry: &ItemRegistry,
        channel: &dyn Channel,
        post: &PostMsg,
    ) -> Result<ItemId, Nak> {
        let Some(login_stream) = channel.login_stream_id() else {
            return Err(Nak::invalid("Received post before login"));
        };

        if post.stream_id == login_stream {
            let Some(name) = post.key.as_ref().and_then(|key| key.name()) else {
                return Err(Nak::invalid("Off-stream post without a msg key"));
            };

            return registry
                .find_item(name, post.domain, false)
                .ok_or_else(|| Nak::new(NakCode::SymbolUnknown, format!("Unknown item: {name}")));
        }

        registry
            .find_by_stream(channel.id(), post.stream_id)
            .and_then(|slot| registry.slot(slot))
            .map(|slot| slot.item)
            .ok_or_else(|| {
                Nak::invalid(format!("Post on stream {} with no open item", post.stream_id))
            })
    }

    /// Validate the post's content and apply it to `item`.
    ///
    /// # Errors
    ///
    /// `INVALID_CONTENT` when a field has the wrong kind, when fields are
    /// posted to an item without a field payload, or when a closing status
    /// is posted without the delete right.
    pub fn apply(&self, registry: &mut ItemRegistry, item: ItemId, post: &PostMsg) -> Result<Reflection, Nak> {
        match &post.content {
            PostContent::Fields(fields) | PostContent::Update { fields } => {
                self.apply_fields(registry, item, fields)?;
                Ok(Reflection::Update(fields.clone()))
            }
            PostContent::Refresh { state, fields } => {
                self.apply_fields(registry, item, fields)?;
                Ok(Reflection::Refresh {
                    state: state.clone(),
                    fields: fields.clone(),
                })
            }
            PostContent::Status { state } => {
                let closes = state
                    .as_ref()
                    .is_some_and(|state| state.stream == StreamState::Closed);

                if closes && !post.user_rights.contains(PostUserRights::DELETE) {
                    return Err(Nak::invalid("Closing status posted without delete rights"));
                }

                Ok(Reflection::Status {
                    state: state.clone(),
                    closes,
                })
            }
        }
    }

    fn apply_fields(&self, registry: &mut ItemRegistry, item: ItemId, fields: &[FieldEntry]) -> Result<(), Nak> {
        self.dictionary
            .validate(fields)
            .map_err(|e| Nak::invalid(e.to_string()))?;

        let Some(record) = registry
            .item_mut(item)
            .and_then(|shared| shared.payload_mut().market_price_mut())
        else {
            return Err(Nak::invalid("Post to unsupported domain"));
        };

        let applied = record.apply_fields(fields);
        tracing::debug!(%item, applied, total = fields.len(), "applied posted fields");

        Ok(())
    }
}

/// Build the message a viewing slot receives for an applied post.
#[must_use]
pub fn reflect_for(slot: &RequestSlot, name: &str, reflection: &Reflection, user: PostUserInfo) -> ResponseMsg {
    match reflection {
        Reflection::Update(fields) => ResponseMsg::Update(UpdateMsg {
            stream_id: slot.stream_id,
            domain: slot.domain,
            key: slot.key_in_updates.then(|| response_key(slot, name)),
            post_user: Some(user),
            payload: Payload::FieldList(fields.clone()),
        }),
        Reflection::Refresh { state, fields } => ResponseMsg::Refresh(RefreshMsg {
            stream_id: slot.stream_id,
            domain: slot.domain,
            key: Some(response_key(slot, name)),
            state: state.clone(),
            qos: None,
            solicited: false,
            complete: true,
            clear_cache: false,
            private_stream: slot.private_stream,
            part_number: None,
            post_user: Some(user),
            payload: Payload::FieldList(fields.clone()),
        }),
        Reflection::Status { state, .. } => ResponseMsg::Status(StatusMsg {
            stream_id: slot.stream_id,
            domain: slot.domain,
            key: None,
            state: state.clone(),
            private_stream: slot.private_stream,
            post_user: Some(user),
        }),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::application::ports::MockChannel;
    use crate::domain::payload::{FieldValue, fid};
    use crate::domain::registry::{SlotBinding, SlotId};
    use crate::domain::state::DataState;
    use crate::domain::types::{DomainType, MsgKey};

    const LOGIN_STREAM: i32 = 1;

    fn channel(login: Option<i32>) -> MockChannel {
        let mut channel = MockChannel::new();
        channel.expect_id().return_const(1_u64);
        channel.expect_login_stream_id().return_const(login);
        channel
    }

    fn open(registry: &mut ItemRegistry, stream_id: i32, domain: DomainType, name: &str) -> SlotId {
        registry
            .allocate(SlotBinding {
                connection: 1,
                stream_id,
                domain,
                key: MsgKey::named(name, 1),
                item_name: name.to_string(),
                streaming: true,
                private_stream: false,
                key_in_updates: false,
                refresh_pending: false,
            })
            .unwrap()
            .slot
    }

    fn bid(value: FieldValue) -> Vec<FieldEntry> {
        vec![FieldEntry::new(fid::BID, value)]
    }

    #[test]
    fn post_before_login_is_invalid() {
        let registry = ItemRegistry::new(4, 10);
        let post = PostMsg::on_stream(5, DomainType::MarketPrice, 1, PostContent::Fields(vec![]));

        let nak = PostingPipeline::default()
            .resolve_target(&registry, &channel(None), &post)
            .unwrap_err();

        assert_eq!(nak.code, NakCode::InvalidContent);
    }

    #[test]
    fn off_stream_post_without_key_is_invalid() {
        let registry = ItemRegistry::new(4, 10);
        let mut post = PostMsg::on_stream(LOGIN_STREAM, DomainType::MarketPrice, 1, PostContent::Fields(vec![]));
        post.key = None;

        let nak = PostingPipeline::default()
            .resolve_target(&registry, &channel(Some(LOGIN_STREAM)), &post)
            .unwrap_err();

        assert_eq!(nak.code, NakCode::InvalidContent);
    }

    #[test]
    fn off_stream_post_to_unknown_item_is_symbol_unknown() {
        let registry = ItemRegistry::new(4, 10);
        let post = PostMsg::off_stream(
            LOGIN_STREAM,
            DomainType::MarketPrice,
            MsgKey::named("NOPE", 1),
            1,
            PostContent::Fields(vec![]),
        );

        let nak = PostingPipeline::default()
            .resolve_target(&registry, &channel(Some(LOGIN_STREAM)), &post)
            .unwrap_err();

        assert_eq!(nak.code, NakCode::SymbolUnknown);
        assert!(nak.text.contains("NOPE"));
    }

    #[test]
    fn off_stream_post_finds_public_item() {
        let mut registry = ItemRegistry::new(4, 10);
        let slot = open(&mut registry, 5, DomainType::MarketPrice, "TRI");
        let post = PostMsg::off_stream(
            LOGIN_STREAM,
            DomainType::MarketPrice,
            MsgKey::named("TRI", 1),
            1,
            PostContent::Fields(vec![]),
        );

        let item = PostingPipeline::default()
            .resolve_target(&registry, &channel(Some(LOGIN_STREAM)), &post)
            .unwrap();

        assert_eq!(item, registry.slot(slot).unwrap().item);
    }

    #[test]
    fn on_stream_post_without_open_stream_is_invalid() {
        let registry = ItemRegistry::new(4, 10);
        let post = PostMsg::on_stream(9, DomainType::MarketPrice, 1, PostContent::Fields(vec![]));

        let nak = PostingPipeline::default()
            .resolve_target(&registry, &channel(Some(LOGIN_STREAM)), &post)
            .unwrap_err();

        assert_eq!(nak.code, NakCode::InvalidContent);
    }

    #[test]
    fn posted_fields_are_applied() {
        let mut registry = ItemRegistry::new(4, 10);
        let slot = open(&mut registry, 5, DomainType::MarketPrice, "TRI");
        let item = registry.slot(slot).unwrap().item;
        let post = PostMsg::on_stream(5, DomainType::MarketPrice, 1, PostContent::Fields(bid(FieldValue::Real(dec!(7.25)))));

        let reflection = PostingPipeline::default().apply(&mut registry, item, &post).unwrap();

        assert_eq!(reflection, Reflection::Update(bid(FieldValue::Real(dec!(7.25)))));
        let record = registry.item(item).unwrap().payload().market_price().unwrap();
        assert_eq!(record.bid(), dec!(7.25));
    }

    #[test]
    fn mistyped_field_is_nakked_and_not_applied() {
        let mut registry = ItemRegistry::new(4, 10);
        let slot = open(&mut registry, 5, DomainType::MarketPrice, "TRI");
        let item = registry.slot(slot).unwrap().item;
        let before = registry.item(item).unwrap().payload().clone();
        let post = PostMsg::on_stream(5, DomainType::MarketPrice, 1, PostContent::Fields(bid(FieldValue::Ascii("high".into()))));

        let nak = PostingPipeline::default().apply(&mut registry, item, &post).unwrap_err();

        assert_eq!(nak.code, NakCode::InvalidContent);
        assert!(nak.text.contains("BID"));
        assert_eq!(registry.item(item).unwrap().payload(), &before);
    }

    #[test]
    fn fields_to_depth_item_are_unsupported() {
        let mut registry = ItemRegistry::new(4, 10);
        let slot = open(&mut registry, 5, DomainType::MarketByOrder, "AAO.V");
        let item = registry.slot(slot).unwrap().item;
        let post = PostMsg::on_stream(5, DomainType::MarketByOrder, 1, PostContent::Update { fields: vec![] });

        let nak = PostingPipeline::default().apply(&mut registry, item, &post).unwrap_err();

        assert_eq!(nak, Nak::new(NakCode::InvalidContent, "Post to unsupported domain"));
    }

    #[test]
    fn closing_status_needs_delete_right() {
        let mut registry = ItemRegistry::new(4, 10);
        let slot = open(&mut registry, 5, DomainType::MarketPrice, "TRI");
        let item = registry.slot(slot).unwrap().item;
        let mut post = PostMsg::on_stream(
            5,
            DomainType::MarketPrice,
            1,
            PostContent::Status {
                state: Some(State::closed_suspect("gone")),
            },
        );
        let pipeline = PostingPipeline::default();

        let denied = pipeline.apply(&mut registry, item, &post).unwrap_err();
        post.user_rights = PostUserRights::CREATE.union(PostUserRights::DELETE);
        let allowed = pipeline.apply(&mut registry, item, &post).unwrap();

        assert_eq!(denied.code, NakCode::InvalidContent);
        assert!(allowed.closes_item());
    }

    #[test]
    fn open_status_does_not_close() {
        let mut registry = ItemRegistry::new(4, 10);
        let slot = open(&mut registry, 5, DomainType::MarketPrice, "TRI");
        let item = registry.slot(slot).unwrap().item;
        let post = PostMsg::on_stream(
            5,
            DomainType::MarketPrice,
            1,
            PostContent::Status {
                state: Some(State::open_ok("still here")),
            },
        );

        let reflection = PostingPipeline::default().apply(&mut registry, item, &post).unwrap();

        assert!(!reflection.closes_item());
    }

    #[test]
    fn reflected_refresh_is_unsolicited_with_key_and_user() {
        let mut registry = ItemRegistry::new(4, 10);
        let slot_id = open(&mut registry, 5, DomainType::MarketPrice, "TRI");
        let slot = registry.slot(slot_id).unwrap().clone();
        let user = PostUserInfo {
            address: 0x7f00_0001,
            user_id: 42,
        };
        let reflection = Reflection::Refresh {
            state: State::open_ok("posted"),
            fields: vec![],
        };

        let msg = reflect_for(&slot, "TRI", &reflection, user);

        let refresh = msg.as_refresh().unwrap();
        assert!(!refresh.solicited);
        assert_eq!(refresh.key.as_ref().and_then(MsgKey::name), Some("TRI"));
        assert_eq!(refresh.post_user, Some(user));
        assert_eq!(refresh.state.data, DataState::Ok);
    }

    #[test]
    fn reflected_update_carries_user() {
        let mut registry = ItemRegistry::new(4, 10);
        let slot_id = open(&mut registry, 5, DomainType::MarketPrice, "TRI");
        let slot = registry.slot(slot_id).unwrap().clone();

        let msg = reflect_for(&slot, "TRI", &Reflection::Update(vec![]), PostUserInfo::default());

        let update = msg.as_update().unwrap();
        assert_eq!(update.stream_id, 5);
        assert!(update.key.is_none());
        assert_eq!(update.post_user, Some(PostUserInfo::default()));
    }
}
