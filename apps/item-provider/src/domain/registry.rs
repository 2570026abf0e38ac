//! Item Registry
//!
//! Request slots, shared item records and the symbol list behind one
//! mutation API.
//!
//! # Design
//!
//! - A bounded pool of request slots, one per open (connection, stream id).
//! - An arena of shared items keyed by (name, domain, private flag). Each
//!   item carries an interest count equal to the number of slots that
//!   reference it; the record is freed in the same call that drops the
//!   count to zero.
//! - The symbol list tracker, fed one interest per non-symbol-list slot.
//!
//! Slots and items are addressed by index handles ([`SlotId`], [`ItemId`])
//! so callers can hold on to them across calls without borrowing the
//! registry. A released handle simply stops resolving.

use std::collections::HashMap;
use std::fmt;

use crate::domain::payload::ItemPayload;
use crate::domain::symbol_list::{Membership, SymbolListTracker};
use crate::domain::types::{ConnectionId, DomainType, MsgKey, StreamId};

// =============================================================================
// Handles
// =============================================================================

/// Handle of a request slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(usize);

impl SlotId {
    /// Position in the slot pool.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// Handle of a shared item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(usize);

impl ItemId {
    /// Position in the item arena.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}

// =============================================================================
// Records
// =============================================================================

/// What makes two requests share an item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemIdentity {
    /// Item name.
    pub name: String,
    /// Item domain.
    pub domain: DomainType,
    /// Private items are never shared with public requests.
    pub private_stream: bool,
}

/// One open stream on one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct RequestSlot {
    /// Owning connection.
    pub connection: ConnectionId,
    /// Stream id on that connection.
    pub stream_id: StreamId,
    /// Requested domain.
    pub domain: DomainType,
    /// Requested key.
    pub key: MsgKey,
    /// Streaming rather than snapshot.
    pub streaming: bool,
    /// Opened as a private stream.
    pub private_stream: bool,
    /// Updates carry the key.
    pub key_in_updates: bool,
    /// Referenced item.
    pub item: ItemId,
}

/// Item record shared by every slot that requested it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedItem {
    identity: ItemIdentity,
    interest: u32,
    refresh_pending: bool,
    payload: ItemPayload,
}

impl SharedItem {
    /// Identity of the item.
    #[must_use]
    pub const fn identity(&self) -> &ItemIdentity {
        &self.identity
    }

    /// Item name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Number of slots referencing the item.
    #[must_use]
    pub const fn interest(&self) -> u32 {
        self.interest
    }

    /// Whether the next response should be a refresh.
    #[must_use]
    pub const fn refresh_pending(&self) -> bool {
        self.refresh_pending
    }

    /// Set or clear the pending-refresh flag.
    pub const fn set_refresh_pending(&mut self, pending: bool) {
        self.refresh_pending = pending;
    }

    /// Item data.
    #[must_use]
    pub const fn payload(&self) -> &ItemPayload {
        &self.payload
    }

    /// Mutable item data.
    pub const fn payload_mut(&mut self) -> &mut ItemPayload {
        &mut self.payload
    }
}

// =============================================================================
// Mutation Inputs and Effects
// =============================================================================

/// Everything needed to bind a new slot.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct SlotBinding {
    /// Owning connection.
    pub connection: ConnectionId,
    /// Stream id on that connection.
    pub stream_id: StreamId,
    /// Requested domain.
    pub domain: DomainType,
    /// Requested key.
    pub key: MsgKey,
    /// Name the item is shared under.
    pub item_name: String,
    /// Streaming rather than snapshot.
    pub streaming: bool,
    /// Private stream.
    pub private_stream: bool,
    /// Updates carry the key.
    pub key_in_updates: bool,
    /// Mark the item for a refresh.
    pub refresh_pending: bool,
}

/// Effects of a successful allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// The bound slot.
    pub slot: SlotId,
    /// The referenced item.
    pub item: ItemId,
    /// Whether the item record was created by this allocation.
    pub item_created: bool,
    /// Symbol list transition; `None` for symbol list slots.
    pub symbol_list: Option<Membership>,
}

/// Effects of releasing a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// Handle the slot had.
    pub slot_id: SlotId,
    /// The slot as it was.
    pub slot: RequestSlot,
    /// Name of the referenced item.
    pub item_name: String,
    /// Whether the item record was freed.
    pub item_released: bool,
    /// Symbol list transition; `None` for symbol list slots.
    pub symbol_list: Option<Membership>,
}

impl Release {
    /// Whether symbol list subscribers must be sent a DELETE.
    #[must_use]
    pub const fn evicted_from_symbol_list(&self) -> bool {
        matches!(self.symbol_list, Some(Membership::Removed))
    }
}

/// Allocation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    /// Every slot in the pool is in use.
    #[error("request slot pool exhausted")]
    PoolExhausted,
    /// No payload exists for the domain.
    #[error("no item payload for {0}")]
    UnsupportedDomain(DomainType),
}

/// A registry invariant does not hold.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("registry invariant violated: {0}")]
pub struct InvariantViolation(pub String);

// =============================================================================
// Registry
// =============================================================================

/// Owner of request slots, shared items and the symbol list.
#[derive(Debug)]
pub struct ItemRegistry {
    slots: Vec<Option<RequestSlot>>,
    items: Vec<Option<SharedItem>>,
    free_items: Vec<usize>,
    item_index: HashMap<ItemIdentity, ItemId>,
    symbol_list: SymbolListTracker,
}

impl ItemRegistry {
    /// Registry with a pool of `slot_capacity` request slots.
    #[must_use]
    pub fn new(slot_capacity: usize, symbol_list_capacity: usize) -> Self {
        Self {
            slots: vec![None; slot_capacity],
            items: Vec::new(),
            free_items: Vec::new(),
            item_index: HashMap::new(),
            symbol_list: SymbolListTracker::new(symbol_list_capacity),
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// An in-use slot.
    #[must_use]
    pub fn slot(&self, id: SlotId) -> Option<&RequestSlot> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    #[cfg(test)]
    pub(crate) fn slot_mut(&mut self, id: SlotId) -> Option<&mut RequestSlot> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    /// A live item.
    #[must_use]
    pub fn item(&self, id: ItemId) -> Option<&SharedItem> {
        self.items.get(id.0).and_then(Option::as_ref)
    }

    /// A live item, mutably.
    pub fn item_mut(&mut self, id: ItemId) -> Option<&mut SharedItem> {
        self.items.get_mut(id.0).and_then(Option::as_mut)
    }

    /// The item a slot references.
    #[must_use]
    pub fn item_for_slot(&self, id: SlotId) -> Option<&SharedItem> {
        self.slot(id).and_then(|slot| self.item(slot.item))
    }

    /// Find a live item by identity.
    #[must_use]
    pub fn find_item(&self, name: &str, domain: DomainType, private_stream: bool) -> Option<ItemId> {
        let identity = ItemIdentity {
            name: name.to_string(),
            domain,
            private_stream,
        };
        self.item_index.get(&identity).copied()
    }

    /// The slot bound to a stream on a connection.
    #[must_use]
    pub fn find_by_stream(&self, connection: ConnectionId, stream_id: StreamId) -> Option<SlotId> {
        self.in_use()
            .find(|(_, slot)| slot.connection == connection && slot.stream_id == stream_id)
            .map(|(id, _)| id)
    }

    /// Snapshot of every in-use slot.
    #[must_use]
    pub fn in_use_slots(&self) -> Vec<SlotId> {
        self.in_use().map(|(id, _)| id).collect()
    }

    /// Snapshot of the slots a connection owns.
    #[must_use]
    pub fn slots_for_connection(&self, connection: ConnectionId) -> Vec<SlotId> {
        self.in_use()
            .filter(|(_, slot)| slot.connection == connection)
            .map(|(id, _)| id)
            .collect()
    }

    /// Snapshot of the slots referencing an item.
    #[must_use]
    pub fn slots_for_item(&self, item: ItemId) -> Vec<SlotId> {
        self.in_use()
            .filter(|(_, slot)| slot.item == item)
            .map(|(id, _)| id)
            .collect()
    }

    /// Snapshot of every symbol list slot.
    #[must_use]
    pub fn symbol_list_slots(&self) -> Vec<SlotId> {
        self.in_use()
            .filter(|(_, slot)| slot.domain == DomainType::SymbolList)
            .map(|(id, _)| id)
            .collect()
    }

    /// Number of slots a connection owns.
    #[must_use]
    pub fn connection_slot_count(&self, connection: ConnectionId) -> usize {
        self.in_use()
            .filter(|(_, slot)| slot.connection == connection)
            .count()
    }

    /// Whether the pool has a free slot.
    #[must_use]
    pub fn has_free_slot(&self) -> bool {
        self.slots.iter().any(Option::is_none)
    }

    /// Number of in-use slots.
    #[must_use]
    pub fn open_streams(&self) -> usize {
        self.in_use().count()
    }

    /// Number of live items.
    #[must_use]
    pub fn shared_items(&self) -> usize {
        self.item_index.len()
    }

    /// Pool size.
    #[must_use]
    pub fn slot_capacity(&self) -> usize {
        self.slots.len()
    }

    /// The symbol list.
    #[must_use]
    pub const fn symbol_list(&self) -> &SymbolListTracker {
        &self.symbol_list
    }

    fn in_use(&self) -> impl Iterator<Item = (SlotId, &RequestSlot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|slot| (SlotId(index), slot)))
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Bind a free slot, sharing or creating the item it names.
    ///
    /// # Errors
    ///
    /// [`AllocationError::PoolExhausted`] when no slot is free and
    /// [`AllocationError::UnsupportedDomain`] when the domain has no payload.
    pub fn allocate(&mut self, binding: SlotBinding) -> Result<Allocation, AllocationError> {
        let Some(slot_index) = self.slots.iter().position(Option::is_none) else {
            return Err(AllocationError::PoolExhausted);
        };

        debug_assert!(
            self.find_by_stream(binding.connection, binding.stream_id).is_none(),
            "stream {} already bound on connection {}",
            binding.stream_id,
            binding.connection
        );

        let identity = ItemIdentity {
            name: binding.item_name.clone(),
            domain: binding.domain,
            private_stream: binding.private_stream,
        };

        let (item, item_created) = match self.item_index.get(&identity) {
            Some(&id) => (id, false),
            None => {
                let payload = ItemPayload::for_domain(binding.domain)
                    .ok_or(AllocationError::UnsupportedDomain(binding.domain))?;
                (self.insert_item(identity, payload), true)
            }
        };

        if let Some(shared) = self.item_mut(item) {
            shared.interest += 1;
            if binding.refresh_pending {
                shared.refresh_pending = true;
            }
        }

        let symbol_list = (binding.domain != DomainType::SymbolList)
            .then(|| self.symbol_list.add_interest(&binding.item_name));

        self.slots[slot_index] = Some(RequestSlot {
            connection: binding.connection,
            stream_id: binding.stream_id,
            domain: binding.domain,
            key: binding.key,
            streaming: binding.streaming,
            private_stream: binding.private_stream,
            key_in_updates: binding.key_in_updates,
            item,
        });

        debug_assert!(self.verify_invariants().is_ok());

        Ok(Allocation {
            slot: SlotId(slot_index),
            item,
            item_created,
            symbol_list,
        })
    }

    /// Free a slot, dropping its interest in the item and the symbol list.
    ///
    /// Returns `None` when the slot is not in use.
    pub fn release(&mut self, id: SlotId) -> Option<Release> {
        let slot = self.slots.get_mut(id.0)?.take()?;

        let mut item_name = String::new();
        let mut item_released = false;

        if let Some(shared) = self.item_mut(slot.item) {
            shared.interest = shared.interest.saturating_sub(1);
            item_name.clone_from(&shared.identity.name);
            item_released = shared.interest == 0;
        }

        if item_released {
            self.remove_item(slot.item);
        }

        let symbol_list = (slot.domain != DomainType::SymbolList)
            .then(|| self.symbol_list.remove_interest(&item_name));

        debug_assert!(self.verify_invariants().is_ok());

        Some(Release {
            slot_id: id,
            slot,
            item_name,
            item_released,
            symbol_list,
        })
    }

    /// Advance every live item's simulation by one tick.
    pub fn tick(&mut self) {
        for item in self.items.iter_mut().flatten() {
            item.payload.tick();
        }
    }

    fn insert_item(&mut self, identity: ItemIdentity, payload: ItemPayload) -> ItemId {
        let record = SharedItem {
            identity: identity.clone(),
            interest: 0,
            refresh_pending: false,
            payload,
        };

        let id = if let Some(index) = self.free_items.pop() {
            self.items[index] = Some(record);
            ItemId(index)
        } else {
            self.items.push(Some(record));
            ItemId(self.items.len() - 1)
        };

        self.item_index.insert(identity, id);
        id
    }

    fn remove_item(&mut self, id: ItemId) {
        if let Some(record) = self.items.get_mut(id.0).and_then(Option::take) {
            self.item_index.remove(&record.identity);
            self.free_items.push(id.0);
        }
    }

    // -------------------------------------------------------------------------
    // Invariants
    // -------------------------------------------------------------------------

    /// Check the structural invariants.
    ///
    /// # Errors
    ///
    /// Describes the first invariant found broken.
    pub fn verify_invariants(&self) -> Result<(), InvariantViolation> {
        let mut streams = HashMap::new();
        let mut references: HashMap<ItemId, u32> = HashMap::new();

        for (id, slot) in self.in_use() {
            if let Some(other) = streams.insert((slot.connection, slot.stream_id), id) {
                return Err(InvariantViolation(format!(
                    "{id} and {other} share stream {} on connection {}",
                    slot.stream_id, slot.connection
                )));
            }

            if self.item(slot.item).is_none() {
                return Err(InvariantViolation(format!(
                    "{id} references freed {}",
                    slot.item
                )));
            }

            *references.entry(slot.item).or_default() += 1;
        }

        for (index, record) in self.items.iter().enumerate() {
            let Some(record) = record else { continue };
            let id = ItemId(index);
            let expected = references.get(&id).copied().unwrap_or(0);

            if record.interest != expected || expected == 0 {
                return Err(InvariantViolation(format!(
                    "{id} ({}) has interest {} but {expected} referencing slots",
                    record.identity.name, record.interest
                )));
            }

            if self.item_index.get(&record.identity) != Some(&id) {
                return Err(InvariantViolation(format!("{id} missing from identity index")));
            }
        }

        if self.item_index.len() != references.len() {
            return Err(InvariantViolation(format!(
                "identity index holds {} items but {} are referenced",
                self.item_index.len(),
                references.len()
            )));
        }

        for name in self.symbol_list.names() {
            if SymbolListTracker::is_reserved(name) {
                continue;
            }

            let listed = self.symbol_list.interest(name).unwrap_or(0);
            let using = self
                .in_use()
                .filter(|(_, slot)| slot.domain != DomainType::SymbolList)
                .filter(|(_, slot)| self.item(slot.item).is_some_and(|item| item.name() == name))
                .count();

            if listed == 0 || listed as usize > using {
                return Err(InvariantViolation(format!(
                    "symbol list lists {name} with interest {listed} but {using} slots use it"
                )));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
