//! Symbol List Tracking
//!
//! Fixed-capacity table of the item names currently published, behind the
//! symbol list item.
//!
//! # Design
//!
//! The anchor and private-stream items are pinned in the first two slots
//! and never change. Every other name carries a reference count of the
//! request slots that use it; the entry exists while the count is positive.
//! The tracker only reports membership transitions; broadcasting them to
//! symbol list subscribers is the caller's job.

use crate::domain::directory::{ANCHOR_ITEM, PRIVATE_STREAM_ITEM};

/// Names pinned at the head of every symbol list.
pub const RESERVED_NAMES: [&str; 2] = [ANCHOR_ITEM, PRIVATE_STREAM_ITEM];

/// Default table capacity, reserved names included.
pub const DEFAULT_CAPACITY: usize = 100;

/// Result of a membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// The name was new and now has an entry (broadcast ADD).
    Added,
    /// The name already had an entry; its count went up.
    Joined,
    /// The name's count went down but stays positive.
    Left,
    /// The last interest went away and the entry was evicted (broadcast DELETE).
    Removed,
    /// The name is pinned; nothing changed.
    Reserved,
    /// The table is full; the name was not added.
    Full,
    /// The name had no entry; nothing changed.
    Unknown,
}

impl Membership {
    /// Whether subscribers must be told about this change.
    #[must_use]
    pub const fn is_broadcast(self) -> bool {
        matches!(self, Self::Added | Self::Removed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    name: String,
    interest: u32,
}

/// Fixed-capacity symbol list membership table.
#[derive(Debug, Clone)]
pub struct SymbolListTracker {
    slots: Vec<Option<Entry>>,
}

impl SymbolListTracker {
    /// Table with `capacity` slots; the reserved names take the first two.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(RESERVED_NAMES.len());
        let mut slots = vec![None; capacity];

        for (slot, name) in slots.iter_mut().zip(RESERVED_NAMES) {
            *slot = Some(Entry {
                name: name.to_string(),
                interest: 0,
            });
        }

        Self { slots }
    }

    /// Whether `name` is pinned.
    #[must_use]
    pub fn is_reserved(name: &str) -> bool {
        RESERVED_NAMES.contains(&name)
    }

    /// Record one more slot using `name`.
    pub fn add_interest(&mut self, name: &str) -> Membership {
        if Self::is_reserved(name) {
            return Membership::Reserved;
        }

        if let Some(entry) = self.entry_mut(name) {
            entry.interest += 1;
            return Membership::Joined;
        }

        let Some(free) = self.slots.iter_mut().find(|slot| slot.is_none()) else {
            tracing::debug!(name, "symbol list full, name not listed");
            return Membership::Full;
        };

        *free = Some(Entry {
            name: name.to_string(),
            interest: 1,
        });

        Membership::Added
    }

    /// Record one fewer slot using `name`; evicts the entry at zero.
    pub fn remove_interest(&mut self, name: &str) -> Membership {
        if Self::is_reserved(name) {
            return Membership::Reserved;
        }

        let Some(slot) = self
            .slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|entry| entry.name == name))
        else {
            return Membership::Unknown;
        };

        let remaining = slot.as_mut().map_or(0, |entry| {
            entry.interest = entry.interest.saturating_sub(1);
            entry.interest
        });

        if remaining == 0 {
            *slot = None;
            Membership::Removed
        } else {
            Membership::Left
        }
    }

    /// Occupied names in slot order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().flatten().map(|entry| entry.name.as_str())
    }

    /// Interest count of a listed name.
    #[must_use]
    pub fn interest(&self, name: &str) -> Option<u32> {
        self.slots
            .iter()
            .flatten()
            .find(|entry| entry.name == name)
            .map(|entry| entry.interest)
    }

    /// Whether `name` is listed.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.interest(name).is_some()
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Whether only the reserved names are listed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() <= RESERVED_NAMES.len()
    }

    /// Total slots, reserved included.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn entry_mut(&mut self, name: &str) -> Option<&mut Entry> {
        self.slots.iter_mut().flatten().find(|entry| entry.name == name)
    }
}

impl Default for SymbolListTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// =============================================================================
// Tests
// =============================================================================
