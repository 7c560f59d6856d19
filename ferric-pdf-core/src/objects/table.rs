//! Indirect object table
//!
//! The single owner of every in-memory indirect object of a document. Objects
//! that are known to the xref index but were never loaded (or were evicted)
//! simply have no slot here.

use crate::objects::{Object, ObjectId};
use std::collections::BTreeMap;

/// State of an object held by the table.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// Loaded from the source file and unchanged; may be evicted.
    Loaded(Object),
    /// Created or changed in memory; must be written on save.
    Modified(Object),
    /// Deleted in memory; written as a free entry on save.
    Removed,
}

#[derive(Debug, Default)]
pub struct IndirectObjectTable {
    slots: BTreeMap<ObjectId, Slot>,
    next_number: u32,
}

impl IndirectObjectTable {
    /// `next_number` is the first object number handed out by [`allocate`](Self::allocate).
    pub fn new(next_number: u32) -> Self {
        Self {
            slots: BTreeMap::new(),
            next_number: next_number.max(1),
        }
    }

    pub fn slot(&self, id: ObjectId) -> Option<&Slot> {
        self.slots.get(&id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        match self.slots.get(&id) {
            Some(Slot::Loaded(obj)) | Some(Slot::Modified(obj)) => Some(obj),
            _ => None,
        }
    }

    pub fn is_removed(&self, id: ObjectId) -> bool {
        matches!(self.slots.get(&id), Some(Slot::Removed))
    }

    pub fn is_modified(&self, id: ObjectId) -> bool {
        matches!(self.slots.get(&id), Some(Slot::Modified(_)))
    }

    /// Caches an object read from the source. Pending modifications are kept.
    pub fn store_loaded(&mut self, id: ObjectId, object: Object) {
        if !self.slots.contains_key(&id) {
            self.slots.insert(id, Slot::Loaded(object));
        }
    }

    /// Replaces (or inserts) an object and marks it modified.
    pub fn set_modified(&mut self, id: ObjectId, object: Object) {
        if id.number() >= self.next_number {
            self.next_number = id.number().saturating_add(1);
        }
        self.slots.insert(id, Slot::Modified(object));
    }

    /// Mutable access to a cached object, promoting it to modified.
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        let slot = self.slots.get_mut(&id)?;
        if let Slot::Loaded(obj) = slot {
            *slot = Slot::Modified(std::mem::take(obj));
        }
        match slot {
            Slot::Modified(obj) => Some(obj),
            _ => None,
        }
    }

    /// Reserves a fresh object number.
    pub fn allocate(&mut self) -> ObjectId {
        let id = ObjectId::new(self.next_number, 0);
        self.next_number = self.next_number.saturating_add(1);
        id
    }

    /// Keeps future allocations at or above `size`, e.g. a trailer `/Size`.
    pub fn reserve_below(&mut self, size: u32) {
        self.next_number = self.next_number.max(size).max(1);
    }

    pub fn next_number(&self) -> u32 {
        self.next_number
    }

    pub fn remove(&mut self, id: ObjectId) {
        self.slots.insert(id, Slot::Removed);
    }

    /// Drops a clean cached object. Returns false for modified, removed or
    /// unknown entries.
    pub fn evict(&mut self, id: ObjectId) -> bool {
        match self.slots.get(&id) {
            Some(Slot::Loaded(_)) => {
                self.slots.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Modified objects in object-number order.
    pub fn modified(&self) -> impl Iterator<Item = (ObjectId, &Object)> {
        self.slots.iter().filter_map(|(id, slot)| match slot {
            Slot::Modified(obj) => Some((*id, obj)),
            _ => None,
        })
    }

    pub fn removed(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.slots.iter().filter_map(|(id, slot)| match slot {
            Slot::Removed => Some(*id),
            _ => None,
        })
    }

    pub fn has_changes(&self) -> bool {
        self.slots
            .values()
            .any(|slot| !matches!(slot, Slot::Loaded(_)))
    }

    /// After changes were persisted: modified objects become clean and removed
    /// slots are forgotten.
    pub fn commit(&mut self) {
        self.slots.retain(|_, slot| !matches!(slot, Slot::Removed));
        for slot in self.slots.values_mut() {
            if let Slot::Modified(obj) = slot {
                *slot = Slot::Loaded(std::mem::take(obj));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
