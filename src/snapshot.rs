//! Shared snapshot of everything the watcher loop knows about.
//!
//! `AllInfo` keeps every known entity on a doubly-linked list ordered by
//! recency of change (largest revno at the front) with a side map from
//! entity id for O(1) lookup. "What changed since revno R" is then a walk
//! from the front that stops at the first entry already seen.
//!
//! The list is a handle-based arena: slots in a vector linked by indices,
//! recycled through a free list. Handles stay stable across insertions so
//! the id map can store them directly.
//!
//! All mutation happens on the single watcher-loop task; nothing here is
//! shared across threads.

use std::collections::HashMap;

use tracing::trace;

use crate::entity::Delta;
use crate::entity::EntityId;
use crate::entity::EntityInfo;

/// One snapshot record.
#[derive(Debug)]
struct EntityEntry {
    /// Revno of the latest change to this entity. Uniquely identifies the
    /// entry's position in the recency list.
    revno: u64,

    /// Revno at which the entry was first inserted. Decides whether an
    /// observer ever saw the entry alive.
    creation_revno: u64,

    /// True iff the entity has been deleted upstream.
    removed: bool,

    /// Number of observers that were told the entry exists and have not
    /// yet been told it was removed. Kept current at all times; only
    /// consulted once `removed` is set.
    ref_count: usize,

    /// Latest payload. Stale once `removed`.
    info: EntityInfo,
}

#[derive(Debug)]
struct Slot {
    id: EntityId,
    entry: EntityEntry,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Ordered index of all known entities plus the monotone revno counter.
#[derive(Debug, Default)]
pub struct AllInfo {
    latest_revno: u64,
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    /// Most recently changed entry.
    head: Option<usize>,
    /// Oldest entry.
    tail: Option<usize>,
    entities: HashMap<EntityId, usize>,
}

impl AllInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revno of the most recent change, 0 if nothing ever changed.
    pub fn latest_revno(&self) -> u64 {
        self.latest_revno
    }

    /// Number of entries currently indexed, removed-but-referenced ones
    /// included.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Inserts a brand-new entity.
    ///
    /// # Panics
    /// If an entry with the same id is already present. Duplicate adds
    /// mean the caller's view of the world is corrupt.
    pub fn add(&mut self, id: EntityId, info: EntityInfo) {
        if self.entities.contains_key(&id) {
            panic!("adding new entry with duplicate id {id}");
        }
        self.latest_revno += 1;
        let entry = EntityEntry {
            revno: self.latest_revno,
            creation_revno: self.latest_revno,
            removed: false,
            ref_count: 0,
            info,
        };
        let idx = self.alloc(Slot {
            id: id.clone(),
            entry,
            prev: None,
            next: None,
        });
        self.push_front(idx);
        self.entities.insert(id, idx);
    }

    /// Records the latest payload for an entity, inserting it if unknown.
    /// Equal payloads are a no-op: no revno bump, no list movement.
    pub fn update(&mut self, id: EntityId, info: EntityInfo) {
        let Some(&idx) = self.entities.get(&id) else {
            self.add(id, info);
            return;
        };
        if self.slot(idx).entry.info == info {
            trace!(%id, "update with unchanged payload ignored");
            return;
        }
        self.latest_revno += 1;
        let revno = self.latest_revno;
        let slot = self.slot_mut(idx);
        slot.entry.revno = revno;
        slot.entry.info = info;
        self.move_to_front(idx);
    }

    /// Records that an entity was deleted upstream. Unknown or already
    /// removed ids are a no-op. An entry no observer was ever told about
    /// is dropped outright; otherwise it stays as a removal marker until
    /// every holder has been notified.
    pub fn mark_removed(&mut self, id: &EntityId) {
        let Some(&idx) = self.entities.get(id) else {
            return;
        };
        if self.slot(idx).entry.removed {
            return;
        }
        self.latest_revno += 1;
        if self.slot(idx).entry.ref_count == 0 {
            self.delete(idx);
            return;
        }
        let revno = self.latest_revno;
        let slot = self.slot_mut(idx);
        slot.entry.revno = revno;
        slot.entry.removed = true;
        self.move_to_front(idx);
    }

    /// All changes with revno greater than `revno`, oldest first.
    ///
    /// Entries created and removed entirely after `revno` are skipped:
    /// the caller never saw them alive and must not be told they are
    /// gone.
    pub fn changes_since(&self, revno: u64) -> Vec<Delta> {
        let mut newer = Vec::new();
        let mut cur = self.head;
        while let Some(idx) = cur {
            let slot = self.slot(idx);
            if slot.entry.revno <= revno {
                break;
            }
            newer.push(idx);
            cur = slot.next;
        }
        let mut changes = Vec::with_capacity(newer.len());
        for idx in newer.into_iter().rev() {
            let entry = &self.slot(idx).entry;
            if entry.removed && entry.creation_revno > revno {
                continue;
            }
            changes.push(Delta {
                removed: entry.removed,
                entity: entry.info.clone(),
            });
        }
        changes
    }

    /// Refcount bookkeeping after an observer has just been handed every
    /// change newer than `old_revno`: count it in on entries it newly
    /// learned about, count it out of removals it was just told about.
    pub(crate) fn mark_seen(&mut self, old_revno: u64) {
        let mut cur = self.head;
        while let Some(idx) = cur {
            let slot = self.slot(idx);
            if slot.entry.revno <= old_revno {
                break;
            }
            let next = slot.next;
            if slot.entry.creation_revno > old_revno {
                if !slot.entry.removed {
                    self.slot_mut(idx).entry.ref_count += 1;
                }
            } else if slot.entry.removed {
                self.dec_ref(idx);
            }
            cur = next;
        }
    }

    /// Releases everything an observer with the given revno still holds.
    /// Called when the observer is destroyed. Removals the observer was
    /// already told about were decremented at delivery time and are
    /// skipped here.
    pub(crate) fn release(&mut self, revno: u64) {
        let mut cur = self.head;
        while let Some(idx) = cur {
            let slot = self.slot(idx);
            let next = slot.next;
            if slot.entry.creation_revno <= revno
                && !(slot.entry.removed && slot.entry.revno <= revno)
            {
                self.dec_ref(idx);
            }
            cur = next;
        }
    }

    /// Decrements an entry's refcount, dropping the entry once it is
    /// removed and nobody is left to tell.
    ///
    /// # Panics
    /// If the refcount is already zero. That means the per-observer
    /// bookkeeping is corrupt.
    fn dec_ref(&mut self, idx: usize) {
        let slot = self.slot_mut(idx);
        if slot.entry.ref_count == 0 {
            panic!("negative reference count on {}", slot.id);
        }
        slot.entry.ref_count -= 1;
        if slot.entry.ref_count > 0 || !slot.entry.removed {
            return;
        }
        self.delete(idx);
    }

    fn delete(&mut self, idx: usize) {
        self.unlink(idx);
        let slot = self.slots[idx].take().expect("delete of non-existent entry");
        self.entities.remove(&slot.id);
        self.free.push(idx);
        trace!(id = %slot.id, "entry purged from snapshot");
    }

    fn alloc(&mut self, slot: Slot) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let slot = self.slot_mut(idx);
            slot.prev = None;
            slot.next = old_head;
        }
        if let Some(h) = old_head {
            self.slot_mut(h).prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slot(idx);
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.slot_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slot_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let slot = self.slot_mut(idx);
        slot.prev = None;
        slot.next = None;
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn slot(&self, idx: usize) -> &Slot {
        self.slots[idx].as_ref().expect("dangling list handle")
    }

    fn slot_mut(&mut self, idx: usize) -> &mut Slot {
        self.slots[idx].as_mut().expect("dangling list handle")
    }
}

#[cfg(test)]
impl AllInfo {
    /// (id, revno, creation_revno, removed, ref_count) newest first.
    pub(crate) fn entries_newest_first(&self) -> Vec<(EntityId, u64, u64, bool, usize)> {
        let mut out = Vec::new();
        let mut cur = self.head;
        while let Some(idx) = cur {
            let slot = self.slot(idx);
            out.push((
                slot.id.clone(),
                slot.entry.revno,
                slot.entry.creation_revno,
                slot.entry.removed,
                slot.entry.ref_count,
            ));
            cur = slot.next;
        }
        out
    }

    pub(crate) fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub(crate) fn ref_count_of(&self, id: &EntityId) -> Option<usize> {
        self.entities
            .get(id)
            .map(|&idx| self.slot(idx).entry.ref_count)
    }
}
