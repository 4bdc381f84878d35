//! Generation-checked ownership.
//!
//! A [`Recyclable`] hands out [`Lease`]s stamped with its current
//! generation. Recycling bumps the generation, so every outstanding lease
//! goes stale at once and holders can detect it instead of touching state
//! that now belongs to someone else. [`Arena`] applies the same idea to
//! slot indices.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Recyclable {
    generation: Arc<AtomicU64>,
}

impl Recyclable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lease(&self) -> Lease {
        Lease {
            generation: Arc::clone(&self.generation),
            leased: self.generation.load(Ordering::Acquire),
        }
    }

    /// Invalidate every lease handed out so far.
    pub fn recycle(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Clone)]
pub struct Lease {
    generation: Arc<AtomicU64>,
    leased: u64,
}

impl Lease {
    /// A lease that nothing else can invalidate.
    pub fn detached() -> Self {
        Recyclable::new().lease()
    }

    pub fn is_valid(&self) -> bool {
        self.generation.load(Ordering::Acquire) == self.leased
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaId {
    index: u32,
    generation: u32,
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// Slot storage addressed by generation-checked ids. Removing an entry
/// bumps its slot generation, so stale ids miss instead of aliasing.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena { slots: Vec::new(), free_head: None, len: 0 }
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> ArenaId {
        self.len += 1;
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let (generation, next_free) = match slot {
                Slot::Vacant { generation, next_free } => (*generation, *next_free),
                Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };
            self.free_head = next_free;
            *slot = Slot::Occupied { generation, value };
            return ArenaId { index, generation };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied { generation: 0, value });
        ArenaId { index, generation: 0 }
    }

    pub fn get(&self, id: ArenaId) -> Option<&T> {
        match self.slots.get(id.index as usize)? {
            Slot::Occupied { generation, value } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: ArenaId) -> Option<&mut T> {
        match self.slots.get_mut(id.index as usize)? {
            Slot::Occupied { generation, value } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    /// Remove and return the value. Stale ids are a no-op.
    pub fn remove(&mut self, id: ArenaId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == id.generation => {}
            _ => return None,
        }

        let vacant = Slot::Vacant {
            generation: id.generation.wrapping_add(1),
            next_free: self.free_head,
        };
        let Slot::Occupied { value, .. } = std::mem::replace(slot, vacant) else {
            return None;
        };
        self.free_head = Some(id.index);
        self.len -= 1;
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArenaId, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Occupied { generation, value } => {
                Some((ArenaId { index: index as u32, generation: *generation }, value))
            }
            Slot::Vacant { .. } => None,
        })
    }

    pub fn clear(&mut self) {
        let ids: Vec<ArenaId> = self.iter().map(|(id, _)| id).collect();
        for id in ids {
            self.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycle_invalidates_outstanding_leases() {
        let owner = Recyclable::new();
        let lease = owner.lease();
        assert!(lease.is_valid());
        owner.recycle();
        assert!(!lease.is_valid());
        assert!(owner.lease().is_valid());
    }

    #[test]
    fn stale_arena_ids_miss() {
        let mut arena = Arena::new();
        let first = arena.insert("a");
        assert_eq!(arena.remove(first), Some("a"));
        let second = arena.insert("b");
        assert_eq!(arena.get(first), None);
        assert_eq!(arena.remove(first), None);
        assert_eq!(arena.get(second), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn clear_empties_arena() {
        let mut arena = Arena::new();
        let ids: Vec<_> = (0..4).map(|i| arena.insert(i)).collect();
        arena.clear();
        assert!(arena.is_empty());
        assert!(ids.iter().all(|id| arena.get(*id).is_none()));
    }
}
