//! Generation-checked slab storage.
//!
//! The node store and the subscription registry both need the same shape:
//! stable, reusable slots with an identity that cannot be confused with
//! whatever gets planted in a slot after the original occupant is removed.
//! A raw index into a `Vec` does not give you that on its own, so every
//! handle here carries a generation counter alongside the slot number.

use std::fmt;

/// An index into an [`Arena`], paired with the generation the slot held
/// when the index was minted.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaIndex {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot, self.generation)
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// A generation-checked slab of `T`.
///
/// Removing a value bumps the slot's generation and pushes it onto an
/// internal free list, so a stale [`ArenaIndex`] resolves to `None` forever
/// rather than silently aliasing whatever gets inserted next.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            slots: Vec::with_capacity(cap),
            free_head: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> ArenaIndex {
        match self.free_head {
            Some(slot) => {
                let entry = &mut self.slots[slot as usize];
                let generation = match *entry {
                    Slot::Vacant {
                        generation,
                        next_free,
                    } => {
                        self.free_head = next_free;
                        generation
                    }
                    Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
                };
                *entry = Slot::Occupied { generation, value };
                self.len += 1;
                ArenaIndex { slot, generation }
            }
            None => {
                let slot = self.slots.len() as u32;
                self.slots.push(Slot::Occupied {
                    generation: 0,
                    value,
                });
                self.len += 1;
                ArenaIndex { slot, generation: 0 }
            }
        }
    }

    pub fn get(&self, idx: ArenaIndex) -> Option<&T> {
        match self.slots.get(idx.slot as usize)? {
            Slot::Occupied { generation, value } if *generation == idx.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, idx: ArenaIndex) -> Option<&mut T> {
        match self.slots.get_mut(idx.slot as usize)? {
            Slot::Occupied { generation, value } if *generation == idx.generation => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, idx: ArenaIndex) -> bool {
        self.get(idx).is_some()
    }

    /// Removes and returns the value at `idx`, bumping the slot's
    /// generation so existing indices into it become permanently stale.
    pub fn remove(&mut self, idx: ArenaIndex) -> Option<T> {
        let slot_ref = self.slots.get_mut(idx.slot as usize)?;
        match slot_ref {
            Slot::Occupied { generation, .. } if *generation == idx.generation => {
                let generation = *generation;
                let prev = std::mem::replace(
                    slot_ref,
                    Slot::Vacant {
                        generation: generation.wrapping_add(1),
                        next_free: self.free_head,
                    },
                );
                self.free_head = Some(idx.slot);
                self.len -= 1;
                match prev {
                    Slot::Occupied { value, .. } => Some(value),
                    _ => unreachable!(),
                }
            }
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> {
        self.slots.iter().enumerate().filter_map(|(slot, s)| match s {
            Slot::Occupied { generation, value } => Some((
                ArenaIndex {
                    slot: slot as u32,
                    generation: *generation,
                },
                value,
            )),
            Slot::Vacant { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reused_slot_invalidates_old_index() {
        let mut arena: Arena<&'static str> = Arena::new();
        let a = arena.insert("a");
        assert_eq!(arena.remove(a), Some("a"));
        let b = arena.insert("b");
        assert_eq!(b.slot, a.slot);
        assert_ne!(b.generation, a.generation);
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
    }

    #[test]
    fn iter_skips_vacant_slots() {
        let mut arena: Arena<i32> = Arena::new();
        let a = arena.insert(1);
        let _b = arena.insert(2);
        arena.remove(a);
        let remaining: Vec<_> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(remaining, vec![2]);
    }
}
