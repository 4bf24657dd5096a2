//! Generation-tagged opaque handles.
//!
//! A handle is a 32-bit value: high 16 bits generation, low 16 bits slot.
//! Freed slots are reused, and each bind bumps the slot's generation so a
//! stale handle never reaches the object now occupying its slot.

use std::fmt;

use slab::Slab;

/// Number of addressable slots.
pub const MAX_SLOTS: usize = 1 << 16;

/// Opaque reference to an object bound in a [`HandleTable`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    /// Never produced by `bind`; generation zero means "unbound".
    pub const NULL: Handle = Handle(0);

    fn new(generation: u16, slot: u16) -> Self {
        Self((u32::from(generation) << 16) | u32::from(slot))
    }

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn into_raw(self) -> u32 {
        self.0
    }

    pub fn slot(self) -> usize {
        (self.0 & 0xffff) as usize
    }

    pub fn generation(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn is_null(self) -> bool {
        self.generation() == 0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}:{})", self.generation(), self.slot())
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Slab of bound objects plus a generation per slot.
pub struct HandleTable<T> {
    slots: Slab<T>,
    generations: Vec<u16>,
    max_slots: usize,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self::with_max_slots(MAX_SLOTS)
    }

    /// Table limited to `max_slots` (at most [`MAX_SLOTS`]).
    pub fn with_max_slots(max_slots: usize) -> Self {
        Self {
            slots: Slab::new(),
            generations: Vec::new(),
            max_slots: max_slots.min(MAX_SLOTS),
        }
    }

    /// Bind `object` to a free slot. Returns `None` when every slot is taken.
    pub fn bind(&mut self, object: T) -> Option<Handle> {
        let entry = self.slots.vacant_entry();
        let slot = entry.key();
        if slot >= self.max_slots {
            return None;
        }
        entry.insert(object);

        if slot == self.generations.len() {
            self.generations.push(0);
        }
        let generation = match self.generations[slot].wrapping_add(1) {
            0 => 1,
            g => g,
        };
        self.generations[slot] = generation;
        Some(Handle::new(generation, slot as u16))
    }

    fn is_current(&self, handle: Handle) -> bool {
        !handle.is_null() && self.generations.get(handle.slot()) == Some(&handle.generation())
    }

    /// Object bound to `handle`, or `None` for stale and unknown handles.
    pub fn resolve(&self, handle: Handle) -> Option<&T> {
        if !self.is_current(handle) {
            return None;
        }
        self.slots.get(handle.slot())
    }

    /// Free the slot of `handle` and return its object.
    pub fn unbind(&mut self, handle: Handle) -> Option<T> {
        if !self.is_current(handle) {
            return None;
        }
        self.slots.try_remove(handle.slot())
    }

    /// Unbind everything, yielding the objects.
    pub fn drain(&mut self) -> Vec<T> {
        self.slots.drain().collect()
    }

    /// Handles currently bound.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.slots
            .iter()
            .map(|(slot, _)| Handle::new(self.generations[slot], slot as u16))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_resolve() {
        let mut table = HandleTable::new();
        let a = table.bind("a").unwrap();
        let b = table.bind("b").unwrap();

        assert_ne!(a, b);
        assert!(!a.is_null());
        assert_eq!(table.resolve(a), Some(&"a"));
        assert_eq!(table.resolve(b), Some(&"b"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn unbound_handle_is_not_found() {
        let mut table = HandleTable::new();
        let a = table.bind(1).unwrap();
        assert_eq!(table.unbind(a), Some(1));
        assert_eq!(table.resolve(a), None);
        assert_eq!(table.unbind(a), None);
    }

    #[test]
    fn stale_handle_misses_rebound_slot() {
        let mut table = HandleTable::new();
        let old = table.bind("old").unwrap();
        table.unbind(old);
        let new = table.bind("new").unwrap();

        assert_eq!(new.slot(), old.slot());
        assert_ne!(new.generation(), old.generation());
        assert_eq!(table.resolve(old), None);
        assert_eq!(table.unbind(old), None);
        assert_eq!(table.resolve(new), Some(&"new"));
    }

    #[test]
    fn generation_skips_zero_on_wrap() {
        let mut table = HandleTable::with_max_slots(1);
        let mut handle = table.bind(0u32).unwrap();
        for i in 1..=u32::from(u16::MAX) {
            table.unbind(handle);
            handle = table.bind(i).unwrap();
        }
        // 65536 binds of one slot: generation went 1..=65535 then wrapped past 0
        assert_eq!(handle.generation(), 1);
        assert!(!handle.is_null());
        assert_eq!(table.resolve(handle), Some(&u32::from(u16::MAX)));
    }

    #[test]
    fn exhausted_table_refuses_to_bind() {
        let mut table = HandleTable::with_max_slots(2);
        let a = table.bind('a').unwrap();
        table.bind('b').unwrap();
        assert_eq!(table.bind('c'), None);

        table.unbind(a);
        assert!(table.bind('c').is_some());
    }

    #[test]
    fn null_and_garbage_handles_resolve_to_nothing() {
        let mut table = HandleTable::new();
        table.bind(()).unwrap();
        assert_eq!(table.resolve(Handle::NULL), None);
        assert_eq!(table.resolve(Handle::from_raw(0xdead_beef)), None);
    }

    #[test]
    fn drain_frees_every_slot() {
        let mut table = HandleTable::new();
        let a = table.bind(1).unwrap();
        table.bind(2).unwrap();

        let mut drained = table.drain();
        drained.sort();
        assert_eq!(drained, vec![1, 2]);
        assert!(table.is_empty());
        assert_eq!(table.resolve(a), None);

        // drained slots are bound again under a new generation
        let b = table.bind(3).unwrap();
        assert_ne!(b, a);
        assert_eq!(table.resolve(b), Some(&3));
    }

    #[test]
    fn handles_lists_bound_slots_only() {
        let mut table = HandleTable::new();
        let a = table.bind('a').unwrap();
        let b = table.bind('b').unwrap();
        let c = table.bind('c').unwrap();
        table.unbind(b);

        let mut bound: Vec<_> = table.handles().collect();
        bound.sort();
        assert_eq!(bound, vec![a, c]);
        assert_eq!(table.len(), 2);
    }
}
