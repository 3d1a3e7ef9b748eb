use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::model::*;

/// Pending slots kept sorted in dequeue order (index 0 is the head).
#[derive(Debug, Default)]
pub struct WaitQueue {
    slots: Vec<Slot>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert maintaining priority order. Equal keys keep arrival order.
    pub fn push(&mut self, slot: Slot) {
        debug_assert!(!self.contains(slot.room_id), "room already waiting");
        let pos = self
            .slots
            .partition_point(|s| s.priority_cmp(&slot) != Ordering::Greater);
        self.slots.insert(pos, slot);
    }

    pub fn peek(&self) -> Option<&Slot> {
        self.slots.first()
    }

    pub fn pop(&mut self) -> Option<Slot> {
        if self.slots.is_empty() {
            None
        } else {
            Some(self.slots.remove(0))
        }
    }

    pub fn remove(&mut self, room_id: RoomId) -> Option<Slot> {
        let pos = self.slots.iter().position(|s| s.room_id == room_id)?;
        Some(self.slots.remove(pos))
    }

    pub fn contains(&self, room_id: RoomId) -> bool {
        self.slots.iter().any(|s| s.room_id == room_id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots in dequeue order.
    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }
}

/// Slots currently in service, bounded by `capacity`.
#[derive(Debug)]
pub struct ActiveSet {
    capacity: usize,
    slots: BTreeMap<RoomId, Slot>,
}

impl ActiveSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, slot: Slot) {
        debug_assert!(self.slots.len() < self.capacity, "active set over capacity");
        self.slots.insert(slot.room_id, slot);
    }

    pub fn remove(&mut self, room_id: RoomId) -> Option<Slot> {
        self.slots.remove(&room_id)
    }

    pub fn get(&self, room_id: RoomId) -> Option<&Slot> {
        self.slots.get(&room_id)
    }

    pub fn contains(&self, room_id: RoomId) -> bool {
        self.slots.contains_key(&room_id)
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.values()
    }

    pub fn rooms(&self) -> Vec<RoomId> {
        self.slots.keys().copied().collect()
    }

    /// The member that would dequeue last under the wait-queue ordering.
    pub fn lowest_priority(&self) -> Option<&Slot> {
        self.slots.values().max_by(|a, b| a.priority_cmp(b))
    }

    /// Among members at `speed`, the one served continuously the longest.
    pub fn longest_served_peer(&self, speed: Speed) -> Option<&Slot> {
        self.slots
            .values()
            .filter(|s| s.speed == speed)
            .min_by_key(|s| s.service_start)
    }
}
