use serde::Serialize;

use crate::config::SchedulerConfig;
use crate::model::*;

use super::queue::{ActiveSet, WaitQueue};
use super::settle::settle;

/// Side effect of a state transition, dispatched to the collaborators
/// in the order it was produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Settled(UsageRecord),
    RoomState(RoomId, RoomState),
}

/// Wait queue + active set. Every method is one atomic transition;
/// the caller holds the scheduler lock and supplies `now`.
#[derive(Debug)]
pub struct SchedulerState {
    pub(super) waiting: WaitQueue,
    pub(super) active: ActiveSet,
    pub(super) time_slice_ms: Ms,
    pub(super) unit_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerSnapshot {
    pub active: Vec<Slot>,
    /// In dequeue order.
    pub waiting: Vec<Slot>,
}

impl SchedulerState {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            waiting: WaitQueue::new(),
            active: ActiveSet::new(config.capacity),
            time_slice_ms: config.time_slice.as_millis() as Ms,
            unit_rate: config.unit_rate,
        }
    }

    pub fn waiting(&self) -> &WaitQueue {
        &self.waiting
    }

    pub fn active(&self) -> &ActiveSet {
        &self.active
    }

    pub fn is_tracked(&self, room_id: RoomId) -> bool {
        self.active.contains(room_id) || self.waiting.contains(room_id)
    }

    /// Every room currently tracked, active rooms first.
    pub fn tracked_rooms(&self) -> Vec<RoomId> {
        let mut rooms = self.active.rooms();
        rooms.extend(self.waiting.iter().map(|s| s.room_id));
        rooms
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            active: self.active.iter().cloned().collect(),
            waiting: self.waiting.iter().cloned().collect(),
        }
    }

    /// Put `slot` into service at `now`.
    pub(super) fn begin_service(&mut self, mut slot: Slot, now: Ms, effects: &mut Vec<Effect>) {
        slot.service_start = Some(now);
        slot.last_service = now;
        let room_id = slot.room_id;
        self.active.insert(slot);
        effects.push(Effect::RoomState(room_id, RoomState::Active));
    }

    /// Take `room_id` out of service and settle its interval.
    /// The returned slot is no longer active; the caller decides its fate.
    pub(super) fn end_service(
        &mut self,
        room_id: RoomId,
        now: Ms,
        effects: &mut Vec<Effect>,
    ) -> Option<Slot> {
        let mut slot = self.active.remove(room_id)?;
        if let Some(record) = settle(&slot, now, self.unit_rate) {
            effects.push(Effect::Settled(record));
        }
        slot.service_start = None;
        Some(slot)
    }

    /// Cross-structure invariants: capacity bound, no room in both
    /// structures, no duplicate in the queue, queue sorted.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.active.len() > self.active.capacity() {
            return Err(format!(
                "active set holds {} slots, capacity {}",
                self.active.len(),
                self.active.capacity()
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for slot in self.waiting.iter() {
            if !seen.insert(slot.room_id) {
                return Err(format!("room {} queued twice", slot.room_id));
            }
            if self.active.contains(slot.room_id) {
                return Err(format!("room {} both waiting and active", slot.room_id));
            }
            if slot.is_active() {
                return Err(format!("room {} waiting with a service start", slot.room_id));
            }
        }
        let ordered: Vec<&Slot> = self.waiting.iter().collect();
        for pair in ordered.windows(2) {
            if pair[0].priority_cmp(pair[1]) == std::cmp::Ordering::Greater {
                return Err(format!(
                    "queue out of order at rooms {} and {}",
                    pair[0].room_id, pair[1].room_id
                ));
            }
        }
        Ok(())
    }
}
