use crate::model::*;

use super::state::{Effect, SchedulerState};

/// What an intake request did to the scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// New slot placed in the wait queue.
    Queued,
    /// Waiting slot re-tiered in place (identity kept).
    Requeued,
    /// Active slot settled and replaced by a fresh waiting slot.
    Replaced,
    /// Active slot settled and discarded.
    Stopped,
    /// Waiting slot discarded.
    Withdrawn,
    /// Nothing to do (already tracked, unknown room, or unchanged speed).
    Ignored,
}

impl SchedulerState {
    pub fn apply(&mut self, req: ServiceRequest, now: Ms, effects: &mut Vec<Effect>) -> IntakeOutcome {
        match req.op {
            Operation::Start { speed } => self.start(req.room_id, speed, now, effects),
            Operation::Update { speed } => self.update(req.room_id, speed, now, effects),
            Operation::Stop => self.stop(req.room_id, now, effects),
        }
    }

    fn start(&mut self, room_id: RoomId, speed: Speed, now: Ms, effects: &mut Vec<Effect>) -> IntakeOutcome {
        if self.is_tracked(room_id) {
            return IntakeOutcome::Ignored;
        }
        self.waiting.push(Slot::new(room_id, speed, now));
        effects.push(Effect::RoomState(room_id, RoomState::Pending));
        IntakeOutcome::Queued
    }

    fn update(&mut self, room_id: RoomId, speed: Speed, now: Ms, effects: &mut Vec<Effect>) -> IntakeOutcome {
        if let Some(current) = self.active.get(room_id) {
            if current.speed == speed {
                return IntakeOutcome::Ignored;
            }
            // Old (speed, interval) is billed; the request competes again as a new one.
            self.end_service(room_id, now, effects);
            self.waiting.push(Slot::new(room_id, speed, now));
            effects.push(Effect::RoomState(room_id, RoomState::Pending));
            return IntakeOutcome::Replaced;
        }
        match self.waiting.remove(room_id) {
            Some(mut slot) => {
                slot.speed = speed;
                slot.last_service = now;
                self.waiting.push(slot);
                effects.push(Effect::RoomState(room_id, RoomState::Pending));
                IntakeOutcome::Requeued
            }
            None => IntakeOutcome::Ignored,
        }
    }

    fn stop(&mut self, room_id: RoomId, now: Ms, effects: &mut Vec<Effect>) -> IntakeOutcome {
        if self.end_service(room_id, now, effects).is_some() {
            effects.push(Effect::RoomState(room_id, RoomState::Idle));
            return IntakeOutcome::Stopped;
        }
        if self.waiting.remove(room_id).is_some() {
            effects.push(Effect::RoomState(room_id, RoomState::Idle));
            return IntakeOutcome::Withdrawn;
        }
        IntakeOutcome::Ignored
    }
}
