use crate::model::*;

use super::state::{Effect, SchedulerState};

/// Outcome of one scheduling tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Wait queue empty.
    Idle,
    /// Free capacity filled from the queue head.
    Admitted { room_id: RoomId },
    /// Head outranks the lowest-priority active slot.
    Preempted { victim: RoomId, winner: RoomId },
    /// Same-tier victim exhausted its time slice.
    Rotated { victim: RoomId, winner: RoomId, served_ms: Ms },
    /// Capacity full and no victim qualifies; the head keeps waiting.
    Held { head: RoomId },
}

impl Decision {
    pub fn label(&self) -> Option<&'static str> {
        match self {
            Decision::Admitted { .. } => Some("admit"),
            Decision::Preempted { .. } => Some("preempt"),
            Decision::Rotated { .. } => Some("rotate"),
            Decision::Idle | Decision::Held { .. } => None,
        }
    }
}

impl SchedulerState {
    /// Evaluate admission, then priority preemption, then same-tier rotation.
    /// At most one slot enters service per tick.
    pub fn tick(&mut self, now: Ms, effects: &mut Vec<Effect>) -> Decision {
        let Some(head) = self.waiting.peek() else {
            return Decision::Idle;
        };
        let (head_room, head_speed) = (head.room_id, head.speed);

        if !self.active.is_full() {
            if let Some(slot) = self.waiting.pop() {
                self.begin_service(slot, now, effects);
            }
            return Decision::Admitted { room_id: head_room };
        }

        if let Some(lowest) = self.active.lowest_priority()
            && head_speed.tier() > lowest.speed.tier()
        {
            let victim = lowest.room_id;
            self.swap(victim, now, effects);
            return Decision::Preempted { victim, winner: head_room };
        }

        if let Some(peer) = self.active.longest_served_peer(head_speed) {
            let served_ms = peer.service_start.map_or(0, |start| now - start);
            if served_ms >= self.time_slice_ms {
                let victim = peer.room_id;
                self.swap(victim, now, effects);
                return Decision::Rotated { victim, winner: head_room, served_ms };
            }
        }

        Decision::Held { head: head_room }
    }

    /// Replace `victim` with the queue head. The victim goes back to the
    /// queue behind everyone already waiting in its tier.
    fn swap(&mut self, victim: RoomId, now: Ms, effects: &mut Vec<Effect>) {
        let Some(winner) = self.waiting.pop() else {
            return;
        };
        if let Some(mut slot) = self.end_service(victim, now, effects) {
            slot.last_service = now;
            self.waiting.push(slot);
            effects.push(Effect::RoomState(victim, RoomState::Pending));
        }
        self.begin_service(winner, now, effects);
    }
}
