use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub type RoomId = u32;

/// Requested fan speed. Doubles as the priority tier and the billing weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speed {
    Low,
    Medium,
    High,
}

impl Speed {
    /// Lenient parse: anything unrecognized maps to `Low`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "medium" => Speed::Medium,
            "high" => Speed::High,
            _ => Speed::Low,
        }
    }

    pub fn tier(self) -> u8 {
        match self {
            Speed::Low => 1,
            Speed::Medium => 2,
            Speed::High => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Speed::Low => "low",
            Speed::Medium => "medium",
            Speed::High => "high",
        }
    }
}

impl std::fmt::Display for Speed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a producer wants done for a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start { speed: Speed },
    Update { speed: Speed },
    Stop,
}

impl Operation {
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Start { .. } => "start",
            Operation::Update { .. } => "update",
            Operation::Stop => "stop",
        }
    }
}

/// Inbound request, consumed once by the intake worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceRequest {
    pub room_id: RoomId,
    pub op: Operation,
}

impl ServiceRequest {
    pub fn start(room_id: RoomId, speed: Speed) -> Self {
        Self { room_id, op: Operation::Start { speed } }
    }

    pub fn update(room_id: RoomId, speed: Speed) -> Self {
        Self { room_id, op: Operation::Update { speed } }
    }

    pub fn stop(room_id: RoomId) -> Self {
        Self { room_id, op: Operation::Stop }
    }
}

/// Operational state of a room as seen by presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomState {
    #[default]
    Idle,
    Pending,
    Active,
}

/// One room's schedulable request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slot {
    /// Identity; survives queue ↔ active moves, replaced on a speed change while active.
    pub id: Ulid,
    pub room_id: RoomId,
    pub speed: Speed,
    /// Set only while active.
    pub service_start: Option<Ms>,
    /// Fairness marker, refreshed whenever the slot (re)enters service or the queue.
    pub last_service: Ms,
    pub created_at: Ms,
}

impl Slot {
    pub fn new(room_id: RoomId, speed: Speed, now: Ms) -> Self {
        Self {
            id: Ulid::new(),
            room_id,
            speed,
            service_start: None,
            last_service: now,
            created_at: now,
        }
    }

    /// Dequeue order: `Less` means `self` is served first.
    /// Speed descending, then `last_service` ascending, then `created_at` ascending.
    pub fn priority_cmp(&self, other: &Slot) -> Ordering {
        other
            .speed
            .tier()
            .cmp(&self.speed.tier())
            .then(self.last_service.cmp(&other.last_service))
            .then(self.created_at.cmp(&other.created_at))
    }

    pub fn is_active(&self) -> bool {
        self.service_start.is_some()
    }
}

/// Immutable, append-only billing record for one service interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Ulid,
    pub room_id: RoomId,
    pub start: Ms,
    pub end: Ms,
    pub duration_secs: u64,
    pub speed: Speed,
    pub cost: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(speed: Speed, last_service: Ms, created_at: Ms) -> Slot {
        Slot {
            id: Ulid::new(),
            room_id: 1,
            speed,
            service_start: None,
            last_service,
            created_at,
        }
    }

    #[test]
    fn speed_parse_defaults_to_low() {
        assert_eq!(Speed::parse("high"), Speed::High);
        assert_eq!(Speed::parse(" Medium "), Speed::Medium);
        assert_eq!(Speed::parse("low"), Speed::Low);
        assert_eq!(Speed::parse("turbo"), Speed::Low);
        assert_eq!(Speed::parse(""), Speed::Low);
    }

    #[test]
    fn speed_tiers() {
        assert_eq!(Speed::Low.tier(), 1);
        assert_eq!(Speed::Medium.tier(), 2);
        assert_eq!(Speed::High.tier(), 3);
    }

    #[test]
    fn higher_speed_wins_regardless_of_age() {
        let old_low = slot(Speed::Low, 0, 0);
        let new_high = slot(Speed::High, 1_000, 1_000);
        assert_eq!(new_high.priority_cmp(&old_low), Ordering::Less);
        assert_eq!(old_low.priority_cmp(&new_high), Ordering::Greater);
    }

    #[test]
    fn same_speed_earlier_last_service_wins() {
        let a = slot(Speed::Medium, 100, 500);
        let b = slot(Speed::Medium, 200, 0);
        assert_eq!(a.priority_cmp(&b), Ordering::Less);
    }

    #[test]
    fn creation_time_breaks_remaining_ties() {
        let a = slot(Speed::Medium, 100, 10);
        let b = slot(Speed::Medium, 100, 20);
        assert_eq!(a.priority_cmp(&b), Ordering::Less);
        assert_eq!(a.priority_cmp(&a.clone()), Ordering::Equal);
    }

    #[test]
    fn new_slot_is_waiting() {
        let s = Slot::new(101, Speed::High, 42);
        assert!(!s.is_active());
        assert_eq!(s.last_service, 42);
        assert_eq!(s.created_at, 42);
    }

    #[test]
    fn usage_record_serialization_roundtrip() {
        let record = UsageRecord {
            id: Ulid::new(),
            room_id: 101,
            start: 1_000,
            end: 11_000,
            duration_secs: 10,
            speed: Speed::Medium,
            cost: 0.11112,
        };
        let bytes = bincode::serialize(&record).unwrap();
        let decoded: UsageRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(record, decoded);
    }
}
