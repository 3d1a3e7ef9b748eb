use ulid::Ulid;

use crate::model::*;

/// Bill one service interval ending at `now`.
///
/// Returns `None` for a slot that was never in service. A clock that ran
/// backwards bills zero seconds and ends the interval at its start.
pub fn settle(slot: &Slot, now: Ms, unit_rate: f64) -> Option<UsageRecord> {
    let start = slot.service_start?;
    let end = now.max(start);
    let duration_secs = ((end - start) / 1_000) as u64;
    let cost = duration_secs as f64 * f64::from(slot.speed.tier()) * unit_rate;
    Some(UsageRecord {
        id: Ulid::new(),
        room_id: slot.room_id,
        start,
        end,
        duration_secs,
        speed: slot.speed,
        cost,
    })
}
