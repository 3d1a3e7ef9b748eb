//! Outbound collaborators the scheduler reports into.

use async_trait::async_trait;

use crate::model::{RoomId, RoomState, UsageRecord};
use crate::scheduler::SchedulerError;

/// Append-only store for settled usage.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn persist_usage_record(&self, record: &UsageRecord) -> Result<(), SchedulerError>;
}

/// Best-effort notification of a room's scheduling state.
#[async_trait]
pub trait RoomStateSink: Send + Sync {
    async fn set_room_state(&self, room_id: RoomId, state: RoomState) -> Result<(), SchedulerError>;
}
