use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{RoomId, RoomState};
use crate::scheduler::SchedulerError;
use crate::sink::RoomStateSink;

const CHANNEL_CAPACITY: usize = 64;

/// Current scheduling state per room, with per-room change subscriptions.
pub struct RoomBoard {
    states: DashMap<RoomId, RoomState>,
    channels: DashMap<RoomId, broadcast::Sender<RoomState>>,
}

impl Default for RoomBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomBoard {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    /// Subscribe to transitions of one room. Creates the channel if needed.
    pub fn subscribe(&self, room_id: RoomId) -> broadcast::Receiver<RoomState> {
        let sender = self
            .channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Rooms never reported are idle.
    pub fn state_of(&self, room_id: RoomId) -> RoomState {
        self.states.get(&room_id).map(|e| *e.value()).unwrap_or_default()
    }

    /// All reported rooms, sorted by id.
    pub fn snapshot(&self) -> Vec<(RoomId, RoomState)> {
        let mut rooms: Vec<_> = self.states.iter().map(|e| (*e.key(), *e.value())).collect();
        rooms.sort_by_key(|(id, _)| *id);
        rooms
    }

    fn publish(&self, room_id: RoomId, state: RoomState) {
        self.states.insert(room_id, state);
        if let Some(sender) = self.channels.get(&room_id) {
            let _ = sender.send(state);
        }
    }
}

#[async_trait]
impl RoomStateSink for RoomBoard {
    async fn set_room_state(&self, room_id: RoomId, state: RoomState) -> Result<(), SchedulerError> {
        self.publish(room_id, state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let board = RoomBoard::new();
        let mut rx = board.subscribe(101);

        board.set_room_state(101, RoomState::Pending).await.unwrap();
        board.set_room_state(101, RoomState::Active).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), RoomState::Pending);
        assert_eq!(rx.recv().await.unwrap(), RoomState::Active);
        assert_eq!(board.state_of(101), RoomState::Active);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let board = RoomBoard::new();
        board.set_room_state(7, RoomState::Pending).await.unwrap();
        assert_eq!(board.state_of(7), RoomState::Pending);
    }

    #[test]
    fn unknown_room_is_idle() {
        let board = RoomBoard::new();
        assert_eq!(board.state_of(999), RoomState::Idle);
        assert!(board.snapshot().is_empty());
    }

    #[tokio::test]
    async fn snapshot_is_sorted() {
        let board = RoomBoard::new();
        board.set_room_state(3, RoomState::Active).await.unwrap();
        board.set_room_state(1, RoomState::Pending).await.unwrap();
        assert_eq!(
            board.snapshot(),
            vec![(1, RoomState::Pending), (3, RoomState::Active)]
        );
    }
}
