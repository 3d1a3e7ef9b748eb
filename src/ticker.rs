use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::scheduler::Scheduler;

/// Background task that runs one scheduling decision per period until cancelled.
/// A tick already in progress finishes before the task exits.
pub async fn run_ticker(scheduler: Arc<Scheduler>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                scheduler.tick().await;
            }
        }
    }
    debug!("tick worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::RoomBoard;
    use crate::config::SchedulerConfig;
    use crate::ledger::UsageLedger;
    use crate::model::*;

    fn test_ledger_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("acsched_test_ticker");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn ticker_admits_waiting_rooms() {
        let ledger = Arc::new(UsageLedger::open(&test_ledger_path("admit.wal")).unwrap());
        let board = Arc::new(RoomBoard::new());
        let config = SchedulerConfig {
            capacity: 2,
            tick_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let scheduler = Scheduler::new(config, ledger, board.clone()).unwrap();

        scheduler.apply(ServiceRequest::start(101, Speed::Low)).await;
        scheduler.apply(ServiceRequest::start(102, Speed::Low)).await;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_ticker(scheduler.clone(), Duration::from_millis(10), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        task.await.unwrap();
        scheduler.flush().await;

        // One admission per tick; both fit after two ticks
        assert_eq!(board.state_of(101), RoomState::Active);
        assert_eq!(board.state_of(102), RoomState::Active);
        let snap = scheduler.snapshot().await;
        assert_eq!(snap.active.len(), 2);
        assert!(snap.waiting.is_empty());
    }
}
