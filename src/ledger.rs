use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::model::*;
use crate::observability::{LEDGER_FLUSH_BATCH_SIZE, LEDGER_FLUSH_DURATION_SECONDS};
use crate::scheduler::SchedulerError;
use crate::sink::UsageSink;
use crate::wal::Wal;

/// Upper bound on appends folded into one fsync.
const MAX_BATCH: usize = 256;

type RoomIndex = DashMap<RoomId, Vec<UsageRecord>>;

struct Append {
    record: UsageRecord,
    ack: oneshot::Sender<io::Result<()>>,
}

/// Owns the log. Every wakeup takes whatever appends are queued (up to
/// `MAX_BATCH`), commits them with one fsync, and only then indexes them and
/// acknowledges their senders.
async fn ledger_writer_loop(mut wal: Wal, index: Arc<RoomIndex>, mut rx: mpsc::Receiver<Append>) {
    let mut batch = Vec::with_capacity(MAX_BATCH);
    while rx.recv_many(&mut batch, MAX_BATCH).await > 0 {
        commit_batch(&mut wal, &index, batch.drain(..));
    }
    debug!("ledger writer for {} stopped after {} appends", wal.path().display(), wal.appends());
}

fn commit_batch(wal: &mut Wal, index: &RoomIndex, batch: impl ExactSizeIterator<Item = Append>) {
    metrics::histogram!(LEDGER_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut staged = Vec::with_capacity(batch.len());
    for append in batch {
        match wal.stage(&append.record) {
            Ok(()) => staged.push(append),
            Err(e) => {
                let _ = append.ack.send(Err(e));
            }
        }
    }

    match wal.commit() {
        Ok(()) => {
            for Append { record, ack } in staged {
                index.entry(record.room_id).or_default().push(record);
                let _ = ack.send(Ok(()));
            }
        }
        Err(e) => {
            warn!("usage log {}: batch of {} not committed: {e}", wal.path().display(), staged.len());
            for Append { ack, .. } in staged {
                let _ = ack.send(Err(io::Error::new(e.kind(), e.to_string())));
            }
        }
    }
    metrics::histogram!(LEDGER_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

/// Durable usage ledger: the billing record store behind settlement.
///
/// Records are appended to an on-disk log through a group-commit writer and
/// indexed per room in memory once they are on disk. The index is rebuilt
/// from the log on open.
pub struct UsageLedger {
    writer_tx: mpsc::Sender<Append>,
    by_room: Arc<RoomIndex>,
    path: PathBuf,
}

impl UsageLedger {
    /// Recover the log at `path` and spawn its writer. Must run inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (wal, records) = Wal::open(path)?;

        let by_room: Arc<RoomIndex> = Arc::new(DashMap::new());
        for record in records {
            by_room.entry(record.room_id).or_default().push(record);
        }

        let (writer_tx, writer_rx) = mpsc::channel(4096);
        tokio::spawn(ledger_writer_loop(wal, by_room.clone(), writer_rx));
        Ok(Self {
            writer_tx,
            by_room,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append `record`. Returns once it is on disk and visible to queries.
    pub async fn append(&self, record: &UsageRecord) -> Result<(), SchedulerError> {
        let (ack, done) = oneshot::channel();
        self.writer_tx
            .send(Append { record: record.clone(), ack })
            .await
            .map_err(|_| SchedulerError::Persistence("ledger writer shut down".into()))?;
        done.await
            .map_err(|_| SchedulerError::Persistence("ledger writer dropped response".into()))?
            .map_err(|e| SchedulerError::Persistence(e.to_string()))
    }

    pub fn records_for(&self, room_id: RoomId) -> Vec<UsageRecord> {
        self.by_room
            .get(&room_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Records for `room_id` whose interval started at or after `since`.
    pub fn records_since(&self, room_id: RoomId, since: Ms) -> Vec<UsageRecord> {
        self.by_room
            .get(&room_id)
            .map(|e| e.value().iter().filter(|r| r.start >= since).cloned().collect())
            .unwrap_or_default()
    }

    /// Accumulated cost for `room_id` since `since` (e.g. the guest's check-in).
    pub fn total_cost_since(&self, room_id: RoomId, since: Ms) -> f64 {
        self.by_room
            .get(&room_id)
            .map(|e| {
                e.value()
                    .iter()
                    .filter(|r| r.start >= since)
                    .map(|r| r.cost)
                    .sum()
            })
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.by_room.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UsageSink for UsageLedger {
    async fn persist_usage_record(&self, record: &UsageRecord) -> Result<(), SchedulerError> {
        self.append(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use ulid::Ulid;

    fn test_ledger_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("acsched_test_ledger");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn record(room_id: RoomId, start: Ms, duration_secs: u64, speed: Speed) -> UsageRecord {
        UsageRecord {
            id: Ulid::new(),
            room_id,
            start,
            end: start + duration_secs as Ms * 1_000,
            duration_secs,
            speed,
            cost: duration_secs as f64 * f64::from(speed.tier()) * 0.005556,
        }
    }

    #[tokio::test]
    async fn append_then_query() {
        let ledger = UsageLedger::open(&test_ledger_path("append_query.wal")).unwrap();
        assert!(ledger.is_empty());

        ledger.append(&record(101, 1_000, 10, Speed::Medium)).await.unwrap();
        ledger.append(&record(101, 20_000, 5, Speed::High)).await.unwrap();
        ledger.append(&record(102, 1_000, 3, Speed::Low)).await.unwrap();

        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.records_for(101).len(), 2);
        assert!(ledger.records_for(103).is_empty());
        assert_eq!(ledger.records_since(101, 5_000).len(), 1);

        let total = ledger.total_cost_since(101, 0);
        assert!((total - (10.0 * 2.0 + 5.0 * 3.0) * 0.005556).abs() < 1e-9);
        assert_eq!(ledger.total_cost_since(101, 100_000), 0.0);
    }

    #[tokio::test]
    async fn reopen_replays_records() {
        let path = test_ledger_path("reopen.wal");
        let first = record(201, 0, 4, Speed::Low);
        {
            let ledger = UsageLedger::open(&path).unwrap();
            ledger.persist_usage_record(&first).await.unwrap();
        }

        let reopened = UsageLedger::open(&path).unwrap();
        assert_eq!(reopened.records_for(201), vec![first]);
        assert_eq!(reopened.path(), path.as_path());
    }

    #[tokio::test]
    async fn concurrent_appends_are_all_durable() {
        let path = test_ledger_path("concurrent.wal");
        let ledger = std::sync::Arc::new(UsageLedger::open(&path).unwrap());

        let mut handles = Vec::new();
        for room in 0..20u32 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.append(&record(room, 0, 1, Speed::Low)).await
            }));
        }
        for h in handles {
            tokio_test::assert_ok!(h.await.unwrap());
        }

        assert_eq!(ledger.len(), 20);
        assert_eq!(Wal::replay(&path).unwrap().len(), 20);
    }

    #[tokio::test]
    async fn records_after_a_torn_tail_survive_restart() {
        let path = test_ledger_path("torn_tail.wal");
        let before_crash = record(301, 0, 6, Speed::Medium);
        {
            let ledger = UsageLedger::open(&path).unwrap();
            ledger.append(&before_crash).await.unwrap();
        }

        // Half-written frame left behind by a crash
        {
            use std::io::Write;
            let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0x11, 0x22, 0x33]).unwrap();
        }

        let after_restart = record(302, 10_000, 2, Speed::High);
        {
            let ledger = UsageLedger::open(&path).unwrap();
            assert_eq!(ledger.len(), 1);
            ledger.append(&after_restart).await.unwrap();
            assert_eq!(ledger.len(), 2);
        }

        let reopened = UsageLedger::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.records_for(301), vec![before_crash]);
        assert_eq!(reopened.records_for(302), vec![after_restart]);
    }
}
