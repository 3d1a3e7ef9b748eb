mod error;
mod intake;
mod queue;
mod settle;
mod state;
mod tick;

pub use error::SchedulerError;
pub use intake::IntakeOutcome;
pub use queue::{ActiveSet, WaitQueue};
pub use settle::settle;
pub use state::{Effect, SchedulerSnapshot, SchedulerState};
pub use tick::Decision;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::model::*;
use crate::observability::*;
use crate::sink::{RoomStateSink, UsageSink};

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

/// Cloneable producer side of the intake channel.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<ServiceRequest>,
    submit_timeout: Duration,
}

impl SchedulerHandle {
    /// Best-effort enqueue. Waits at most `submit_timeout` for room in the
    /// intake channel; on timeout the request is dropped. Never waits on a
    /// scheduling decision.
    pub async fn submit(&self, req: ServiceRequest) -> Result<(), SchedulerError> {
        match self.tx.send_timeout(req, self.submit_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(req)) => {
                warn!("intake queue full, dropped {} for room {}", req.op.label(), req.room_id);
                metrics::counter!(SUBMISSIONS_DROPPED_TOTAL).increment(1);
                Err(SchedulerError::SubmitTimeout(req.room_id))
            }
            Err(SendTimeoutError::Closed(_)) => Err(SchedulerError::Closed),
        }
    }
}

/// Work handed from the scheduler to its dispatcher task.
enum Dispatch {
    Effects(Vec<Effect>),
    Flush(oneshot::Sender<()>),
}

/// Scheduler context: owns the shared state, the collaborators, and the
/// lifecycle of the intake, tick and dispatch workers.
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    config: SchedulerConfig,
    handle: SchedulerHandle,
    intake_rx: Mutex<Option<mpsc::Receiver<ServiceRequest>>>,
    /// Effects leave the lock through this channel in the order they were produced.
    dispatch_tx: mpsc::UnboundedSender<Dispatch>,
    intake_cancel: CancellationToken,
    tick_cancel: CancellationToken,
    intake: Mutex<Option<JoinHandle<()>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Build the scheduler and spawn its effect dispatcher. Must run inside a
    /// tokio runtime. The intake and tick workers start with `start`.
    pub fn new(
        config: SchedulerConfig,
        usage: Arc<dyn UsageSink>,
        rooms: Arc<dyn RoomStateSink>,
    ) -> Result<Arc<Self>, SchedulerError> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.intake_capacity);
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_dispatcher(usage, rooms, dispatch_rx));
        Ok(Arc::new(Self {
            state: Mutex::new(SchedulerState::new(&config)),
            handle: SchedulerHandle {
                tx,
                submit_timeout: config.submit_timeout,
            },
            config,
            intake_rx: Mutex::new(Some(rx)),
            dispatch_tx,
            intake_cancel: CancellationToken::new(),
            tick_cancel: CancellationToken::new(),
            intake: Mutex::new(None),
            ticker: Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    pub async fn submit(&self, req: ServiceRequest) -> Result<(), SchedulerError> {
        self.handle.submit(req).await
    }

    /// Spawn the intake and tick workers.
    pub async fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let rx = self
            .intake_rx
            .lock()
            .await
            .take()
            .ok_or(SchedulerError::AlreadyStarted)?;

        *self.intake.lock().await =
            Some(tokio::spawn(run_intake(self.clone(), rx, self.intake_cancel.clone())));
        *self.ticker.lock().await = Some(tokio::spawn(crate::ticker::run_ticker(
            self.clone(),
            self.config.tick_interval,
            self.tick_cancel.clone(),
        )));
        info!(
            "scheduler started: capacity {}, time slice {:?}, tick {:?}",
            self.config.capacity, self.config.time_slice, self.config.tick_interval
        );
        Ok(())
    }

    /// Stop accepting requests. An in-flight request completes; anything
    /// still queued is discarded and later submissions fail with `Closed`.
    /// The tick worker keeps running.
    pub async fn stop_intake(&self) {
        self.intake_cancel.cancel();
        self.intake_rx.lock().await.take();
        let worker = self.intake.lock().await.take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!("intake worker ended abnormally: {e}");
        }
    }

    /// Stop both workers and wait for them, then wait until every effect
    /// produced so far has reached the sinks. An in-flight intake message or
    /// tick completes first. Tracked rooms are left as they are; call
    /// `stop_intake` and then `settle_all` beforehand to bill them.
    pub async fn shutdown(&self) {
        self.stop_intake().await;
        self.tick_cancel.cancel();
        let worker = self.ticker.lock().await.take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!("tick worker ended abnormally: {e}");
        }
        self.flush().await;
        info!("scheduler stopped");
    }

    /// Wait until every effect produced before this call has been delivered.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.dispatch_tx.send(Dispatch::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Apply one intake request under the shared lock.
    pub async fn apply(&self, req: ServiceRequest) -> IntakeOutcome {
        let mut state = self.state.lock().await;
        let mut effects = Vec::new();
        let outcome = state.apply(req, now_ms(), &mut effects);
        metrics::counter!(REQUESTS_TOTAL, "op" => req.op.label()).increment(1);
        match outcome {
            IntakeOutcome::Ignored => {
                debug!("{} for room {} ignored", req.op.label(), req.room_id)
            }
            other => info!("room {}: {} -> {:?}", req.room_id, req.op.label(), other),
        }
        self.dispatch(effects);
        record_gauges(&state);
        outcome
    }

    /// Run one scheduling decision under the shared lock.
    pub async fn tick(&self) -> Decision {
        let started = std::time::Instant::now();
        let mut state = self.state.lock().await;
        let mut effects = Vec::new();
        let decision = state.tick(now_ms(), &mut effects);
        match decision {
            Decision::Admitted { room_id } => info!("admit room {room_id}"),
            Decision::Preempted { victim, winner } => {
                info!("preempt: room {winner} outranks room {victim}")
            }
            Decision::Rotated { victim, winner, served_ms } => {
                info!("rotate: room {victim} served {served_ms}ms, room {winner} takes over")
            }
            Decision::Idle | Decision::Held { .. } => {}
        }
        if let Some(kind) = decision.label() {
            metrics::counter!(DECISIONS_TOTAL, "kind" => kind).increment(1);
        }
        self.dispatch(effects);
        record_gauges(&state);
        drop(state);
        metrics::histogram!(TICK_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        decision
    }

    /// Stop every tracked room: active rooms are settled, waiting rooms
    /// withdrawn. Intended for the embedding application's shutdown hook.
    pub async fn settle_all(&self) -> usize {
        let mut state = self.state.lock().await;
        let now = now_ms();
        let mut effects = Vec::new();
        let rooms = state.tracked_rooms();
        for &room_id in &rooms {
            state.apply(ServiceRequest::stop(room_id), now, &mut effects);
        }
        self.dispatch(effects);
        record_gauges(&state);
        if !rooms.is_empty() {
            info!("settled {} room(s) on request: {:?}", rooms.len(), rooms);
        }
        rooms.len()
    }

    pub async fn snapshot(&self) -> SchedulerSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Queue effects for the dispatcher. Called with the state lock held so
    /// the dispatcher sees transitions in the order they happened.
    fn dispatch(&self, effects: Vec<Effect>) {
        if effects.is_empty() {
            return;
        }
        if let Err(mpsc::error::SendError(Dispatch::Effects(lost))) =
            self.dispatch_tx.send(Dispatch::Effects(effects))
        {
            let records = lost.iter().filter(|e| matches!(e, Effect::Settled(_))).count();
            metrics::counter!(SETTLEMENT_FAILURES_TOTAL).increment(records as u64);
            warn!("effect dispatcher gone, {} effect(s) dropped", lost.len());
        }
    }
}

/// Delivers effects to the sinks one at a time, in order. A slow or failing
/// sink delays later effects but never the scheduler. Sink failures are
/// logged and counted and never roll back the transition that produced them.
async fn run_dispatcher(
    usage: Arc<dyn UsageSink>,
    rooms: Arc<dyn RoomStateSink>,
    mut rx: mpsc::UnboundedReceiver<Dispatch>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            Dispatch::Effects(effects) => {
                for effect in effects {
                    deliver(usage.as_ref(), rooms.as_ref(), effect).await;
                }
            }
            Dispatch::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("effect dispatcher stopped");
}

async fn deliver(usage: &dyn UsageSink, rooms: &dyn RoomStateSink, effect: Effect) {
    match effect {
        Effect::Settled(record) => {
            metrics::counter!(SETTLEMENTS_TOTAL).increment(1);
            info!(
                "settle room {}: {}s at {} = {:.4}",
                record.room_id, record.duration_secs, record.speed, record.cost
            );
            if let Err(e) = usage.persist_usage_record(&record).await {
                metrics::counter!(SETTLEMENT_FAILURES_TOTAL).increment(1);
                warn!("usage record {} for room {} not persisted: {e}", record.id, record.room_id);
            }
        }
        Effect::RoomState(room_id, room_state) => {
            if let Err(e) = rooms.set_room_state(room_id, room_state).await {
                warn!("room {room_id} state {room_state:?} not published: {e}");
            }
        }
    }
}

fn record_gauges(state: &SchedulerState) {
    metrics::gauge!(ACTIVE_SLOTS).set(state.active().len() as f64);
    metrics::gauge!(WAITING_SLOTS).set(state.waiting().len() as f64);
}

/// Single consumer of the intake channel, in arrival order.
async fn run_intake(
    scheduler: Arc<Scheduler>,
    mut rx: mpsc::Receiver<ServiceRequest>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(req) => {
                    scheduler.apply(req).await;
                }
                None => break,
            },
        }
    }
    debug!("intake worker stopped");
}
