//! BatchCompactor - tombstone の一括物理削除
//!
//! # フロー
//! 1. TaskService が mark_deleted 成功後に `notify()` を呼ぶ（非ブロッキング）
//! 2. 通知は容量 C の有界チャネルに溜まる（中身のない飽和カウンタ）
//! 3. 間隔 T ごとの tick でチャネルが満杯なら `compact()`
//! 4. `stop()` は飽和に関係なく最後の compact を行い、チャネルを閉じる
//!
//! compact はストアの全件スイープなので、個々のタスク ID は追跡しない。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{Mutex, MutexGuard, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::status::CompactorStatus;
use crate::domain::StoreError;
use crate::ports::{TaskStore, TombstoneNotifier};

pub const DEFAULT_CAPACITY: usize = 10;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum CompactorError {
    #[error("invalid compactor config: {0}")]
    InvalidConfig(String),

    #[error("compactor loop already started")]
    AlreadyStarted,

    #[error("compactor already stopped")]
    AlreadyStopped,

    #[error("purge of tombstoned tasks timed out after {0:?}")]
    Timeout(Duration),

    #[error("purge of tombstoned tasks failed: {0}")]
    Store(#[from] StoreError),
}

/// Capacity, tick interval and per-call store deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactorConfig {
    pub capacity: usize,
    pub tick_interval: Duration,
    pub store_timeout: Duration,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            tick_interval: DEFAULT_TICK_INTERVAL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

impl CompactorConfig {
    pub fn validate(&self) -> Result<(), CompactorError> {
        if self.capacity == 0 {
            return Err(CompactorError::InvalidConfig(
                "capacity must be at least 1".to_string(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(CompactorError::InvalidConfig(
                "tick interval must be positive".to_string(),
            ));
        }
        if self.store_timeout.is_zero() {
            return Err(CompactorError::InvalidConfig(
                "store timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of offering one token to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Queue at capacity; token dropped.
    Dropped,
    /// Queue closed by `stop()`; token dropped.
    Closed,
}

/// Bounded, payload-free signal counter.
///
/// Many producers (`notify`), one consumer (the compaction holding the
/// receiver lock). The receiver lock doubles as the compaction mutex.
pub struct NotificationQueue {
    tx: mpsc::Sender<()>,
    rx: Mutex<mpsc::Receiver<()>>,
    dropped: AtomicU64,
}

impl NotificationQueue {
    /// `capacity` must be non-zero.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            dropped: AtomicU64::new(0),
        }
    }

    /// Never blocks, never fails. Excess tokens are dropped and counted.
    pub fn notify(&self) -> Admission {
        match self.tx.try_send(()) {
            Ok(()) => {
                debug!(pending = self.len(), "tombstone notification queued");
                Admission::Accepted
            }
            Err(TrySendError::Full(())) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    capacity = self.capacity(),
                    "notification queue full, dropping tombstone notification"
                );
                Admission::Dropped
            }
            Err(TrySendError::Closed(())) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("notification queue closed, dropping tombstone notification");
                Admission::Closed
            }
        }
    }

    pub fn len(&self) -> usize {
        self.capacity().saturating_sub(self.tx.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn is_saturated(&self) -> bool {
        self.len() >= self.capacity()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn consumer(&self) -> QueueConsumer<'_> {
        QueueConsumer {
            rx: self.rx.lock().await,
        }
    }
}

/// Exclusive access to the receiving side.
struct QueueConsumer<'a> {
    rx: MutexGuard<'a, mpsc::Receiver<()>>,
}

impl QueueConsumer<'_> {
    /// Removes up to `max` tokens; returns how many were removed.
    fn drain(&mut self, max: usize) -> usize {
        let mut drained = 0;
        while drained < max {
            match self.rx.try_recv() {
                Ok(()) => drained += 1,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        drained
    }

    /// Refuses further tokens and discards anything still buffered.
    fn close(&mut self) -> usize {
        self.rx.close();
        self.drain(usize::MAX)
    }
}

/// Compactor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactorState {
    /// Constructed, loop not started yet.
    Idle,
    Running,
    Stopped,
}

impl CompactorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => CompactorState::Idle,
            1 => CompactorState::Running,
            _ => CompactorState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CompactorState::Idle => 0,
            CompactorState::Running => 1,
            CompactorState::Stopped => 2,
        }
    }
}

/// Owns the notification queue and the compaction schedule.
///
/// # 使用例
/// ```ignore
/// let compactor = Arc::new(BatchCompactor::new(store, CompactorConfig::default())?);
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = compactor.start(shutdown_rx)?;
/// // ... request handlers call compactor.notify() ...
/// // stop() flushes and also ends the loop; the external signal is optional
/// if let Err(err) = compactor.stop().await { /* log and continue teardown */ }
/// let _ = handle.await;
/// ```
pub struct BatchCompactor {
    store: Arc<dyn TaskStore>,
    queue: NotificationQueue,
    config: CompactorConfig,
    state: AtomicU8,
    loop_active: AtomicBool,
    /// Flipped by `stop()` so the loop exits without an external signal.
    halt: watch::Sender<bool>,
    compactions: AtomicU64,
    failures: AtomicU64,
    purged_total: AtomicU64,
}

impl BatchCompactor {
    pub fn new(store: Arc<dyn TaskStore>, config: CompactorConfig) -> Result<Self, CompactorError> {
        config.validate()?;
        Ok(Self {
            store,
            queue: NotificationQueue::new(config.capacity),
            config,
            state: AtomicU8::new(CompactorState::Idle.as_u8()),
            loop_active: AtomicBool::new(false),
            halt: watch::Sender::new(false),
            compactions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            purged_total: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &CompactorConfig {
        &self.config
    }

    pub fn queue(&self) -> &NotificationQueue {
        &self.queue
    }

    pub fn state(&self) -> CompactorState {
        CompactorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Spawns the single tick loop. Idle -> Running.
    ///
    /// The loop exits when `shutdown` flips to `true` or its sender is dropped.
    /// It never compacts on the way out; call `stop()` for the final flush.
    pub fn start(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, CompactorError> {
        self.state
            .compare_exchange(
                CompactorState::Idle.as_u8(),
                CompactorState::Running.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|current| match CompactorState::from_u8(current) {
                CompactorState::Stopped => CompactorError::AlreadyStopped,
                _ => CompactorError::AlreadyStarted,
            })?;

        info!(
            capacity = self.config.capacity,
            tick_interval_ms = self.config.tick_interval.as_millis() as u64,
            store_timeout_ms = self.config.store_timeout.as_millis() as u64,
            "batch compactor started"
        );

        let compactor = Arc::clone(self);
        compactor.loop_active.store(true, Ordering::Release);
        Ok(tokio::spawn(async move {
            compactor.run_loop(shutdown).await;
        }))
    }

    /// Signal that one task was tombstoned. Non-blocking, infallible.
    pub fn notify(&self) -> Admission {
        self.queue.notify()
    }

    /// Purge every tombstoned row now, regardless of saturation.
    ///
    /// Pending tokens observed before the purge are drained only after the
    /// store reports success; on failure they stay, so the next tick still
    /// sees a saturated queue and retries.
    pub async fn compact(&self) -> Result<u64, CompactorError> {
        let consumer = self.queue.consumer().await;
        self.compact_locked(consumer).await
    }

    async fn compact_locked(
        &self,
        mut consumer: QueueConsumer<'_>,
    ) -> Result<u64, CompactorError> {
        let pending = self.queue.len();
        let started = Instant::now();

        let outcome = match tokio::time::timeout(
            self.config.store_timeout,
            self.store.delete_all_tombstoned(),
        )
        .await
        {
            Ok(Ok(purged)) => Ok(purged),
            Ok(Err(err)) => Err(CompactorError::Store(err)),
            Err(_) => Err(CompactorError::Timeout(self.config.store_timeout)),
        };

        match outcome {
            Ok(purged) => {
                let drained = consumer.drain(pending);
                self.compactions.fetch_add(1, Ordering::Relaxed);
                self.purged_total.fetch_add(purged, Ordering::Relaxed);
                info!(
                    purged,
                    drained,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "compaction finished"
                );
                Ok(purged)
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    error = %err,
                    pending,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "compaction failed, tombstoned tasks kept for next cycle"
                );
                Err(err)
            }
        }
    }

    /// Final flush, then close the queue. Terminal.
    ///
    /// Also ends the tick loop, whether or not the external shutdown signal
    /// was sent. The returned error is the final compaction's; callers should log it
    /// and carry on with teardown.
    pub async fn stop(&self) -> Result<u64, CompactorError> {
        let previous = self
            .state
            .swap(CompactorState::Stopped.as_u8(), Ordering::AcqRel);
        if CompactorState::from_u8(previous) == CompactorState::Stopped {
            return Err(CompactorError::AlreadyStopped);
        }
        self.halt.send_replace(true);

        let result = self.compact().await;

        let discarded = self.queue.consumer().await.close();
        match &result {
            Ok(purged) => info!(purged, discarded, "batch compactor stopped"),
            Err(err) => warn!(error = %err, discarded, "batch compactor stopped, final flush failed"),
        }
        result
    }

    pub fn status(&self) -> CompactorStatus {
        CompactorStatus {
            state: self.state(),
            loop_active: self.loop_active.load(Ordering::Acquire),
            pending: self.queue.len(),
            capacity: self.queue.capacity(),
            dropped: self.queue.dropped(),
            compactions: self.compactions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            purged_total: self.purged_total.load(Ordering::Relaxed),
        }
    }

    /// One loop tick: compact if saturated and not yet stopped.
    ///
    /// The state is re-read under the consumer lock, so a tick racing with
    /// `stop()` never touches the store after the final flush.
    async fn tick(&self) {
        let consumer = self.queue.consumer().await;
        if self.state() == CompactorState::Stopped {
            debug!("tick after stop, skipping compaction");
            return;
        }
        if self.queue.is_saturated() {
            // compact_locked() logs its own failure; the loop just keeps ticking.
            let _ = self.compact_locked(consumer).await;
        }
    }

    async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut halt = self.halt.subscribe();
        let period = self.config.tick_interval;
        // 最初の tick は T 後（interval は即時に 1 回発火するため interval_at を使う）
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() || *halt.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // sender dropped: 停止扱い
                        break;
                    }
                    continue;
                }
                _ = halt.changed() => continue,
                _ = ticker.tick() => {}
            }

            self.tick().await;
        }

        self.loop_active.store(false, Ordering::Release);
        info!("batch compactor loop exited");
    }
}

impl TombstoneNotifier for BatchCompactor {
    fn notify(&self) {
        let _ = BatchCompactor::notify(self);
    }
}
