//! Poller - PublisherLoop を一定間隔で回すバックグラウンドタスク
//!
//! # 状態遷移
//! `NotRunning → Running → Stopped`
//! - Running 中の start は何もしない（ログのみ、エラーではない）
//! - 一定時間レコードを 1 件も処理しなければ Stopped になって抜ける
//! - Stopped からは明示的な start、または `resume_on_publish` 有効時の publish で再開
//! - shutdown_and_join 後は publish では再開しない（明示的な start のみ）
//!
//! shutdown はサイクルの間と待機中にだけ効く。実行中の handler は止めない
//! （handler に渡す CancelToken は協調的な合図でしかない）。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::publisher_loop::PublisherLoop;
use crate::cancel::{CancelSource, CancelToken};
use crate::ports::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    NotRunning,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleVerdict {
    Continue,
    Stop,
}

/// Tracks the last cycle that did any work.
#[derive(Debug, Clone)]
pub struct IdleGovernor {
    idle_timeout: Duration,
    last_active_at: DateTime<Utc>,
}

impl IdleGovernor {
    pub fn new(idle_timeout: Duration, now: DateTime<Utc>) -> Self {
        Self {
            idle_timeout,
            last_active_at: now,
        }
    }

    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.last_active_at
    }

    /// Feed the result of one cycle.
    pub fn observe(&mut self, processed: usize, now: DateTime<Utc>) -> IdleVerdict {
        if processed > 0 {
            self.last_active_at = now;
            return IdleVerdict::Continue;
        }
        let idle_for = (now - self.last_active_at).to_std().unwrap_or_default();
        if idle_for >= self.idle_timeout {
            IdleVerdict::Stop
        } else {
            IdleVerdict::Continue
        }
    }
}

struct RunningLoop {
    shutdown: CancelSource,
    join: JoinHandle<()>,
}

pub struct Poller {
    publisher: Arc<PublisherLoop>,
    clock: Arc<dyn Clock>,
    state: Arc<watch::Sender<PollerState>>,
    running: Mutex<Option<RunningLoop>>,
    /// Set by shutdown_and_join; blocks resume-on-publish until the next explicit start.
    shut_down: AtomicBool,
}

impl Poller {
    pub fn new(publisher: Arc<PublisherLoop>, clock: Arc<dyn Clock>) -> Self {
        let (state, _rx) = watch::channel(PollerState::NotRunning);
        Self {
            publisher,
            clock,
            state: Arc::new(state),
            running: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    /// Watch state transitions (e.g. to wait for an idle stop).
    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    /// Spawn the loop. Must be called inside a tokio runtime.
    ///
    /// Returns false when a loop is already running.
    pub fn start(&self) -> bool {
        self.shut_down.store(false, Ordering::SeqCst);
        self.spawn_loop(false)
    }

    fn spawn_loop(&self, resuming: bool) -> bool {
        let mut running = self.lock_running();
        // checked under the lock so a concurrent shutdown_and_join wins
        if resuming && self.shut_down.load(Ordering::SeqCst) {
            debug!("Outbox poller shut down, not resuming on publish");
            return false;
        }
        if self.state() == PollerState::Running {
            info!("Outbox poller already running, ignoring start");
            return false;
        }

        let shutdown = CancelSource::new();
        let token = shutdown.token();
        self.state.send_replace(PollerState::Running);

        let publisher = Arc::clone(&self.publisher);
        let clock = Arc::clone(&self.clock);
        let state = Arc::clone(&self.state);
        let join = tokio::spawn(async move {
            poll_loop(publisher, clock, token).await;
            state.send_replace(PollerState::Stopped);
        });

        // a previous loop that stopped on its own has already finished
        *running = Some(RunningLoop { shutdown, join });
        info!(
            poll_interval_ms = self.publisher.config().poll_interval.as_millis() as u64,
            "Outbox poller started"
        );
        true
    }

    /// Restart an idle-Stopped loop when configured to do so. A poller that
    /// was shut down stays down.
    pub fn notify_published(&self) {
        if !self.publisher.config().resume_on_publish || self.state() != PollerState::Stopped {
            return;
        }
        if self.spawn_loop(true) {
            info!("Resumed outbox poller after publish");
        }
    }

    /// Ask the loop to stop and wait for the current cycle to finish.
    pub async fn shutdown_and_join(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let running = self.lock_running().take();
        let Some(running) = running else {
            return;
        };
        running.shutdown.cancel();
        if let Err(e) = running.join.await {
            warn!(error = %e, "Outbox poller task ended abnormally");
        }
        self.state.send_replace(PollerState::Stopped);
        info!("Outbox poller shut down");
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<RunningLoop>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn poll_loop(publisher: Arc<PublisherLoop>, clock: Arc<dyn Clock>, shutdown: CancelToken) {
    let config = publisher.config().clone();
    let mut governor = IdleGovernor::new(config.idle_timeout, clock.now());

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        // queued result writes count as outstanding work
        let processed = match publisher.run_cycle(&shutdown).await {
            Ok(report) => report.processed() + publisher.unsaved_results(),
            Err(e) => {
                warn!(error = %e, "Outbox cycle failed");
                0
            }
        };

        if governor.observe(processed, clock.now()) == IdleVerdict::Stop {
            info!(
                idle_timeout_ms = config.idle_timeout.as_millis() as u64,
                last_active_at = %governor.last_active_at(),
                "Outbox poller idle, stopping"
            );
            break;
        }

        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(config.poll_interval) => {}
        }
    }
}
