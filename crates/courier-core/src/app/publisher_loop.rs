//! PublisherLoop - outbox レコードを 1 サイクル分処理する
//!
//! # フロー（1 サイクル）
//! 1. cleanup: Completed を最大 `cleanup_batch_size` 件削除（新しい順）
//! 2. reap: Processing のまま放置されたレコードを Pending に戻す（設定時のみ）
//! 3. select: Pending かつ retry_count < max_retries を古い順に最大 `batch_size` 件
//! 4. 1 件ずつ順番に処理（サイクル内で並列化しない）
//!    - Processing にして即保存
//!    - 型タグ解決 → デコード → handler を登録順に実行
//!    - 成功: Completed / 失敗: retry_count+1 して Pending か Failed
//!    - 次のレコードに進む前に保存
//!
//! store への書き込みが失敗したレコードはこのサイクルでは諦め、次のサイクルに回す。
//! - Processing にする書き込みで失敗: Pending のままなので次のサイクルで再選択される
//! - 配送後の書き込みで失敗: 結果をメモリに保持し、次のサイクルの先頭で書き直す
//!   （Processing のまま取り残さない。handler は再実行しない）

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::telemetry::{DeliveryOutcome, Telemetry};
use crate::cancel::CancelToken;
use crate::config::OutboxConfig;
use crate::domain::{CourierResult, OutboxId, OutboxRecord, OutboxStatus};
use crate::ports::{Clock, OutboxStore};
use crate::typed::EventHandlerRegistry;

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cleaned: usize,
    pub reclaimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    /// Records whose state could not be persisted this cycle.
    pub deferred: usize,
}

impl CycleReport {
    /// Records that reached a persisted post-attempt state.
    pub fn processed(&self) -> usize {
        self.completed + self.retried + self.failed
    }

    fn count(&mut self, status: OutboxStatus) {
        match status {
            OutboxStatus::Completed => self.completed += 1,
            OutboxStatus::Failed => self.failed += 1,
            _ => self.retried += 1,
        }
    }
}

pub struct PublisherLoop {
    store: Arc<dyn OutboxStore>,
    registry: Arc<EventHandlerRegistry>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<Telemetry>,
    config: OutboxConfig,
    /// Attempt results that were decided but not yet persisted.
    unsaved: Mutex<Vec<(OutboxRecord, DeliveryOutcome)>>,
}

impl PublisherLoop {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        registry: Arc<EventHandlerRegistry>,
        clock: Arc<dyn Clock>,
        telemetry: Arc<Telemetry>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            telemetry,
            config,
            unsaved: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Number of attempt results still waiting to be written back.
    pub fn unsaved_results(&self) -> usize {
        self.lock_unsaved().len()
    }

    fn lock_unsaved(&self) -> MutexGuard<'_, Vec<(OutboxRecord, DeliveryOutcome)>> {
        self.unsaved.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_unsaved(&self, id: OutboxId) -> bool {
        self.lock_unsaved().iter().any(|(record, _)| record.id == id)
    }

    /// Write back results left over from earlier cycles. Ones that fail again
    /// stay queued for the next cycle.
    async fn flush_unsaved(&self, report: &mut CycleReport) {
        let queued = std::mem::take(&mut *self.lock_unsaved());
        for (record, outcome) in queued {
            match self.store.update(&record).await {
                Ok(()) => {
                    debug!(outbox_id = %record.id, status = %record.status, "Persisted deferred outbox result");
                    self.telemetry.record_delivery(outcome);
                    report.count(record.status);
                }
                Err(e) => {
                    warn!(outbox_id = %record.id, error = %e, "Outbox record update deferred again");
                    report.deferred += 1;
                    self.lock_unsaved().push((record, outcome));
                }
            }
        }
    }

    /// Run one full cycle. Only selection failures abort the cycle.
    pub async fn run_cycle(&self, cancel: &CancelToken) -> CourierResult<CycleReport> {
        let mut report = CycleReport::default();

        self.flush_unsaved(&mut report).await;

        match self.store.delete_completed(self.config.cleanup_batch_size).await {
            Ok(n) => {
                report.cleaned = n;
                if n > 0 {
                    self.telemetry.record_cleanup(n);
                    debug!(deleted = n, "Cleaned up completed outbox records");
                }
            }
            Err(e) => warn!(error = %e, "Outbox cleanup failed"),
        }

        if let Some(timeout) = self.config.stale_processing_timeout {
            report.reclaimed = self.reap_stale(timeout).await;
        }

        let batch = self
            .store
            .fetch_pending(self.config.batch_size, self.config.max_retries)
            .await?;

        for record in batch {
            // reclaimed while its result is still queued: the queued write wins
            if self.is_unsaved(record.id) {
                continue;
            }
            match self.process_record(record, cancel).await {
                Ok(status) => report.count(status),
                Err(e) => {
                    report.deferred += 1;
                    warn!(error = %e, "Outbox record update deferred to next cycle");
                }
            }
        }

        if report.processed() + report.deferred > 0 {
            info!(
                completed = report.completed,
                retried = report.retried,
                failed = report.failed,
                deferred = report.deferred,
                "Outbox cycle finished"
            );
        }
        Ok(report)
    }

    async fn reap_stale(&self, timeout: std::time::Duration) -> usize {
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return 0;
        };
        let started_before = self.clock.now() - timeout;
        match self.store.reclaim_stale(started_before).await {
            Ok(0) => 0,
            Ok(n) => {
                warn!(reclaimed = n, "Reclaimed stale Processing outbox records");
                n
            }
            Err(e) => {
                warn!(error = %e, "Stale Processing reclaim failed");
                0
            }
        }
    }

    /// Drive one record through a single attempt and persist the result.
    ///
    /// Returns the persisted status (Completed, Pending or Failed). If the
    /// result cannot be written, it is queued and retried at the start of the
    /// next cycle, and the store error is returned.
    pub async fn process_record(
        &self,
        mut record: OutboxRecord,
        cancel: &CancelToken,
    ) -> CourierResult<OutboxStatus> {
        record.mark_processing(self.clock.now());
        self.store.update(&record).await?;

        let delivery = self
            .registry
            .dispatch(&record.event_type, &record.payload, cancel)
            .await;

        let now = self.clock.now();
        let outcome = match delivery {
            Ok(handlers) => {
                record.mark_completed(now);
                debug!(
                    outbox_id = %record.id,
                    event_type = %record.event_type,
                    handlers,
                    "Outbox record completed"
                );
                DeliveryOutcome::Completed
            }
            Err(e) => {
                let status = record.record_failure(e.to_string(), now, self.config.max_retries);
                if status == OutboxStatus::Failed {
                    warn!(
                        outbox_id = %record.id,
                        event_type = %record.event_type,
                        retry_count = record.retry_count,
                        error = %e,
                        "Outbox record failed permanently"
                    );
                    DeliveryOutcome::Failed
                } else {
                    info!(
                        outbox_id = %record.id,
                        event_type = %record.event_type,
                        retry_count = record.retry_count,
                        error = %e,
                        "Outbox record attempt failed, will retry"
                    );
                    DeliveryOutcome::Retried
                }
            }
        };

        if let Err(e) = self.store.update(&record).await {
            self.lock_unsaved().push((record, outcome));
            return Err(e);
        }
        self.telemetry.record_delivery(outcome);
        Ok(record.status)
    }
}
