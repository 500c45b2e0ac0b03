//! Outbox record: the only persistent entity of the delivery pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EventTypeId, OutboxId, OutboxStatus};

/// A durable delivery record for one published event.
///
/// Design:
/// - This is the single source of truth for delivery state.
/// - Created by the enqueuer as Pending, mutated only by the outbox loop.
/// - `payload` holds the serialized event, `event_type` is enough to decode it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: OutboxId,
    pub event_type: EventTypeId,
    pub payload: String,
    pub status: OutboxStatus,

    /// Number of failed attempts so far.
    pub retry_count: u32,

    /// Failure of the most recent attempt; cleared on completion.
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_retry_at: Option<DateTime<Utc>>,

    /// When the record last entered Processing. Drives stale reclaim.
    pub processing_started_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    pub fn pending(
        id: OutboxId,
        event_type: EventTypeId,
        payload: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event_type,
            payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            error_message: None,
            created_at: now,
            processed_at: None,
            last_retry_at: None,
            processing_started_at: None,
        }
    }

    /// Eligible for the pending-selection query.
    pub fn is_selectable(&self, max_retries: u32) -> bool {
        self.status == OutboxStatus::Pending && self.retry_count < max_retries
    }

    pub fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Processing;
        self.processing_started_at = Some(now);
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Completed;
        self.processed_at = Some(now);
        self.error_message = None;
        self.processing_started_at = None;
    }

    /// Record a failed attempt and decide between retry and terminal failure.
    ///
    /// Returns the resulting status (Pending or Failed).
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
        max_retries: u32,
    ) -> OutboxStatus {
        self.retry_count += 1;
        self.last_retry_at = Some(now);
        self.error_message = Some(error.into());
        self.processing_started_at = None;
        self.status = if self.retry_count >= max_retries {
            OutboxStatus::Failed
        } else {
            OutboxStatus::Pending
        };
        self.status
    }

    /// Put a stuck Processing record back in line. The attempt that got stuck
    /// is not counted against the retry budget.
    pub fn reclaim(&mut self) {
        self.status = OutboxStatus::Pending;
        self.processing_started_at = None;
    }
}

/// Record counts by status, for monitoring (Failed in particular).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl OutboxCounts {
    pub fn add(&mut self, status: OutboxStatus, n: usize) {
        match status {
            OutboxStatus::Pending => self.pending += n,
            OutboxStatus::Processing => self.processing += n,
            OutboxStatus::Completed => self.completed += n,
            OutboxStatus::Failed => self.failed += n,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn record() -> OutboxRecord {
        OutboxRecord::pending(
            OutboxId::from_ulid(Ulid::new()),
            EventTypeId::new("test.post.created.v1"),
            "{}".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn new_record_is_pending_with_zero_retries() {
        let r = record();
        assert_eq!(r.status, OutboxStatus::Pending);
        assert_eq!(r.retry_count, 0);
        assert!(r.error_message.is_none());
        assert!(r.is_selectable(3));
    }

    #[test]
    fn failure_below_budget_goes_back_to_pending() {
        let mut r = record();
        r.mark_processing(Utc::now());
        let status = r.record_failure("boom", Utc::now(), 3);

        assert_eq!(status, OutboxStatus::Pending);
        assert_eq!(r.retry_count, 1);
        assert_eq!(r.error_message.as_deref(), Some("boom"));
        assert!(r.last_retry_at.is_some());
        assert!(r.is_selectable(3));
    }

    #[test]
    fn failure_at_budget_is_terminal() {
        let mut r = record();
        for _ in 0..3 {
            r.mark_processing(Utc::now());
            r.record_failure("boom", Utc::now(), 3);
        }
        assert_eq!(r.status, OutboxStatus::Failed);
        assert_eq!(r.retry_count, 3);
        assert!(!r.is_selectable(3));
    }

    #[test]
    fn completion_clears_error() {
        let mut r = record();
        r.mark_processing(Utc::now());
        r.record_failure("boom", Utc::now(), 3);
        r.mark_processing(Utc::now());
        r.mark_completed(Utc::now());

        assert_eq!(r.status, OutboxStatus::Completed);
        assert!(r.error_message.is_none());
        assert!(r.processed_at.is_some());
        assert_eq!(r.retry_count, 1);
    }

    #[test]
    fn reclaim_keeps_retry_count() {
        let mut r = record();
        r.mark_processing(Utc::now());
        r.reclaim();
        assert_eq!(r.status, OutboxStatus::Pending);
        assert_eq!(r.retry_count, 0);
        assert!(r.processing_started_at.is_none());
    }
}
