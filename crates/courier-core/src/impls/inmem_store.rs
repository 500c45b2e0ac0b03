//! In-memory outbox store (tests and single-process development).

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    CourierError, CourierResult, OutboxCounts, OutboxId, OutboxRecord, OutboxStatus,
};
use crate::ports::OutboxStore;

/// In-memory store state.
///
/// Records are keyed by insertion sequence so that ties on `created_at`
/// still come out in publish order.
#[derive(Default)]
struct InMemoryStoreState {
    records: BTreeMap<u64, OutboxRecord>,
    index: HashMap<OutboxId, u64>,
    next_seq: u64,
}

#[derive(Default)]
pub struct InMemoryOutboxStore {
    state: Mutex<InMemoryStoreState>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record, in insertion order (for testing).
    pub async fn all(&self) -> Vec<OutboxRecord> {
        let state = self.state.lock().await;
        state.records.values().cloned().collect()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn insert(&self, record: OutboxRecord) -> CourierResult<()> {
        let mut state = self.state.lock().await;
        if state.index.contains_key(&record.id) {
            return Err(CourierError::Storage(format!(
                "duplicate outbox id {}",
                record.id
            )));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.index.insert(record.id, seq);
        state.records.insert(seq, record);
        Ok(())
    }

    async fn update(&self, record: &OutboxRecord) -> CourierResult<()> {
        let mut state = self.state.lock().await;
        let Some(seq) = state.index.get(&record.id).copied() else {
            return Err(CourierError::Storage(format!(
                "outbox record {} not found",
                record.id
            )));
        };
        state.records.insert(seq, record.clone());
        Ok(())
    }

    async fn get(&self, id: OutboxId) -> CourierResult<Option<OutboxRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .index
            .get(&id)
            .and_then(|seq| state.records.get(seq))
            .cloned())
    }

    async fn fetch_pending(
        &self,
        limit: usize,
        max_retries: u32,
    ) -> CourierResult<Vec<OutboxRecord>> {
        let state = self.state.lock().await;
        let mut pending: Vec<(u64, &OutboxRecord)> = state
            .records
            .iter()
            .filter(|(_, r)| r.is_selectable(max_retries))
            .map(|(seq, r)| (*seq, r))
            .collect();
        pending.sort_by(|(sa, a), (sb, b)| a.created_at.cmp(&b.created_at).then(sa.cmp(sb)));
        Ok(pending
            .into_iter()
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn delete_completed(&self, limit: usize) -> CourierResult<usize> {
        let mut state = self.state.lock().await;
        let mut completed: Vec<(u64, DateTime<Utc>, OutboxId)> = state
            .records
            .iter()
            .filter(|(_, r)| r.status == OutboxStatus::Completed)
            .map(|(seq, r)| (*seq, r.created_at, r.id))
            .collect();
        // newest first
        completed.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));
        completed.truncate(limit);

        for (seq, _, id) in &completed {
            state.records.remove(seq);
            state.index.remove(id);
        }
        Ok(completed.len())
    }

    async fn reclaim_stale(&self, started_before: DateTime<Utc>) -> CourierResult<usize> {
        let mut state = self.state.lock().await;
        let mut reclaimed = 0;
        for record in state.records.values_mut() {
            let stale = record.status == OutboxStatus::Processing
                && record
                    .processing_started_at
                    .is_none_or(|started| started < started_before);
            if stale {
                record.reclaim();
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn counts(&self) -> CourierResult<OutboxCounts> {
        let state = self.state.lock().await;
        let mut counts = OutboxCounts::default();
        for record in state.records.values() {
            counts.add(record.status, 1);
        }
        Ok(counts)
    }
}
