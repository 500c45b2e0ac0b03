//! EventEnqueuer - event を outbox レコードとして永続化する
//!
//! # 保証
//! - `enqueue` が Ok を返した時点でレコードは store に書き込み済み
//! - 以降の配送はプロセスがクラッシュしても必ず試みられる
//! - store への書き込み失敗はここではリトライせず、そのまま呼び出し元へ返す

use std::sync::Arc;

use tracing::debug;

use crate::domain::{CourierResult, EventTypeId, OutboxId, OutboxRecord};
use crate::ports::{Clock, IdGenerator, OutboxStore};
use crate::typed::{Event, PayloadCodec};

#[derive(Clone)]
pub struct EventEnqueuer {
    store: Arc<dyn OutboxStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    codec: PayloadCodec,
}

impl EventEnqueuer {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ids,
            clock,
            codec: PayloadCodec,
        }
    }

    pub async fn enqueue<E: Event>(&self, event: &E) -> CourierResult<OutboxId> {
        let payload = self.codec.encode(event)?;
        let record = OutboxRecord::pending(
            self.ids.generate_outbox_id(),
            EventTypeId::of::<E>(),
            payload,
            self.clock.now(),
        );
        let id = record.id;

        self.store.insert(record).await?;

        debug!(outbox_id = %id, event_type = E::TYPE, "Enqueued event");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CourierError, OutboxCounts, OutboxStatus};
    use crate::impls::InMemoryOutboxStore;
    use crate::ports::{SystemClock, UlidGenerator};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct CommentAdded {
        post_id: u64,
        body: String,
    }

    impl Event for CommentAdded {
        const TYPE: &'static str = "test.comment.added.v1";
    }

    fn enqueuer(store: Arc<dyn OutboxStore>) -> EventEnqueuer {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        EventEnqueuer::new(store, Arc::new(UlidGenerator::new(Arc::clone(&clock))), clock)
    }

    #[tokio::test]
    async fn enqueue_creates_one_pending_record() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let event = CommentAdded {
            post_id: 3,
            body: "nice".into(),
        };

        let id = enqueuer(store.clone()).enqueue(&event).await.unwrap();

        let all = store.all().await;
        assert_eq!(all.len(), 1);
        let record = &all[0];
        assert_eq!(record.id, id);
        assert_eq!(record.status, OutboxStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.event_type.as_str(), CommentAdded::TYPE);
        let back: CommentAdded = serde_json::from_str(&record.payload).unwrap();
        assert_eq!(back, event);
    }

    struct BrokenStore;

    #[async_trait]
    impl OutboxStore for BrokenStore {
        async fn insert(&self, _record: OutboxRecord) -> CourierResult<()> {
            Err(CourierError::Storage("disk full".into()))
        }
        async fn update(&self, _record: &OutboxRecord) -> CourierResult<()> {
            Err(CourierError::Storage("disk full".into()))
        }
        async fn get(&self, _id: OutboxId) -> CourierResult<Option<OutboxRecord>> {
            Ok(None)
        }
        async fn fetch_pending(&self, _limit: usize, _max: u32) -> CourierResult<Vec<OutboxRecord>> {
            Ok(vec![])
        }
        async fn delete_completed(&self, _limit: usize) -> CourierResult<usize> {
            Ok(0)
        }
        async fn reclaim_stale(&self, _before: DateTime<Utc>) -> CourierResult<usize> {
            Ok(0)
        }
        async fn counts(&self) -> CourierResult<OutboxCounts> {
            Ok(OutboxCounts::default())
        }
    }

    #[tokio::test]
    async fn storage_failure_propagates() {
        let err = enqueuer(Arc::new(BrokenStore))
            .enqueue(&CommentAdded {
                post_id: 1,
                body: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::Storage(msg) if msg == "disk full"));
    }
}
