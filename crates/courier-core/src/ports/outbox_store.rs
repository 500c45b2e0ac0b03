//! OutboxStore port - outbox テーブルの正本（source of truth）
//!
//! # 設計原則
//! - 配送状態はここにだけ存在する（メモリ上のキューは持たない）
//! - Publish が成功した時点でレコードは永続化済み
//! - ループ以外はレコードを変更しない
//!
//! # 実装
//! - `InMemoryOutboxStore`: テスト・開発用
//! - `SqliteOutboxStore`: プロセス再起動をまたいで永続

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{CourierResult, OutboxCounts, OutboxId, OutboxRecord};

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persist a freshly created record.
    async fn insert(&self, record: OutboxRecord) -> CourierResult<()>;

    /// Overwrite the mutable columns of an existing record.
    async fn update(&self, record: &OutboxRecord) -> CourierResult<()>;

    async fn get(&self, id: OutboxId) -> CourierResult<Option<OutboxRecord>>;

    /// Up to `limit` records with `status = Pending AND retry_count < max_retries`,
    /// oldest `created_at` first.
    async fn fetch_pending(&self, limit: usize, max_retries: u32)
        -> CourierResult<Vec<OutboxRecord>>;

    /// Delete up to `limit` Completed records, most recently created first.
    /// Returns how many rows were removed.
    async fn delete_completed(&self, limit: usize) -> CourierResult<usize>;

    /// Move Processing records that entered Processing before `started_before`
    /// back to Pending. Returns how many were reclaimed.
    async fn reclaim_stale(&self, started_before: DateTime<Utc>) -> CourierResult<usize>;

    async fn counts(&self) -> CourierResult<OutboxCounts>;
}
