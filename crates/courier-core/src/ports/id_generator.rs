//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（Clock の時刻を timestamp 部に使う）

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::OutboxId;
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_outbox_id(&self) -> OutboxId;
}

/// UlidGenerator は Clock を使って現在時刻ベースの ULID を生成します。
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_outbox_id(&self) -> OutboxId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        OutboxId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ManualClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let id_gen = UlidGenerator::new(Arc::new(SystemClock));

        let id1 = id_gen.generate_outbox_id();
        let id2 = id_gen.generate_outbox_id();

        assert_ne!(id1, id2);
    }

    #[test]
    fn timestamp_part_follows_clock() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(Arc::new(ManualClock::new(fixed_time)));

        let id = id_gen.generate_outbox_id();

        assert_eq!(id.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }
}
