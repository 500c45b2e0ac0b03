//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（SQLite、時計など）へのインターフェースを提供し、
//! 実装の詳細を隠蔽します。

pub mod clock;
pub mod id_generator;
pub mod outbox_store;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::outbox_store::OutboxStore;
