//! Impls - ports の実装
//!
//! - `InMemoryOutboxStore`: 開発・テスト用
//! - `SqliteOutboxStore`: 永続化（再起動をまたいで配送を保証）

pub mod inmem_store;
pub mod sqlite_store;

pub use self::inmem_store::InMemoryOutboxStore;
pub use self::sqlite_store::SqliteOutboxStore;
