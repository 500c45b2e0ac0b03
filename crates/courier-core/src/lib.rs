//! courier-core
//!
//! CQRS dispatcher and outbox-based event delivery.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, event_type, outbox, state, validation, errors）
//! - **ports**: 抽象化レイヤー（OutboxStore, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryOutboxStore, SqliteOutboxStore）
//! - **typed**: 型付き API（Event / Command / Query, handler trait, レジストリ, PayloadCodec）
//! - **app**: アプリケーションロジック（builder, dispatcher, enqueuer, publisher_loop, poller）
//! - **config**: OutboxConfig
//! - **cancel**: CancelSource / CancelToken

pub mod app;
pub mod cancel;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use self::app::{App, AppBuilder, Dispatcher};
pub use self::cancel::{CancelSource, CancelToken};
pub use self::config::OutboxConfig;
pub use self::domain::{CourierError, CourierResult};
