//! App - アプリケーション層
//!
//! このモジュールは、ports と typed を組み合わせて outbox パイプラインを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **Dispatcher**: Command / Query / Publish の入口
//! - **EventEnqueuer**: event を Pending レコードとして永続化
//! - **PublisherLoop**: 1 サイクル分の配送（cleanup → reap → select → process）
//! - **Poller**: PublisherLoop の定期実行とアイドル停止
//! - **Telemetry**: prometheus メトリクス

pub mod builder;
pub mod dispatcher;
pub mod enqueuer;
pub mod poller;
pub mod publisher_loop;
pub mod status;
pub mod telemetry;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::dispatcher::Dispatcher;
pub use self::enqueuer::EventEnqueuer;
pub use self::poller::{IdleGovernor, IdleVerdict, Poller, PollerState};
pub use self::publisher_loop::{CycleReport, PublisherLoop};
pub use self::status::StatusReport;
pub use self::telemetry::{DeliveryOutcome, RequestKind, Telemetry};
