//! Message traits - Event / Command / Query の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`, `const NAME`)
//! - Associated Types (`type Output`)
//! - Event だけが永続化されるので Serialize + DeserializeOwned を要求する

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Event は outbox に永続化され、非同期に配送される
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct PostPublished {
///     post_id: u64,
///     title: String,
/// }
///
/// impl Event for PostPublished {
///     const TYPE: &'static str = "social.post.published.v1";
/// }
/// ```
///
/// # ペイロード設計
/// 生きたオブジェクトグラフではなく、ID とスナップショットを持たせる。
/// 所有権ベースの値なので循環参照は構造上発生しない。
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 永続化される型タグ
    ///
    /// # 命名規約
    /// - `{namespace}.{aggregate}.{event}.v{major}`
    /// - 一度書き込んだら変更しない（既存レコードが解決できなくなる）
    const TYPE: &'static str;
}

/// Command は状態を変更する要求（validator を通ってから handler へ）
pub trait Command: Send + Sync + 'static {
    /// テレメトリに使う論理名
    const NAME: &'static str;
    type Output: Send + 'static;
}

/// Query は読み取り専用の要求（validation なし）
pub trait Query: Send + Sync + 'static {
    const NAME: &'static str;
    type Output: Send + 'static;
}
