//! Errors - エラー型と分類
//!
//! # 分類
//! - Validation: コマンド呼び出し元に返す（outbox には触れない）
//! - HandlerFailed / Deserialization / UnknownEventType: 配送試行の失敗（retry/Failed を駆動）
//! - Storage: outbox 自体の読み書き失敗（このサブシステムではリトライしない）
//! - HandlerNotFound: 設定ミス（回復不能）

use thiserror::Error;

use super::{EventTypeId, ValidationFailure};

#[derive(Debug, Error)]
pub enum CourierError {
    #[error("validation failed: {0}")]
    Validation(ValidationFailure),

    #[error("no handler registered for {kind} '{name}'")]
    HandlerNotFound { kind: &'static str, name: String },

    #[error("handler failed: {0}")]
    HandlerFailed(String),

    #[error("payload decode failed: {0}")]
    Deserialization(String),

    #[error("unknown event type '{0}'")]
    UnknownEventType(EventTypeId),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl CourierError {
    /// Convenience for handler implementations.
    pub fn handler(message: impl Into<String>) -> Self {
        CourierError::HandlerFailed(message.into())
    }
}

impl From<rusqlite::Error> for CourierError {
    fn from(e: rusqlite::Error) -> Self {
        CourierError::Storage(e.to_string())
    }
}

pub type CourierResult<T> = Result<T, CourierError>;
