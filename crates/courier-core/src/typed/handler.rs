//! Handler traits - Event / Command / Query を処理する Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (EventHandler<E>, CommandHandler<C>)
//! - Object-safe trait (DynEventHandler)
//! - Type erasure パターン (TypedEventHandler<E, H> → DynEventHandler)

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use super::message::{Command, Event, Query};
use crate::cancel::CancelToken;
use crate::domain::{CourierError, CourierResult, Violation};

/// EventHandler は 1 つの具体的な Event 型に登録される
///
/// 同じ型に複数登録でき（fan-out）、配送は at-least-once。
/// 同じ試行内で後続の handler が失敗すると、成功済みの handler も次の試行で
/// 再度呼ばれるので、実装は冪等でなければならない。
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync {
    async fn handle(&self, event: &E, cancel: &CancelToken) -> CourierResult<()>;
}

#[async_trait]
impl<E: Event, H: EventHandler<E> + ?Sized> EventHandler<E> for Arc<H> {
    async fn handle(&self, event: &E, cancel: &CancelToken) -> CourierResult<()> {
        (**self).handle(event, cancel).await
    }
}

/// DynEventHandler は object-safe な EventHandler の抽象化
///
/// デコード済みの event を `dyn Any` で受け取り、具体型に downcast します。
/// これで payload のデコードは 1 レコードにつき 1 回で済みます。
#[async_trait]
pub trait DynEventHandler: Send + Sync {
    async fn handle_dyn(
        &self,
        event: &(dyn Any + Send + Sync),
        cancel: &CancelToken,
    ) -> CourierResult<()>;

    fn event_type(&self) -> &'static str;

    fn handler_name(&self) -> &'static str;
}

pub struct TypedEventHandler<E: Event, H: EventHandler<E>> {
    handler: H,
    _marker: PhantomData<fn(E)>,
}

impl<E: Event, H: EventHandler<E>> TypedEventHandler<E, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<E: Event, H: EventHandler<E> + 'static> DynEventHandler for TypedEventHandler<E, H> {
    async fn handle_dyn(
        &self,
        event: &(dyn Any + Send + Sync),
        cancel: &CancelToken,
    ) -> CourierResult<()> {
        let Some(event) = event.downcast_ref::<E>() else {
            return Err(CourierError::Deserialization(format!(
                "decoded event is not a {}",
                E::TYPE
            )));
        };
        self.handler.handle(event, cancel).await
    }

    fn event_type(&self) -> &'static str {
        E::TYPE
    }

    fn handler_name(&self) -> &'static str {
        std::any::type_name::<H>()
    }
}

/// CommandHandler はコマンド型ごとにちょうど 1 つ
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    async fn handle(&self, command: C, cancel: &CancelToken) -> CourierResult<C::Output>;
}

/// QueryHandler もクエリ型ごとにちょうど 1 つ
#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync {
    async fn handle(&self, query: Q, cancel: &CancelToken) -> CourierResult<Q::Output>;
}

/// Validator はコマンド型ごとに 0 個以上
///
/// 違反がなければ空の Vec を返す。
#[async_trait]
pub trait Validator<C: Command>: Send + Sync {
    async fn validate(&self, command: &C) -> Vec<Violation>;
}
