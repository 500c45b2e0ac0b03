//! Dispatcher - Command / Query / Event の入口
//!
//! # 責務
//! - `execute_command`: validator を全部実行 → 違反があれば handler を呼ばずに返す → handler 実行
//! - `execute_query`: validator なしで handler 実行
//! - `publish`: EventEnqueuer に渡すだけ（event handler はここでは呼ばない）
//!
//! すべての呼び出しは `dispatch` span の中で行い、件数と所要時間をメトリクスに記録する。
//! 記録は結果を変えない。

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{Instrument, error, info_span};

use super::enqueuer::EventEnqueuer;
use super::poller::Poller;
use super::telemetry::{RequestKind, Telemetry};
use crate::cancel::CancelToken;
use crate::domain::{CourierError, CourierResult, OutboxId};
use crate::typed::{Command, Event, Query, RequestRegistry};

#[derive(Clone)]
pub struct Dispatcher {
    requests: Arc<RequestRegistry>,
    enqueuer: EventEnqueuer,
    telemetry: Arc<Telemetry>,
    poller: Option<Arc<Poller>>,
}

impl Dispatcher {
    pub fn new(
        requests: Arc<RequestRegistry>,
        enqueuer: EventEnqueuer,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            requests,
            enqueuer,
            telemetry,
            poller: None,
        }
    }

    /// Let `publish` wake a Stopped poller (only acts when the poller's
    /// config enables resume on publish).
    pub fn with_poller(mut self, poller: Arc<Poller>) -> Self {
        self.poller = Some(poller);
        self
    }

    pub async fn execute_command<C: Command>(
        &self,
        command: C,
        cancel: &CancelToken,
    ) -> CourierResult<C::Output> {
        self.instrumented(RequestKind::Command, C::NAME, cancel, async {
            let failure = self.requests.validate(&command).await;
            if !failure.is_empty() {
                return Err(CourierError::Validation(failure));
            }

            let handler = self.requests.command_handler::<C>().ok_or_else(|| {
                error!(command = C::NAME, "No handler registered for command");
                CourierError::HandlerNotFound {
                    kind: "command",
                    name: C::NAME.to_string(),
                }
            })?;
            handler.handle(command, cancel).await
        })
        .await
    }

    pub async fn execute_query<Q: Query>(
        &self,
        query: Q,
        cancel: &CancelToken,
    ) -> CourierResult<Q::Output> {
        self.instrumented(RequestKind::Query, Q::NAME, cancel, async {
            let handler = self.requests.query_handler::<Q>().ok_or_else(|| {
                error!(query = Q::NAME, "No handler registered for query");
                CourierError::HandlerNotFound {
                    kind: "query",
                    name: Q::NAME.to_string(),
                }
            })?;
            handler.handle(query, cancel).await
        })
        .await
    }

    /// Durably record `event`. Returns once the outbox row exists; handlers
    /// run later on the poller.
    pub async fn publish<E: Event>(&self, event: &E, cancel: &CancelToken) -> CourierResult<OutboxId> {
        let id = self
            .instrumented(RequestKind::Event, E::TYPE, cancel, self.enqueuer.enqueue(event))
            .await?;
        if let Some(poller) = &self.poller {
            poller.notify_published();
        }
        Ok(id)
    }

    async fn instrumented<T, F>(
        &self,
        kind: RequestKind,
        name: &'static str,
        cancel: &CancelToken,
        call: F,
    ) -> CourierResult<T>
    where
        F: Future<Output = CourierResult<T>>,
    {
        let span = info_span!("dispatch", kind = kind.as_str(), name, outcome = tracing::field::Empty);
        let started = Instant::now();

        let result = async {
            if cancel.is_cancelled() {
                return Err(CourierError::Cancelled);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(CourierError::Cancelled),
                result = call => result,
            }
        }
        .instrument(span.clone())
        .await;

        let success = result.is_ok();
        span.record("outcome", if success { "success" } else { "failure" });
        self.telemetry
            .record_dispatch(kind, name, success, started.elapsed());
        result
    }
}
