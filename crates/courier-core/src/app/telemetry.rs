//! Telemetry - dispatch と outbox のメトリクス
//!
//! prometheus の Registry に登録する。呼び出し側が自分の Registry を渡せば
//! 既存の `/metrics` にそのまま乗る。渡さなければ専用の Registry を作る。
//!
//! 記録は結果を変えない（エラーはそのまま呼び出し元に返る）。

use std::time::Duration;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Command,
    Query,
    Event,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Command => "command",
            RequestKind::Query => "query",
            RequestKind::Event => "event",
        }
    }
}

/// Result of one outbox record attempt, as seen by metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Completed,
    Retried,
    Failed,
}

impl DeliveryOutcome {
    fn as_str(self) -> &'static str {
        match self {
            DeliveryOutcome::Completed => "completed",
            DeliveryOutcome::Retried => "retried",
            DeliveryOutcome::Failed => "failed",
        }
    }
}

pub struct Telemetry {
    registry: Registry,
    dispatch_total: IntCounterVec,
    dispatch_duration: HistogramVec,
    outbox_processed: IntCounterVec,
    outbox_cleaned: IntCounter,
}

impl Telemetry {
    /// Register all collectors on `registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let dispatch_total = IntCounterVec::new(
            Opts::new(
                "courier_dispatch_total",
                "Commands, queries and publishes handled by the dispatcher",
            ),
            &["kind", "name", "outcome"],
        )?;
        let dispatch_duration = HistogramVec::new(
            HistogramOpts::new(
                "courier_dispatch_duration_seconds",
                "Dispatcher call duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["kind", "name"],
        )?;
        let outbox_processed = IntCounterVec::new(
            Opts::new(
                "courier_outbox_processed_total",
                "Outbox record attempts by result",
            ),
            &["outcome"],
        )?;
        let outbox_cleaned = IntCounter::new(
            "courier_outbox_cleaned_total",
            "Completed outbox records deleted by cleanup",
        )?;

        registry.register(Box::new(dispatch_total.clone()))?;
        registry.register(Box::new(dispatch_duration.clone()))?;
        registry.register(Box::new(outbox_processed.clone()))?;
        registry.register(Box::new(outbox_cleaned.clone()))?;

        Ok(Self {
            registry: registry.clone(),
            dispatch_total,
            dispatch_duration,
            outbox_processed,
            outbox_cleaned,
        })
    }

    /// Collectors on a private registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::register(&Registry::new())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_dispatch(&self, kind: RequestKind, name: &str, success: bool, elapsed: Duration) {
        let outcome = if success { "success" } else { "failure" };
        self.dispatch_total
            .with_label_values(&[kind.as_str(), name, outcome])
            .inc();
        self.dispatch_duration
            .with_label_values(&[kind.as_str(), name])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_delivery(&self, outcome: DeliveryOutcome) {
        self.outbox_processed
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn record_cleanup(&self, deleted: usize) {
        self.outbox_cleaned.inc_by(deleted as u64);
    }

    pub fn dispatch_count(&self, kind: RequestKind, name: &str, success: bool) -> u64 {
        let outcome = if success { "success" } else { "failure" };
        self.dispatch_total
            .with_label_values(&[kind.as_str(), name, outcome])
            .get()
    }

    pub fn delivery_count(&self, outcome: DeliveryOutcome) -> u64 {
        self.outbox_processed
            .with_label_values(&[outcome.as_str()])
            .get()
    }
}
