//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - handler の登録は起動時だけ。build 後のレジストリは読み取り専用

use std::sync::Arc;

use prometheus::Registry;

use super::dispatcher::Dispatcher;
use super::enqueuer::EventEnqueuer;
use super::poller::Poller;
use super::publisher_loop::PublisherLoop;
use super::status::StatusReport;
use super::telemetry::Telemetry;
use crate::config::OutboxConfig;
use crate::domain::{CourierError, CourierResult};
use crate::impls::InMemoryOutboxStore;
use crate::ports::{Clock, IdGenerator, OutboxStore, SystemClock, UlidGenerator};
use crate::typed::{
    Command, CommandHandler, Event, EventHandler, EventHandlerRegistry, Query, QueryHandler,
    RegistryError, RequestRegistry, Validator,
};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .store(Arc::new(SqliteOutboxStore::open("outbox.db")?))
///     .subscribe::<PostPublished, _>(FeedProjector::new())?
///     .command::<CreatePost, _>(CreatePostHandler)?
///     .expect_events(&[PostPublished::TYPE])
///     .build()?;
/// app.start();
/// ```
///
/// # Fail-fast 設計
/// - expect_events() / expect_commands() で期待される型を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
pub struct AppBuilder {
    events: EventHandlerRegistry,
    requests: RequestRegistry,
    store: Option<Arc<dyn OutboxStore>>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    metrics: Option<Registry>,
    config: OutboxConfig,
    expected_events: Option<Vec<String>>,
    expected_commands: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing event types: {0:?}. These events were expected but not declared.")]
    MissingEventTypes(Vec<String>),

    #[error("Missing command handlers: {0:?}. These commands were expected but not registered.")]
    MissingCommands(Vec<String>),

    #[error("invalid outbox configuration: {0}")]
    Config(CourierError),

    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            events: EventHandlerRegistry::new(),
            requests: RequestRegistry::new(),
            store: None,
            clock: Arc::new(SystemClock),
            ids: None,
            metrics: None,
            config: OutboxConfig::default(),
            expected_events: None,
            expected_commands: None,
        }
    }

    /// Outbox storage. Defaults to an in-memory store (no durability).
    pub fn store(mut self, store: Arc<dyn OutboxStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(mut self, config: OutboxConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Defaults to a `UlidGenerator` on the builder's clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Register metrics on an existing registry instead of a private one.
    pub fn metrics_registry(mut self, registry: Registry) -> Self {
        self.metrics = Some(registry);
        self
    }

    /// Declare an event type that may have no subscribers.
    pub fn event<E: Event>(mut self) -> Result<Self, RegistryError> {
        self.events.declare::<E>()?;
        Ok(self)
    }

    /// Add a handler to the fan-out list of `E`.
    pub fn subscribe<E: Event, H: EventHandler<E> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.events.register::<E, H>(handler)?;
        Ok(self)
    }

    pub fn command<C: Command, H: CommandHandler<C> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.requests.register_command::<C, H>(handler)?;
        Ok(self)
    }

    pub fn query<Q: Query, H: QueryHandler<Q> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.requests.register_query::<Q, H>(handler)?;
        Ok(self)
    }

    pub fn validator<C: Command, V: Validator<C> + 'static>(mut self, validator: V) -> Self {
        self.requests.register_validator::<C, V>(validator);
        self
    }

    pub fn expect_events(mut self, event_types: &[&str]) -> Self {
        self.expected_events = Some(event_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn expect_commands(mut self, names: &[&str]) -> Self {
        self.expected_commands = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// # 検証
    /// - 設定値の検証
    /// - expect_events() の型がすべて宣言済みか
    /// - expect_commands() の command に handler があるか
    pub fn build(self) -> Result<App, BuildError> {
        self.config.validate().map_err(BuildError::Config)?;

        if let Some(expected) = &self.expected_events {
            let registered = self.events.registered_types();
            let missing = missing_from(expected, &registered);
            if !missing.is_empty() {
                return Err(BuildError::MissingEventTypes(missing));
            }
        }
        if let Some(expected) = &self.expected_commands {
            let registered: Vec<String> = self
                .requests
                .command_names()
                .iter()
                .map(|n| n.to_string())
                .collect();
            let missing = missing_from(expected, &registered);
            if !missing.is_empty() {
                return Err(BuildError::MissingCommands(missing));
            }
        }

        let telemetry = Arc::new(match &self.metrics {
            Some(registry) => Telemetry::register(registry)?,
            None => Telemetry::new()?,
        });
        let store: Arc<dyn OutboxStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryOutboxStore::new()),
        };
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(Arc::clone(&self.clock))),
        };

        let publisher = Arc::new(PublisherLoop::new(
            Arc::clone(&store),
            Arc::new(self.events),
            Arc::clone(&self.clock),
            Arc::clone(&telemetry),
            self.config,
        ));
        let poller = Arc::new(Poller::new(Arc::clone(&publisher), Arc::clone(&self.clock)));
        let enqueuer = EventEnqueuer::new(Arc::clone(&store), ids, self.clock);
        let dispatcher = Dispatcher::new(Arc::new(self.requests), enqueuer, Arc::clone(&telemetry))
            .with_poller(Arc::clone(&poller));

        Ok(App {
            dispatcher,
            poller,
            publisher,
            store,
            telemetry,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn missing_from(expected: &[String], registered: &[String]) -> Vec<String> {
    expected
        .iter()
        .filter(|x| !registered.contains(x))
        .cloned()
        .collect()
}

/// App はワイヤリング済みのランタイム
pub struct App {
    pub dispatcher: Dispatcher,
    pub poller: Arc<Poller>,
    pub publisher: Arc<PublisherLoop>,
    store: Arc<dyn OutboxStore>,
    telemetry: Arc<Telemetry>,
}

impl App {
    /// Start the background poller. Must run inside a tokio runtime.
    pub fn start(&self) -> bool {
        self.poller.start()
    }

    pub async fn shutdown(&self) {
        self.poller.shutdown_and_join().await;
    }

    pub async fn status(&self) -> CourierResult<StatusReport> {
        Ok(StatusReport {
            poller: self.poller.state(),
            outbox: self.store.counts().await?,
        })
    }

    pub fn metrics_registry(&self) -> &Registry {
        self.telemetry.registry()
    }
}
