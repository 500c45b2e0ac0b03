use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use courier_core::app::StatusReport;
use courier_core::domain::{CourierError, Violation};
use courier_core::impls::{InMemoryOutboxStore, SqliteOutboxStore};
use courier_core::ports::OutboxStore;
use courier_core::typed::{Command, CommandHandler, Event, EventHandler, Query, QueryHandler, Validator};
use courier_core::{AppBuilder, CancelToken, CourierResult, Dispatcher, OutboxConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PostPublished {
    post_id: u64,
    title: String,
    tags: Vec<String>,
}

impl Event for PostPublished {
    const TYPE: &'static str = "demo.post.published.v1";
}

struct CreatePost {
    title: String,
    tags: Vec<String>,
}

impl Command for CreatePost {
    const NAME: &'static str = "CreatePost";
    type Output = u64;
}

struct FeedSize;

impl Query for FeedSize {
    const NAME: &'static str = "FeedSize";
    type Output = usize;
}

/// 読み取り側のビュー（post_id → title）
type Feed = Arc<Mutex<BTreeMap<u64, String>>>;

struct TitleRequired;

#[async_trait]
impl Validator<CreatePost> for TitleRequired {
    async fn validate(&self, command: &CreatePost) -> Vec<Violation> {
        let mut violations = Vec::new();
        if command.title.trim().is_empty() {
            violations.push(Violation::new("title", "must not be empty"));
        }
        if command.tags.len() > 5 {
            violations.push(Violation::new("tags", "at most 5 tags"));
        }
        violations
    }
}

/// build 後に差し込む dispatcher（handler は build 前に登録するため）
type DispatcherSlot = Arc<OnceLock<Dispatcher>>;

/// 書き込み側：post を採番して PostPublished を dispatcher 経由で publish する
struct CreatePostHandler {
    next_id: AtomicU64,
    dispatcher: DispatcherSlot,
}

#[async_trait]
impl CommandHandler<CreatePost> for CreatePostHandler {
    async fn handle(&self, command: CreatePost, cancel: &CancelToken) -> CourierResult<u64> {
        let dispatcher = self
            .dispatcher
            .get()
            .ok_or_else(|| CourierError::handler("dispatcher not wired yet"))?;
        let post_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        dispatcher
            .publish(
                &PostPublished {
                    post_id,
                    title: command.title,
                    tags: command.tags,
                },
                cancel,
            )
            .await?;
        Ok(post_id)
    }
}

/// post_id をキーに upsert するので何度呼ばれても同じ結果になる
struct FeedProjector {
    feed: Feed,
}

#[async_trait]
impl EventHandler<PostPublished> for FeedProjector {
    async fn handle(&self, event: &PostPublished, _cancel: &CancelToken) -> CourierResult<()> {
        let mut feed = self.feed.lock().map_err(|e| CourierError::handler(e.to_string()))?;
        feed.insert(event.post_id, event.title.clone());
        Ok(())
    }
}

/// 最初の数回はわざと失敗して retry の様子を見せる
struct FlakyNotifier {
    remaining_failures: AtomicU32,
}

#[async_trait]
impl EventHandler<PostPublished> for FlakyNotifier {
    async fn handle(&self, event: &PostPublished, _cancel: &CancelToken) -> CourierResult<()> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(CourierError::handler(format!(
                "notification gateway unavailable (left={left})"
            )));
        }
        info!(post_id = event.post_id, tags = ?event.tags, "Notified followers");
        Ok(())
    }
}

struct FeedSizeHandler {
    feed: Feed,
}

#[async_trait]
impl QueryHandler<FeedSize> for FeedSizeHandler {
    async fn handle(&self, _query: FeedSize, _cancel: &CancelToken) -> CourierResult<usize> {
        let feed = self.feed.lock().map_err(|e| CourierError::handler(e.to_string()))?;
        Ok(feed.len())
    }
}

fn open_store() -> CourierResult<Arc<dyn OutboxStore>> {
    match std::env::var("COURIER_DB_PATH") {
        Ok(path) => {
            info!(path = %path, "Using SQLite outbox store");
            Ok(Arc::new(SqliteOutboxStore::open(Path::new(&path))?))
        }
        Err(_) => {
            info!("Using in-memory outbox store (set COURIER_DB_PATH for durability)");
            Ok(Arc::new(InMemoryOutboxStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // デモ向けに短めの間隔。COURIER_* があればそちらが優先
    let config = OutboxConfig::default()
        .with_poll_interval(Duration::from_millis(500))
        .with_idle_timeout(Duration::from_secs(5))
        .overlay_env(|key| std::env::var(key).ok())?;

    // (A) store と、command handler から publish するための dispatcher の置き場
    let store = open_store()?;
    let dispatcher: DispatcherSlot = Arc::default();
    let feed: Feed = Arc::default();

    // (B) handler を登録して起動時検証
    let app = AppBuilder::new()
        .store(store)
        .config(config)
        .subscribe::<PostPublished, _>(FeedProjector {
            feed: Arc::clone(&feed),
        })?
        .subscribe::<PostPublished, _>(FlakyNotifier {
            remaining_failures: AtomicU32::new(1),
        })?
        .command::<CreatePost, _>(CreatePostHandler {
            next_id: AtomicU64::new(1),
            dispatcher: Arc::clone(&dispatcher),
        })?
        .validator::<CreatePost, _>(TitleRequired)
        .query::<FeedSize, _>(FeedSizeHandler {
            feed: Arc::clone(&feed),
        })?
        .expect_events(&[PostPublished::TYPE])
        .expect_commands(&[CreatePost::NAME])
        .build()?;

    // (C) dispatcher を差し込んで poller を起動
    if dispatcher.set(app.dispatcher.clone()).is_err() {
        warn!("Dispatcher was already wired");
    }
    app.start();

    // (D) command を投げる（1 件は validation で弾かれる）
    let cancel = CancelToken::never();
    for (title, tags) in [
        ("Hello, outbox", vec!["rust".to_string()]),
        ("", vec![]),
        ("At-least-once is enough", vec!["cqrs".to_string(), "outbox".to_string()]),
    ] {
        let command = CreatePost {
            title: title.to_string(),
            tags,
        };
        match app.dispatcher.execute_command(command, &cancel).await {
            Ok(post_id) => info!(post_id, "Post created"),
            Err(CourierError::Validation(failure)) => warn!(%failure, "Post rejected"),
            Err(e) => return Err(e.into()),
        }
    }

    // (E) 配送が落ち着くまで待つ（Ctrl-C でも抜ける）
    let settled = async {
        loop {
            let status = app.status().await?;
            if !status.has_backlog() {
                return Ok::<StatusReport, CourierError>(status);
            }
            sleep(Duration::from_millis(200)).await;
        }
    };
    tokio::select! {
        status = settled => {
            let status = status?;
            println!("status: {}", serde_json::to_string(&status)?);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    let size = app.dispatcher.execute_query(FeedSize, &cancel).await?;
    println!("feed entries: {size}");

    // (F) graceful shutdown（実行中の handler は最後まで走らせる）
    app.shutdown().await;
    Ok(())
}
