use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

use curator_core::{
    AppBuilder, CuratorError, Handler, LockMode, SchedulerConfig, Task, TaskContext, TaskId,
    TaskOutcome, TaskSpec, TaskState,
};

#[derive(Debug, Serialize, Deserialize)]
struct SyncRepository {
    repository: String,
    remote: String,
}

impl Task for SyncRepository {
    const NAME: &'static str = "repository.sync";
}

struct SyncHandler;

#[async_trait]
impl Handler<SyncRepository> for SyncHandler {
    async fn handle(
        &self,
        task: SyncRepository,
        ctx: &TaskContext,
    ) -> Result<TaskOutcome, CuratorError> {
        tracing::info!(repository = %task.repository, remote = %task.remote, "sync started");
        // 擬似的な転送ループ。区切りごとにキャンセル要求を確認する。
        for _ in 0..10 {
            if ctx.is_cancel_requested() {
                tracing::info!(repository = %task.repository, "sync canceled mid-transfer");
                return Ok(TaskOutcome::Canceled);
            }
            sleep(Duration::from_millis(100)).await;
        }
        Ok(TaskOutcome::success_with(vec![format!(
            "version:{}:1",
            task.repository
        )]))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PublishRepository {
    repository: String,
}

impl Task for PublishRepository {
    const NAME: &'static str = "repository.publish";
}

struct PublishHandler;

#[async_trait]
impl Handler<PublishRepository> for PublishHandler {
    async fn handle(
        &self,
        task: PublishRepository,
        _ctx: &TaskContext,
    ) -> Result<TaskOutcome, CuratorError> {
        sleep(Duration::from_millis(300)).await;
        Ok(TaskOutcome::success_with(vec![format!(
            "publication:{}",
            task.repository
        )]))
    }
}

async fn wait_terminal(app: &curator_core::App, id: TaskId) {
    loop {
        let record = match app.task(id).await {
            Ok(Some(r)) => r,
            Ok(None) => {
                tracing::error!(task = %id, "task disappeared");
                return;
            }
            Err(e) => {
                tracing::error!(task = %id, error = %e, "status poll failed");
                return;
            }
        };
        if record.state.is_terminal() {
            tracing::info!(
                task = %id,
                state = %record.state,
                results = ?record.result_refs,
                error = ?record.error,
                "terminal"
            );
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // (A) App を組み立てる（handler 登録 + fail-fast 検証）
    let config = SchedulerConfig {
        heartbeat_interval: Duration::from_millis(200),
        worker_ttl: Duration::from_secs(2),
        sweep_interval: Duration::from_millis(500),
        cancel_grace: Duration::from_secs(1),
        dispatch_idle: Duration::from_millis(200),
        ..SchedulerConfig::default()
    };
    let app = AppBuilder::new()
        .register::<SyncRepository, _>(SyncHandler)?
        .register::<PublishRepository, _>(PublishHandler)?
        .expect_tasks(&[SyncRepository::NAME, PublishRepository::NAME])
        .config(config)
        .build()?;

    // (B) worker group を起動（dispatch loop x2 + sweeper）
    let workers = app.spawn_workers(2);

    // (C) 同一リポジトリを取り合う 2 本の sync と、別リポジトリの publish。
    //     sync 同士は Exclusive 予約で直列化され、publish は並走する。
    let store = app.store();
    let sync_a = store
        .create_task(
            TaskSpec::new(
                SyncRepository::NAME,
                serde_json::json!({ "repository": "fedora", "remote": "upstream" }),
            )
            .with_resource("repository:fedora", LockMode::Exclusive),
        )
        .await?;
    let sync_b = store
        .create_task(
            TaskSpec::new(
                SyncRepository::NAME,
                serde_json::json!({ "repository": "fedora", "remote": "mirror" }),
            )
            .with_resource("repository:fedora", LockMode::Exclusive),
        )
        .await?;
    let publish = store
        .create_task(
            TaskSpec::new(
                PublishRepository::NAME,
                serde_json::json!({ "repository": "debian" }),
            )
            .with_resource("repository:debian", LockMode::Shared),
        )
        .await?;
    tracing::info!(%sync_a, %sync_b, %publish, "submitted");

    // (D) 2 本目の sync は途中でキャンセルしてみる
    sleep(Duration::from_millis(300)).await;
    let outcome = app.cancel(sync_b).await?;
    tracing::info!(task = %sync_b, ?outcome, "cancel requested");

    // (E) 全タスクの決着を待つ
    wait_terminal(&app, sync_a).await;
    wait_terminal(&app, sync_b).await;
    wait_terminal(&app, publish).await;

    let canceled = app.task(sync_b).await?.map(|r| r.state);
    debug_assert!(matches!(
        canceled,
        Some(TaskState::Canceled | TaskState::Completed)
    ));

    let counts = app.counts().await?;
    tracing::info!(?counts, "final counts");

    // (F) graceful shutdown：worker は deregister してから終わる
    workers.shutdown_and_join().await;
    Ok(())
}
