//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - store / config / registry の差し替え可能なワイヤリング

use std::sync::Arc;

use crate::app::status::TaskCounts;
use crate::app::worker_loop::WorkerGroup;
use crate::config::SchedulerConfig;
use crate::domain::{CancelOutcome, CuratorError, TaskId, TaskRecord, TaskSpec};
use crate::impls::InMemoryTaskStore;
use crate::ports::{TaskFilter, TaskStore};
use crate::typed::{Handler, HandlerRegistry, Task};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .register::<SyncTask, _>(SyncHandler)?
///     .expect_tasks(&["repository.sync"])
///     .build()?;
/// let workers = app.spawn_workers(4);
/// ```
///
/// # Fail-fast 設計
/// - expect_tasks() で期待される task name を宣言
/// - build() 時に「期待集合 ⊆ 登録済み集合」と config をチェック
/// - 不足があれば BuildError を返す
pub struct AppBuilder {
    registry: HandlerRegistry,
    config: SchedulerConfig,
    store: Option<Arc<dyn TaskStore>>,
    expected_tasks: Option<Vec<String>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing task names: {0:?}. These tasks were expected but not registered.")]
    MissingTaskNames(Vec<String>),
    #[error(transparent)]
    InvalidConfig(#[from] CuratorError),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            config: SchedulerConfig::default(),
            store: None,
            expected_tasks: None,
        }
    }

    /// Handler を登録
    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, CuratorError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    /// 期待される task name のリストを設定
    pub fn expect_tasks(mut self, names: &[&str]) -> Self {
        self.expected_tasks = Some(names.iter().map(|&n| n.to_string()).collect());
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a specific store instead of the default in-memory one.
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 検証してから App を生成。不足 handler / 不正 config は起動前に落とす。
    pub fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_tasks {
            let registered = self.registry.registered_names();
            let missing: Vec<String> = expected
                .iter()
                .filter(|n| !registered.contains(n))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskNames(missing));
            }
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::with_system_defaults()));

        Ok(App {
            store,
            registry: Arc::new(self.registry),
            config: self.config,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// App はアプリケーションのランタイム。store と registry を束ね、
/// worker group の起動と外向きの操作（submit / cancel / 照会）を提供する。
pub struct App {
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    config: SchedulerConfig,
}

impl App {
    pub fn store(&self) -> Arc<dyn TaskStore> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Spawn `n` dispatch loops plus the liveness sweeper.
    pub fn spawn_workers(&self, n: usize) -> WorkerGroup {
        WorkerGroup::spawn(
            n,
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            self.config.clone(),
        )
    }

    /// Submit a typed task.
    pub async fn submit<T: Task>(&self, task: &T) -> Result<TaskId, CuratorError> {
        let payload = serde_json::to_value(task)
            .map_err(|e| CuratorError::InvalidSpec(format!("payload encode: {e}")))?;
        self.store.create_task(TaskSpec::new(T::NAME, payload)).await
    }

    /// Submit with explicit resource claims and parenthood.
    pub async fn submit_spec(&self, spec: TaskSpec) -> Result<TaskId, CuratorError> {
        self.store.create_task(spec).await
    }

    pub async fn cancel(&self, id: TaskId) -> Result<CancelOutcome, CuratorError> {
        self.store.cancel_task(id).await
    }

    pub async fn task(&self, id: TaskId) -> Result<Option<TaskRecord>, CuratorError> {
        self.store.get_task(id).await
    }

    pub async fn tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, CuratorError> {
        self.store.list_tasks(filter).await
    }

    pub async fn counts(&self) -> Result<TaskCounts, CuratorError> {
        self.store.counts_by_state().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskOutcome, TaskState};
    use crate::typed::TaskContext;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct SyncTask {
        repository: String,
    }

    impl Task for SyncTask {
        const NAME: &'static str = "repository.sync";
    }

    struct SyncHandler;

    #[async_trait]
    impl Handler<SyncTask> for SyncHandler {
        async fn handle(
            &self,
            _task: SyncTask,
            _ctx: &TaskContext,
        ) -> Result<TaskOutcome, CuratorError> {
            Ok(TaskOutcome::success())
        }
    }

    #[test]
    fn build_succeeds_with_all_expected_handlers() {
        let app = AppBuilder::new()
            .register::<SyncTask, _>(SyncHandler)
            .unwrap()
            .expect_tasks(&[SyncTask::NAME])
            .build();
        assert!(app.is_ok());
    }

    #[test]
    fn build_reports_missing_handlers() {
        let app = AppBuilder::new()
            .register::<SyncTask, _>(SyncHandler)
            .unwrap()
            .expect_tasks(&[SyncTask::NAME, "repository.publish"])
            .build();
        assert!(matches!(
            app,
            Err(BuildError::MissingTaskNames(missing))
                if missing == vec!["repository.publish".to_string()]
        ));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let config = SchedulerConfig {
            heartbeat_interval: Duration::from_secs(30),
            worker_ttl: Duration::from_secs(10),
            ..SchedulerConfig::default()
        };
        let app = AppBuilder::new().config(config).build();
        assert!(matches!(app, Err(BuildError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn submit_runs_through_workers_to_completion() {
        let mut config = SchedulerConfig::default();
        config.heartbeat_interval = Duration::from_millis(10);
        config.worker_ttl = Duration::from_millis(200);
        config.sweep_interval = Duration::from_millis(25);
        config.dispatch_idle = Duration::from_millis(20);

        let app = AppBuilder::new()
            .register::<SyncTask, _>(SyncHandler)
            .unwrap()
            .config(config)
            .build()
            .unwrap();
        let workers = app.spawn_workers(1);

        let id = app
            .submit(&SyncTask {
                repository: "r1".into(),
            })
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let record = app.task(id).await.unwrap().unwrap();
            if record.state.is_terminal() {
                assert_eq!(record.state, TaskState::Completed);
                break;
            }
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        workers.shutdown_and_join().await;
    }
}
