//! Handler trait - Task を実行する Handler の定義
//!
//! # 二層構造
//! - **表層（Typed）**: `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `DynHandler` trait - object-safe, type erasure
//!
//! The supervisor only ever sees `DynHandler`; user code only ever writes
//! `Handler<T>`.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::task::Task;
use crate::domain::{CuratorError, TaskId, TaskOutcome, TaskSpec};
use crate::ports::TaskStore;

/// Execution context handed to every running body.
///
/// Carries the cancellation token the supervisor trips when the task moves
/// to Canceling, and a handle for spawning sub-tasks (the scheduler fills in
/// `parent_id` so the parent/child link is never forged by hand).
#[derive(Clone)]
pub struct TaskContext {
    task_id: TaskId,
    cancel: CancellationToken,
    store: Arc<dyn TaskStore>,
}

impl TaskContext {
    pub fn new(task_id: TaskId, cancel: CancellationToken, store: Arc<dyn TaskStore>) -> Self {
        Self {
            task_id,
            cancel,
            store,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Has a cancel request reached this task? Bodies should check this at
    /// safe points and stop cooperatively.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when a cancel request arrives. Useful inside `select!`.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Submit a sub-task of the current task. The child is a task like any
    /// other; only the `parent_id` back-reference ties it to this one.
    pub async fn spawn_subtask(&self, mut spec: TaskSpec) -> Result<TaskId, CuratorError> {
        spec.parent_id = Some(self.task_id);
        self.store.create_task(spec).await
    }
}

/// Handler は Task を実行して TaskOutcome を返す
///
/// # 使用例
/// ```ignore
/// struct SyncHandler;
///
/// #[async_trait]
/// impl Handler<SyncRepository> for SyncHandler {
///     async fn handle(
///         &self,
///         task: SyncRepository,
///         ctx: &TaskContext,
///     ) -> Result<TaskOutcome, CuratorError> {
///         // ... fetch, diff, write ...
///         Ok(TaskOutcome::success())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T, ctx: &TaskContext) -> Result<TaskOutcome, CuratorError>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// TypedHandler<T> を DynHandler に変換することで、
/// HashMap<String, Arc<dyn DynHandler>> に格納可能にします。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(
        &self,
        payload: serde_json::Value,
        ctx: TaskContext,
    ) -> Result<TaskOutcome, CuratorError>;

    fn task_name(&self) -> &'static str;
}

/// Type-erasure bridge from `Handler<T>` to `DynHandler`.
pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(
        &self,
        payload: serde_json::Value,
        ctx: TaskContext,
    ) -> Result<TaskOutcome, CuratorError> {
        let task: T = serde_json::from_value(payload)
            .map_err(|e| CuratorError::Other(format!("payload decode: {e}")))?;
        self.handler.handle(task, &ctx).await
    }

    fn task_name(&self) -> &'static str {
        T::NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryTaskStore;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct Echo {
        value: i32,
    }

    impl Task for Echo {
        const NAME: &'static str = "test.echo";
    }

    struct EchoHandler;

    #[async_trait]
    impl Handler<Echo> for EchoHandler {
        async fn handle(&self, task: Echo, _ctx: &TaskContext) -> Result<TaskOutcome, CuratorError> {
            Ok(TaskOutcome::success_with(vec![task.value.to_string()]))
        }
    }

    fn ctx() -> TaskContext {
        TaskContext::new(
            TaskId::from_ulid(ulid::Ulid::new()),
            CancellationToken::new(),
            Arc::new(InMemoryTaskStore::with_system_defaults()),
        )
    }

    #[tokio::test]
    async fn typed_handler_decodes_and_runs() {
        let typed = TypedHandler::<Echo, _>::new(EchoHandler);
        let outcome = typed.handle_dyn(json!({ "value": 7 }), ctx()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::success_with(vec!["7".into()]));
        assert_eq!(typed.task_name(), "test.echo");
    }

    #[tokio::test]
    async fn malformed_payload_is_a_body_error() {
        let typed = TypedHandler::<Echo, _>::new(EchoHandler);
        let err = typed
            .handle_dyn(json!({ "value": "not a number" }), ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("payload decode"));
    }

    #[tokio::test]
    async fn context_spawns_children_with_parent_set() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::with_system_defaults());
        let parent = store
            .create_task(TaskSpec::new("parent", json!({})))
            .await
            .unwrap();
        let ctx = TaskContext::new(parent, CancellationToken::new(), Arc::clone(&store));

        let child = ctx
            .spawn_subtask(TaskSpec::new("child", json!({})))
            .await
            .unwrap();
        let record = store.get_task(child).await.unwrap().unwrap();
        assert_eq!(record.parent_id, Some(parent));
    }
}
