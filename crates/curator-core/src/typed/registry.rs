//! HandlerRegistry - Handler の登録と管理
//!
//! Design:
//! - Built during initialization (mutable).
//! - Used during runtime (immutable, behind `Arc`).
//! This avoids locks on the hot path.

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{DynHandler, Handler, TypedHandler};
use super::task::Task;
use crate::domain::CuratorError;

/// Registry of handlers (task name -> type-erased handler).
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn DynHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for `T::NAME`. Double registration is an error:
    /// two bodies silently competing for one name is always a bug.
    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), CuratorError> {
        let name = T::NAME.to_string();
        if self.handlers.contains_key(&name) {
            return Err(CuratorError::DuplicateHandler(name));
        }
        self.handlers
            .insert(name, Arc::new(TypedHandler::new(handler)));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskOutcome;
    use crate::typed::handler::TaskContext;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct SyncTask {
        repository: String,
    }

    impl Task for SyncTask {
        const NAME: &'static str = "repository.sync";
    }

    #[derive(Serialize, Deserialize)]
    struct PublishTask {
        repository: String,
    }

    impl Task for PublishTask {
        const NAME: &'static str = "repository.publish";
    }

    struct NoopHandler;

    #[async_trait]
    impl Handler<SyncTask> for NoopHandler {
        async fn handle(
            &self,
            _task: SyncTask,
            _ctx: &TaskContext,
        ) -> Result<TaskOutcome, CuratorError> {
            Ok(TaskOutcome::success())
        }
    }

    #[async_trait]
    impl Handler<PublishTask> for NoopHandler {
        async fn handle(
            &self,
            _task: PublishTask,
            _ctx: &TaskContext,
        ) -> Result<TaskOutcome, CuratorError> {
            Ok(TaskOutcome::success())
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = HandlerRegistry::new();
        registry.register::<SyncTask, _>(NoopHandler).unwrap();

        assert!(registry.get(SyncTask::NAME).is_some());
        assert!(registry.get("unknown").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register::<SyncTask, _>(NoopHandler).unwrap();
        let err = registry.register::<SyncTask, _>(NoopHandler).unwrap_err();
        assert!(matches!(err, CuratorError::DuplicateHandler(_)));
    }

    #[test]
    fn different_names_coexist() {
        let mut registry = HandlerRegistry::new();
        registry.register::<SyncTask, _>(NoopHandler).unwrap();
        registry.register::<PublishTask, _>(NoopHandler).unwrap();

        let mut names = registry.registered_names();
        names.sort();
        assert_eq!(names, vec!["repository.publish", "repository.sync"]);
    }
}
