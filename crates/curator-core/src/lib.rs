//! curator-core
//!
//! Core building blocks for the Curator task runtime: resource-aware task
//! scheduling for a content-repository management service.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, state, reservation, worker, outcome, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（builder, supervisor, worker_loop, sweeper_loop, status）
//! - **typed**: 型付き Task API（Task trait, Handler trait, HandlerRegistry）
//! - **impls**: 実装（InMemoryTaskStore など開発用）
//!
//! # 提供する保証
//! - タスク状態は単調に遷移し、terminal から戻らない
//! - Exclusive 予約は同一リソース上で直列化、Shared 同士は共存
//! - 同一リソースの待ち行列は投入順（FIFO）
//! - heartbeat が途絶えたワーカーのタスクは sweeper が回収する

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{App, AppBuilder, BuildError, TaskCounts, WorkerGroup};
pub use config::SchedulerConfig;
pub use domain::{
    CancelOutcome, CuratorError, FailureKind, LockMode, ResourceKey, TaskFailure, TaskId,
    TaskOutcome, TaskRecord, TaskSpec, TaskState, TerminalOutcome, WorkerId,
};
pub use impls::InMemoryTaskStore;
pub use ports::{ClaimedTask, TaskFilter, TaskStore};
pub use typed::{Handler, HandlerRegistry, Task, TaskContext};
