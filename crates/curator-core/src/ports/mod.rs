//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（shared store, clock, id 生成）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - 共有ストアが source of truth（正本）
//! - すべての協調動作はストア経由（プロセス間で共有メモリを持たない）

pub mod clock;
pub mod id_generator;
pub mod task_store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use id_generator::{IdGenerator, UlidGenerator};
pub use task_store::{ClaimedTask, HeartbeatView, SweptWorker, TaskFilter, TaskStore};
