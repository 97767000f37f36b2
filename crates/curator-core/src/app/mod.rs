//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder / App**: 構築・ワイヤリングと外向き操作（submit / cancel / 照会）
//! - **Supervisor**: 1 タスクの実行監督（heartbeat 転送、協調キャンセル、grace 超過の強制終了）
//! - **WorkerGroup / dispatch loop**: claim → supervise → repeat のワーカー実行ループ
//! - **sweeper loop**: heartbeat 失効ワーカーの回収
//! - **status**: 状態別カウントのビュー

pub mod builder;
pub mod status;
pub mod supervisor;
pub mod sweeper_loop;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::status::TaskCounts;
pub use self::supervisor::Supervisor;
pub use self::worker_loop::WorkerGroup;
