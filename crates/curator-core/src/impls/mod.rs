//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: 開発・テスト用の共有ストア
//!
//! # 本番用実装
//! 本番用の実装は別クレートに配置します（例: PostgreSQL 実装）。
//! trait の契約（1 メソッド = 1 トランザクション）は同じです。

pub mod memory;

pub use memory::InMemoryTaskStore;
