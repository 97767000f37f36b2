//! Task trait - 型付き Task の定義
//!
//! task_name の typo を型で排除し、Handler との対応付けを
//! 静的に保証します。

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Task は task name と payload 型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SyncRepository {
///     repository: String,
/// }
///
/// impl Task for SyncRepository {
///     const NAME: &'static str = "repository.sync";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize`: payload としてストアに保存するため
/// - `DeserializeOwned`: ストアからの復元のため（'static に対応）
/// - `Send + Sync + 'static`: worker 間で安全に動かすため
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The handler name this payload type binds to. The scheduler treats it
    /// as an opaque routing key.
    const NAME: &'static str;
}
