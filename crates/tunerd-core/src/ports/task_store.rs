//! TaskStore port - タスクレコードの永続的な情報源
//!
//! # 設計
//! - タスク ID ごとに 1 レコード。`create` は上書きしない。
//! - `list` は永続状態だけを見る（実行中プロセスとの突き合わせはしない）。
//! - 書き込むのはライフサイクル管理だけ。ステータス照会と gateway は読むだけ。

use async_trait::async_trait;

use crate::domain::{OrchestratorError, TaskId, TaskRecord};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 新しいレコードを永続化。ID が使用済みなら `Conflict`。
    async fn create(&self, record: &TaskRecord) -> Result<(), OrchestratorError>;

    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, OrchestratorError>;

    /// 既存レコードを上書き。存在しなければ `NotFound`。
    async fn update(&self, record: &TaskRecord) -> Result<(), OrchestratorError>;

    /// レコードを削除（起動のロールバック）。存在しなくてもエラーにしない。
    async fn remove(&self, id: &TaskId) -> Result<(), OrchestratorError>;

    /// 全レコード、`created_at` の新しい順
    async fn list(&self) -> Result<Vec<TaskRecord>, OrchestratorError>;
}

/// 新しい順。同時刻は ID で並べて順序を安定させる。
pub(crate) fn sort_newest_first(records: &mut [TaskRecord]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}
