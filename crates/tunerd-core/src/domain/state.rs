//! タスクの状態機械

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task のライフサイクル状態
///
/// 状態遷移:
/// - Pending -> Running -> Completed
/// - Pending -> Running -> Failed
///
/// 終端状態のレコードは二度と遷移しない。再実行は新しい Task。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// レコードは永続化済み、プロセスは未確認
    Pending,

    /// プロセスを起動し監視中
    Running,

    /// プロセスがコード 0 で終了
    Completed,

    /// 非ゼロ終了、または実行時エラー
    Failed,
}

impl TaskStatus {
    /// 終端状態か（以降の遷移なし）
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// 前方への 1 ステップだけが合法
    pub fn can_advance_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 監視中プロセスの終わり方
///
/// 終端の分類はこの 2 つだけ。部分的な結果やキャンセルは無い。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// プロセスが自分でこのコードで終了した
    Exited(i32),

    /// wait が失敗、またはシグナルで kill された
    Errored(String),
}

impl ProcessOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            ProcessOutcome::Exited(0) => TaskStatus::Completed,
            _ => TaskStatus::Failed,
        }
    }

    /// レコードの `error` フィールドに入る文言（成功時は None）
    pub fn error_message(&self) -> Option<String> {
        match self {
            ProcessOutcome::Exited(0) => None,
            ProcessOutcome::Exited(code) => Some(format!("process exited with code {code}")),
            ProcessOutcome::Errored(message) => Some(message.clone()),
        }
    }
}

/// 永続化済みレコードのステータス別集計
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TaskCounts {
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }
}
