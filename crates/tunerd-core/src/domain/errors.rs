//! Errors - エラー型と運用上の分類

use thiserror::Error;

use super::state::TaskStatus;

/// ErrorKind は呼び出し側向けの失敗分類（gateway が HTTP ステータスに変換する）
///
/// - Validation: 起動入力の不正・欠落。副作用の前に拒否
/// - NotFound: launcher スクリプト、設定テンプレート、タスク ID が存在しない
/// - Conflict: 同じ ID のレコードが既に存在
/// - Runtime: OS がプロセス起動を拒否、または不正な状態遷移
/// - Infrastructure: ディスク / シリアライズの失敗
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Runtime,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{what} not found: {target}")]
    NotFound { what: &'static str, target: String },

    #[error("task {0} already exists")]
    Conflict(String),

    #[error("task {task_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn not_found(what: &'static str, target: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            target: target.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Validation(_) => ErrorKind::Validation,
            OrchestratorError::NotFound { .. } => ErrorKind::NotFound,
            OrchestratorError::Conflict(_) => ErrorKind::Conflict,
            OrchestratorError::InvalidTransition { .. } | OrchestratorError::Spawn { .. } => {
                ErrorKind::Runtime
            }
            OrchestratorError::Io { .. }
            | OrchestratorError::Yaml(_)
            | OrchestratorError::Json(_) => ErrorKind::Infrastructure,
        }
    }
}
