//! 監視中プロセスから取り込んだログ行

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::TaskId;

/// 行の出どころの標準ストリーム
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    /// タスクのログディレクトリ内での、このストリームの追記専用ログのファイル名
    pub fn log_file_name(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout.log",
            StreamKind::Stderr => "stderr.log",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 子プロセスが書いた 1 行
///
/// `content` は改行を除いた行。永続化されるログファイルには改行付きで書く。
/// `task-log` メッセージのペイロードとしてシリアライズされる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    pub task_id: TaskId,
    #[serde(rename = "type")]
    pub stream: StreamKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}
