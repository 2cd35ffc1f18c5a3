//! Events - ライブチャネルのメッセージ
//!
//! ワイヤ形式: `{ "type": "<kebab-case>", "data": { ...camelCase フィールド } }`
//! adjacent tagging なので `task-log` 自身の `type`（stdout/stderr）フィールドと衝突しない。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{TaskId, ViewerId};
use super::log::LogLine;
use super::state::TaskStatus;

/// クライアント -> サーバー
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    SubscribeTask(TaskRef),
    UnsubscribeTask(TaskRef),
}

/// サーバー -> クライアント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// 接続受理の直後に 1 回だけ送る。
    Connected(ConnectionAck),
    SubscribeSuccess(TaskRef),
    UnsubscribeSuccess(TaskRef),
    TaskLog(LogLine),
    /// そのタスクの購読者に届く。
    TaskStatus(StatusUpdate),
    /// 接続中の全 viewer に届く（一覧画面用）。
    TaskStatusBroadcast(StatusUpdate),
    Error(ErrorNotice),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    pub task_id: TaskId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionAck {
    pub viewer_id: ViewerId,
    pub server_time: DateTime<Utc>,
}

/// ライフサイクル管理が観測した状態遷移
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotice {
    pub message: String,
}

impl ServerMessage {
    /// 対象タスク（あれば）
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            ServerMessage::SubscribeSuccess(r) | ServerMessage::UnsubscribeSuccess(r) => {
                Some(&r.task_id)
            }
            ServerMessage::TaskLog(line) => Some(&line.task_id),
            ServerMessage::TaskStatus(u) | ServerMessage::TaskStatusBroadcast(u) => {
                Some(&u.task_id)
            }
            ServerMessage::Connected(_) | ServerMessage::Error(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::log::StreamKind;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()
    }

    #[test]
    fn parses_subscribe_request() {
        let raw = r#"{"type":"subscribe-task","data":{"taskId":"svm-01"}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::SubscribeTask(TaskRef {
                task_id: TaskId::parse("svm-01").unwrap()
            })
        );
    }

    #[test]
    fn rejects_unsafe_task_id_in_request() {
        let raw = r#"{"type":"unsubscribe-task","data":{"taskId":"../../etc"}}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn task_log_keeps_stream_under_type() {
        let msg = ServerMessage::TaskLog(LogLine {
            task_id: TaskId::parse("svm-01").unwrap(),
            stream: StreamKind::Stdout,
            content: "iter 1".into(),
            timestamp: ts(),
        });
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "task-log");
        assert_eq!(v["data"]["type"], "stdout");
        assert_eq!(v["data"]["taskId"], "svm-01");
    }

    #[test]
    fn status_broadcast_shape() {
        let msg = ServerMessage::TaskStatusBroadcast(StatusUpdate {
            task_id: TaskId::parse("svm-01").unwrap(),
            status: TaskStatus::Failed,
            message: Some("process exited with code 1".into()),
            timestamp: ts(),
        });
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            v,
            json!({
                "type": "task-status-broadcast",
                "data": {
                    "taskId": "svm-01",
                    "status": "failed",
                    "message": "process exited with code 1",
                    "timestamp": "2024-05-01T08:30:00Z"
                }
            })
        );
    }
}
