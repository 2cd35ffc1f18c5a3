//! タスクレコード: 識別子、宣言済みパス、ライフサイクル状態

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::errors::OrchestratorError;
use super::ids::TaskId;
use super::state::{ProcessOutcome, TaskStatus};

/// タスクに宣言された出力パス。どれが埋まるかは起動モード次第。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPaths {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_log: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_log: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_dir: Option<PathBuf>,
}

/// タスクの永続レコード
///
/// 設計:
/// - ステータス照会が読む唯一の情報源
/// - ステータス変更は `mark_running` / `finish` を通し、前方への 1 ステップ
///   以外の遷移は拒否する
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub paths: TaskPaths,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        name: impl Into<String>,
        description: Option<String>,
        paths: TaskPaths,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            description,
            paths,
            status: TaskStatus::Pending,
            pid: None,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Pending -> Running（OS が生きている pid を返した後）
    pub fn mark_running(&mut self, pid: u32, now: DateTime<Utc>) -> Result<(), OrchestratorError> {
        self.advance(TaskStatus::Running, now)?;
        self.pid = Some(pid);
        Ok(())
    }

    /// Running -> Completed / Failed（supervisor の終了結果から）
    pub fn finish(
        &mut self,
        outcome: &ProcessOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        self.advance(outcome.status(), now)?;
        self.error = outcome.error_message();
        Ok(())
    }

    fn advance(&mut self, next: TaskStatus, now: DateTime<Utc>) -> Result<(), OrchestratorError> {
        if !self.status.can_advance_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                task_id: self.id.to_string(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record() -> TaskRecord {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        TaskRecord::new(
            TaskId::parse("demo-1").unwrap(),
            "demo",
            None,
            TaskPaths::default(),
            t0,
        )
    }

    #[test]
    fn new_record_starts_pending() {
        let r = record();
        assert_eq!(r.status, TaskStatus::Pending);
        assert_eq!(r.created_at, r.updated_at);
        assert!(r.pid.is_none());
    }

    #[test]
    fn happy_path_sets_pid_and_clears_error() {
        let mut r = record();
        let t1 = r.created_at + Duration::seconds(1);
        r.mark_running(4242, t1).unwrap();
        assert_eq!(r.pid, Some(4242));
        assert_eq!(r.updated_at, t1);

        r.finish(&ProcessOutcome::Exited(0), t1).unwrap();
        assert_eq!(r.status, TaskStatus::Completed);
        assert!(r.error.is_none());
    }

    #[test]
    fn nonzero_exit_records_the_code() {
        let mut r = record();
        let now = r.created_at;
        r.mark_running(1, now).unwrap();
        r.finish(&ProcessOutcome::Exited(3), now).unwrap();
        assert_eq!(r.status, TaskStatus::Failed);
        assert!(r.error.as_deref().unwrap().contains('3'));
    }

    #[test]
    fn terminal_record_cannot_be_reopened() {
        let mut r = record();
        let now = r.created_at;
        r.mark_running(1, now).unwrap();
        r.finish(&ProcessOutcome::Exited(0), now).unwrap();

        let err = r.mark_running(2, now).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
        assert_eq!(r.pid, Some(1));
        assert!(r.finish(&ProcessOutcome::Exited(1), now).is_err());
        assert_eq!(r.status, TaskStatus::Completed);
    }

    #[test]
    fn finishing_a_pending_record_is_rejected() {
        let mut r = record();
        let now = r.created_at;
        assert!(r.finish(&ProcessOutcome::Exited(0), now).is_err());
        assert_eq!(r.status, TaskStatus::Pending);
    }

    #[test]
    fn record_json_uses_camel_case_and_skips_empty_fields() {
        let r = record();
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["status"], "pending");
        assert!(v.get("createdAt").is_some());
        assert!(v.get("error").is_none());
        assert!(v["paths"].as_object().unwrap().is_empty());
    }
}
