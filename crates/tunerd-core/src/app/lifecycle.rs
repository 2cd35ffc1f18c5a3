//! TaskLifecycleManager - チューニング実行の起動・追跡・照会
//!
//! # 起動
//! 検証 -> launcher の存在確認 -> ID -> パス -> インラインファイル -> 設定
//! -> レコード（`pending`）-> spawn -> レコード（`running`, pid）-> receipt
//!
//! 最初の副作用の後に失敗したものはすべて巻き戻す: インラインファイル、
//! 設定ファイル、タスクのログディレクトリ、メタデータレコードを削除するので、
//! 失敗した起動が `status` / `list` に現れることはない。既に起動したプロセスは
//! その前にプロセスグループごと kill する。
//!
//! # 起動後
//! タスクごとの watcher が supervisor の終了結果を待ち、`completed` / `failed` を
//! レコードに書いてから遷移を publish する。
//! あるレコードに書き込むのは起動処理とその watcher だけ。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::config::{ConfigSynthesizer, SynthesisInput};
use super::paths::PathResolver;
use super::supervisor::{ProcessSpec, ProcessSupervisor, SupervisedProcess};
use crate::domain::{
    LaunchRequest, OrchestratorError, ProcessOutcome, StatusUpdate, StreamKind, TaskCounts,
    TaskId, TaskPaths, TaskRecord, TaskStatus,
};
use crate::ports::{Clock, EventSink, IdGenerator, TaskStore};

/// 外部のチューニングプログラムの起動方法
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherSpec {
    pub project_root: PathBuf,
    /// 絶対パスでなければ `project_root` からの相対
    pub script: PathBuf,
    /// 指定時は `<script> <name>` ではなく `<interpreter> <script> <name>` を実行
    pub interpreter: Option<String>,
}

impl LauncherSpec {
    pub fn script_path(&self) -> PathBuf {
        self.project_root.join(&self.script)
    }
}

/// 起動成功時に返すもの
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchReceipt {
    pub task_id: TaskId,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub paths: TaskPaths,
}

/// レコードと、プロセステーブル由来の `isRunning` フラグ
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusView {
    #[serde(flatten)]
    pub record: TaskRecord,
    pub is_running: bool,
}

/// 監視中のプロセス。再起動で失われる。
#[derive(Debug, Clone, Copy)]
struct RunProcess {
    pid: u32,
    is_running: bool,
}

/// タスクごとの完了 watcher と共有する状態
struct Shared {
    store: Arc<dyn TaskStore>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    running: Mutex<HashMap<TaskId, RunProcess>>,
}

pub struct LifecycleDeps {
    pub store: Arc<dyn TaskStore>,
    pub sink: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub paths: PathResolver,
    pub config: ConfigSynthesizer,
    pub supervisor: ProcessSupervisor,
    pub launcher: LauncherSpec,
}

pub struct TaskLifecycleManager {
    shared: Arc<Shared>,
    ids: Arc<dyn IdGenerator>,
    paths: PathResolver,
    config: ConfigSynthesizer,
    supervisor: ProcessSupervisor,
    launcher: LauncherSpec,
}

impl TaskLifecycleManager {
    pub fn new(deps: LifecycleDeps) -> Self {
        Self {
            shared: Arc::new(Shared {
                store: deps.store,
                sink: deps.sink,
                clock: deps.clock,
                running: Mutex::new(HashMap::new()),
            }),
            ids: deps.ids,
            paths: deps.paths,
            config: deps.config,
            supervisor: deps.supervisor,
            launcher: deps.launcher,
        }
    }

    pub fn launcher(&self) -> &LauncherSpec {
        &self.launcher
    }

    pub async fn launch(&self, request: LaunchRequest) -> Result<LaunchReceipt, OrchestratorError> {
        request.validate()?;

        let script = self.launcher.script_path();
        let present = match tokio::fs::metadata(&script).await {
            Ok(meta) => meta.is_file(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                return Err(OrchestratorError::io(format!("stat {}", script.display()), e));
            }
        };
        if !present {
            return Err(OrchestratorError::not_found(
                "launcher script",
                script.display().to_string(),
            ));
        }

        let task_id = self.ids.generate_task_id(&request.name);
        info!(%task_id, name = %request.name.trim(), "launch accepted");

        let mut rollback = Rollback::default();
        match self.start(&request, &task_id, &script, &mut rollback).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                warn!(%task_id, error = %e, "launch failed; rolling back");
                rollback.run(self.shared.store.as_ref()).await;
                Err(e)
            }
        }
    }

    async fn start(
        &self,
        request: &LaunchRequest,
        task_id: &TaskId,
        script: &Path,
        rollback: &mut Rollback,
    ) -> Result<LaunchReceipt, OrchestratorError> {
        let resolved = self.paths.resolve_for_task(task_id, &request.inputs).await?;
        rollback.dirs.push(resolved.log_dir.clone());

        let history_file = match &request.inputs.history_content {
            Some(content) => {
                let file = resolved.history_dir.join(format!("{task_id}.json"));
                write_inline(&file, content).await?;
                rollback.files.push(file.clone());
                Some(file)
            }
            None => None,
        };
        let data_file = match &request.inputs.data_content {
            Some(content) => {
                let file = resolved.data_dir.join(format!("{task_id}.json"));
                write_inline(&file, content).await?;
                rollback.files.push(file.clone());
                Some(file)
            }
            None => None,
        };

        let synthesized = self
            .config
            .synthesize(SynthesisInput {
                task_id,
                overrides: &request.tuning,
                paths: &resolved,
                history_file: history_file.as_deref(),
            })
            .await?;
        rollback.files.push(synthesized.config_file.clone());

        let stdout_log = resolved.log_dir.join(StreamKind::Stdout.log_file_name());
        let stderr_log = resolved.log_dir.join(StreamKind::Stderr.log_file_name());
        let paths = TaskPaths {
            history_file,
            data_file,
            config_file: Some(synthesized.config_file.clone()),
            log_dir: Some(resolved.log_dir.clone()),
            stdout_log: Some(stdout_log.clone()),
            stderr_log: Some(stderr_log.clone()),
            history_dir: Some(resolved.history_dir.clone()),
            data_dir: Some(resolved.data_dir.clone()),
            save_dir: Some(resolved.save_dir.clone()),
        };

        let name = request.name.trim().to_string();
        let mut record = TaskRecord::new(
            task_id.clone(),
            name.clone(),
            request.description.clone(),
            paths,
            self.shared.clock.now(),
        );
        self.shared.store.create(&record).await?;
        rollback.record = Some(task_id.clone());

        let (program, args) = match &self.launcher.interpreter {
            Some(interpreter) => (
                interpreter.clone(),
                vec![script.display().to_string(), name],
            ),
            None => (script.display().to_string(), vec![name]),
        };
        let mut process = self
            .supervisor
            .supervise(ProcessSpec {
                task_id: task_id.clone(),
                program,
                args,
                cwd: self.launcher.project_root.clone(),
                env: synthesized.env,
                stdout_log,
                stderr_log,
            })
            .await?;

        if let Err(e) = self.record_running(&mut record, process.pid).await {
            // ロールバックでレコードとログが消えるので、先に実行を止める
            process.kill();
            let outcome = process.wait().await;
            warn!(%task_id, ?outcome, "stopped a run that could not be recorded");
            return Err(e);
        }

        self.shared.running.lock().await.insert(
            task_id.clone(),
            RunProcess {
                pid: process.pid,
                is_running: true,
            },
        );

        // spawn が確定してから通知するので、巻き戻された起動は見えない
        self.shared
            .sink
            .publish_status(StatusUpdate {
                task_id: task_id.clone(),
                status: TaskStatus::Pending,
                message: None,
                timestamp: record.created_at,
            })
            .await;
        self.shared
            .sink
            .publish_status(StatusUpdate {
                task_id: task_id.clone(),
                status: TaskStatus::Running,
                message: None,
                timestamp: record.updated_at,
            })
            .await;

        tokio::spawn(Arc::clone(&self.shared).watch(task_id.clone(), process));
        info!(%task_id, pid = ?record.pid, "task running");

        Ok(LaunchReceipt {
            task_id: record.id.clone(),
            created_at: record.created_at,
            status: record.status,
            paths: record.paths,
        })
    }

    async fn record_running(
        &self,
        record: &mut TaskRecord,
        pid: u32,
    ) -> Result<(), OrchestratorError> {
        record.mark_running(pid, self.shared.clock.now())?;
        self.shared.store.update(record).await
    }

    pub async fn status(&self, task_id: &TaskId) -> Result<TaskStatusView, OrchestratorError> {
        let record = self
            .shared
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("task", task_id.as_str()))?;
        let is_running = self
            .shared
            .running
            .lock()
            .await
            .get(task_id)
            .is_some_and(|p| p.is_running);
        Ok(TaskStatusView { record, is_running })
    }

    /// 永続化済みレコード、新しい順。実行中プロセスとの突き合わせはしない。
    pub async fn list(&self) -> Result<Vec<TaskRecord>, OrchestratorError> {
        self.shared.store.list().await
    }

    pub async fn counts(&self) -> Result<TaskCounts, OrchestratorError> {
        let mut counts = TaskCounts::default();
        for record in self.shared.store.list().await? {
            counts.record(record.status);
        }
        Ok(counts)
    }

    /// 監視中タスクの pid
    pub async fn running_pid(&self, task_id: &TaskId) -> Option<u32> {
        self.shared.running.lock().await.get(task_id).map(|p| p.pid)
    }

    /// 1 ストリーム分の永続化済み出力。`tail` 指定時は末尾の行だけ。
    ///
    /// まだ何も書いていないタスクにはログファイルが無い。その場合は空として読む。
    pub async fn read_log(
        &self,
        task_id: &TaskId,
        stream: StreamKind,
        tail: Option<usize>,
    ) -> Result<Vec<String>, OrchestratorError> {
        let record = self
            .shared
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("task", task_id.as_str()))?;
        let declared = match stream {
            StreamKind::Stdout => record.paths.stdout_log,
            StreamKind::Stderr => record.paths.stderr_log,
        };
        let Some(path) = declared.or_else(|| {
            record
                .paths
                .log_dir
                .map(|dir| dir.join(stream.log_file_name()))
        }) else {
            return Ok(Vec::new());
        };

        let text = match tokio::fs::read(&path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(OrchestratorError::io(format!("read {}", path.display()), e)),
        };
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        Ok(match tail {
            Some(n) if n < lines.len() => lines[lines.len() - n..].to_vec(),
            _ => lines,
        })
    }
}

impl Shared {
    async fn watch(self: Arc<Self>, task_id: TaskId, process: SupervisedProcess) {
        let outcome = process.wait().await;
        if let Err(e) = self.record_outcome(&task_id, &outcome).await {
            error!(%task_id, error = %e, ?outcome, "could not record task outcome");
        }
        self.running.lock().await.remove(&task_id);
    }

    async fn record_outcome(
        &self,
        task_id: &TaskId,
        outcome: &ProcessOutcome,
    ) -> Result<(), OrchestratorError> {
        let mut record = self
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("task", task_id.as_str()))?;
        let now = self.clock.now();
        record.finish(outcome, now)?;
        self.store.update(&record).await?;
        info!(%task_id, status = %record.status, error = ?record.error, "task finished");

        self.sink
            .publish_status(StatusUpdate {
                task_id: task_id.clone(),
                status: record.status,
                message: record.error.clone(),
                timestamp: now,
            })
            .await;
        Ok(())
    }
}

/// 進行中の起動の副作用。起動が失敗したら巻き戻す。
#[derive(Debug, Default)]
struct Rollback {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
    record: Option<TaskId>,
}

impl Rollback {
    async fn run(self, store: &dyn TaskStore) {
        if let Some(task_id) = &self.record
            && let Err(e) = store.remove(task_id).await
        {
            error!(%task_id, error = %e, "rollback: could not remove task record");
        }
        for file in &self.files {
            if let Err(e) = tokio::fs::remove_file(file).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(file = %file.display(), error = %e, "rollback: could not remove file");
            }
        }
        for dir in &self.dirs {
            if let Err(e) = tokio::fs::remove_dir_all(dir).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(dir = %dir.display(), error = %e, "rollback: could not remove directory");
            }
        }
    }
}

async fn write_inline(path: &Path, content: &str) -> Result<(), OrchestratorError> {
    tokio::fs::write(path, content)
        .await
        .map_err(|e| OrchestratorError::io(format!("write {}", path.display()), e))
}
