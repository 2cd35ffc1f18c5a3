//! JsonFileTaskStore - タスクごとに整形済み `<taskId>.json` を 1 つ
//!
//! # 実装の詳細
//! - まず `<taskId>.json.tmp` に書いてから rename するので、クラッシュしても
//!   書きかけのレコードは残らない。
//! - create/update は 1 つの async mutex で直列化し、「存在確認」と書き込みを
//!   同じクリティカルセクションに収める。
//! - 読めないファイルは `list` でスキップ（ログに出す）。致命的ではない。

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::domain::{OrchestratorError, TaskId, TaskRecord};
use crate::ports::TaskStore;
use crate::ports::task_store::sort_newest_first;

const RECORD_EXT: &str = "json";

pub struct JsonFileTaskStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileTaskStore {
    /// メタデータディレクトリを開く（なければ作る）
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, OrchestratorError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| OrchestratorError::io(format!("create {}", dir.display()), e))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `id` のレコードの置き場所（存在の有無は問わない）
    pub fn record_path(&self, id: &TaskId) -> PathBuf {
        self.dir.join(format!("{id}.{RECORD_EXT}"))
    }

    async fn exists(&self, path: &Path) -> Result<bool, OrchestratorError> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| OrchestratorError::io(format!("stat {}", path.display()), e))
    }

    async fn write_atomic(&self, record: &TaskRecord) -> Result<(), OrchestratorError> {
        let path = self.record_path(&record.id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| OrchestratorError::io(format!("write {}", tmp.display()), e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| OrchestratorError::io(format!("rename {}", path.display()), e))
    }

    async fn read(path: &Path) -> Result<Option<TaskRecord>, OrchestratorError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(OrchestratorError::io(format!("read {}", path.display()), e)),
        }
    }
}

#[async_trait]
impl TaskStore for JsonFileTaskStore {
    async fn create(&self, record: &TaskRecord) -> Result<(), OrchestratorError> {
        let _guard = self.write_lock.lock().await;
        if self.exists(&self.record_path(&record.id)).await? {
            return Err(OrchestratorError::Conflict(record.id.to_string()));
        }
        self.write_atomic(record).await
    }

    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, OrchestratorError> {
        Self::read(&self.record_path(id)).await
    }

    async fn update(&self, record: &TaskRecord) -> Result<(), OrchestratorError> {
        let _guard = self.write_lock.lock().await;
        if !self.exists(&self.record_path(&record.id)).await? {
            return Err(OrchestratorError::not_found("task", record.id.to_string()));
        }
        self.write_atomic(record).await
    }

    async fn remove(&self, id: &TaskId) -> Result<(), OrchestratorError> {
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(OrchestratorError::io(format!("remove {}", path.display()), e)),
        }
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, OrchestratorError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| OrchestratorError::io(format!("list {}", self.dir.display()), e))?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| OrchestratorError::io(format!("list {}", self.dir.display()), e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            match Self::read(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {} // read_dir と read の間に削除された
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable task record"),
            }
        }
        sort_newest_first(&mut records);
        Ok(records)
    }
}
