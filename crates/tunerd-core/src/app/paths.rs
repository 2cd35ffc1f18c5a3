//! PathResolver - 実行ごとのディレクトリ構成
//!
//! 上書きは *カテゴリルートからの相対パス*（`domain::relative_dir_ref` 参照）。
//! 起動時の上書きは、最初のディレクトリを作る前にすべて検査する。

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::{FileInputs, OrchestratorError, TaskId, relative_dir_ref};

/// カテゴリごとのルートディレクトリ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRoots {
    pub history: PathBuf,
    pub data: PathBuf,
    pub result: PathBuf,
    pub log: PathBuf,
    pub config: PathBuf,
    pub meta: PathBuf,
}

impl StorageRoots {
    /// 1 つのベースディレクトリ配下の標準構成
    pub fn under(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            history: base.join("history"),
            data: base.join("data"),
            result: base.join("result"),
            log: base.join("log"),
            config: base.join("config"),
            meta: base.join("meta"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathCategory {
    History,
    Data,
    Result,
    Log,
    Config,
}

/// タスク単位のディレクトリ。起動ごとに 1 回計算。すべて絶対パスで、存在する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub history_dir: PathBuf,
    pub data_dir: PathBuf,
    pub save_dir: PathBuf,
    pub log_dir: PathBuf,
    pub config_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    roots: StorageRoots,
}

impl PathResolver {
    pub fn new(roots: StorageRoots) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &StorageRoots {
        &self.roots
    }

    fn root(&self, category: PathCategory) -> &Path {
        match category {
            PathCategory::History => &self.roots.history,
            PathCategory::Data => &self.roots.data,
            PathCategory::Result => &self.roots.result,
            PathCategory::Log => &self.roots.log,
            PathCategory::Config => &self.roots.config,
        }
    }

    /// `category` の絶対ディレクトリ。無ければ作る。
    ///
    /// ディレクトリ作成の失敗は致命的: 出力先が無ければ先に進めない。
    pub async fn resolve(
        &self,
        category: PathCategory,
        sub_path: Option<&str>,
    ) -> Result<PathBuf, OrchestratorError> {
        let rel = sub_path.map(relative_dir_ref).transpose()?;
        self.create(category, rel.as_deref()).await
    }

    async fn create(
        &self,
        category: PathCategory,
        rel: Option<&Path>,
    ) -> Result<PathBuf, OrchestratorError> {
        let root = self.root(category);
        let dir = match rel {
            Some(rel) if !rel.as_os_str().is_empty() => root.join(rel),
            _ => root.to_path_buf(),
        };
        let dir = std::path::absolute(&dir)
            .map_err(|e| OrchestratorError::io(format!("absolutize {}", dir.display()), e))?;

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| OrchestratorError::io(format!("create {}", dir.display()), e))?;
        debug!(?category, dir = %dir.display(), "resolved directory");
        Ok(dir)
    }

    /// 起動に必要なディレクトリをすべて解決
    ///
    /// ログディレクトリは常に `<log root>/<taskId>`。その他はリクエストの
    /// サーバー側ディレクトリ参照に従う。不正な参照があれば何も作らずに失敗する。
    pub async fn resolve_for_task(
        &self,
        task_id: &TaskId,
        inputs: &FileInputs,
    ) -> Result<ResolvedPaths, OrchestratorError> {
        let check = |sub: &Option<String>| sub.as_deref().map(relative_dir_ref).transpose();
        let history = check(&inputs.history_dir)?;
        let data = check(&inputs.data_dir)?;
        let save = check(&inputs.save_dir)?;

        Ok(ResolvedPaths {
            history_dir: self.create(PathCategory::History, history.as_deref()).await?,
            data_dir: self.create(PathCategory::Data, data.as_deref()).await?,
            save_dir: self.create(PathCategory::Result, save.as_deref()).await?,
            log_dir: self
                .create(PathCategory::Log, Some(Path::new(task_id.as_str())))
                .await?,
            config_dir: self.create(PathCategory::Config, None).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn escaping_override_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(StorageRoots::under(tmp.path()));
        for input in ["../etc", "a/../../b", "/../x"] {
            assert!(
                matches!(
                    resolver.resolve(PathCategory::Data, Some(input)).await,
                    Err(OrchestratorError::Validation(_))
                ),
                "{input}"
            );
        }
        assert!(!tmp.path().join("data").exists());
    }

    #[tokio::test]
    async fn late_bad_override_creates_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(StorageRoots::under(tmp.path().join("ws")));
        let id = TaskId::parse("svm-01").unwrap();
        let inputs = FileInputs {
            history_dir: Some("brand/new/dir".into()),
            save_dir: Some("../escape".into()),
            ..Default::default()
        };

        let err = resolver.resolve_for_task(&id, &inputs).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(!tmp.path().join("ws").exists());
    }

    #[tokio::test]
    async fn absent_override_falls_back_to_root() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(StorageRoots::under(tmp.path()));

        let dir = resolver.resolve(PathCategory::Data, None).await.unwrap();
        assert_eq!(dir, tmp.path().join("data"));
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn override_is_joined_under_root_and_created() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(StorageRoots::under(tmp.path()));

        let dir = resolver
            .resolve(PathCategory::History, Some("/shared/svm"))
            .await
            .unwrap();
        assert_eq!(dir, tmp.path().join("history").join("shared").join("svm"));
        assert!(dir.is_dir());

        // 冪等
        let again = resolver
            .resolve(PathCategory::History, Some("shared/svm"))
            .await
            .unwrap();
        assert_eq!(again, dir);
    }

    #[tokio::test]
    async fn creation_failure_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("data");
        std::fs::write(&blocker, b"a file where a dir should be").unwrap();
        let resolver = PathResolver::new(StorageRoots::under(tmp.path()));

        let err = resolver.resolve(PathCategory::Data, Some("x")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Io { .. }));
    }

    #[tokio::test]
    async fn task_layout_uses_task_scoped_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(StorageRoots::under(tmp.path()));
        let id = TaskId::parse("svm-01").unwrap();
        let inputs = FileInputs {
            save_dir: Some("out".into()),
            ..Default::default()
        };

        let paths = resolver.resolve_for_task(&id, &inputs).await.unwrap();
        assert_eq!(paths.log_dir, tmp.path().join("log").join("svm-01"));
        assert_eq!(paths.save_dir, tmp.path().join("result").join("out"));
        assert_eq!(paths.history_dir, tmp.path().join("history"));
        for dir in [
            &paths.history_dir,
            &paths.data_dir,
            &paths.save_dir,
            &paths.log_dir,
            &paths.config_dir,
        ] {
            assert!(dir.is_dir());
        }
    }
}
