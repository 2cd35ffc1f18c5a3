//! Settings - 任意の YAML ファイルから読むサーバー設定
//!
//! 全フィールドに既定値があるので、空のファイルやファイル無しでも有効な構成になる。
//! 相対パスは `project_root` を基準に解決する。
//!
//! ```yaml
//! bind: 0.0.0.0:3001
//! project_root: /srv/tuner
//! launcher:
//!   script: scripts/run_tuning.sh
//!   interpreter: sh
//!   spawn_grace_ms: 500
//! template: config/template.yaml
//! storage:
//!   root: workspace
//! classifier:
//!   enabled: true
//! live:
//!   outbox_capacity: 1024
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::app::broadcaster::DEFAULT_OUTBOX_CAPACITY;
use crate::app::classifier::StreamClassifier;
use crate::app::lifecycle::LauncherSpec;
use crate::app::paths::StorageRoots;
use crate::domain::OrchestratorError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub bind: String,
    pub project_root: PathBuf,
    pub launcher: LauncherSettings,
    /// 実行設定のテンプレート
    pub template: PathBuf,
    pub storage: StorageSettings,
    pub classifier: ClassifierSettings,
    pub live: LiveSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LauncherSettings {
    pub script: PathBuf,
    /// `None` ならスクリプトを直接実行
    pub interpreter: Option<String>,
    pub spawn_grace_ms: u64,
}

/// カテゴリごとのルート。それぞれ `root` からの相対（`root` はプロジェクトルートからの相対）。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSettings {
    pub root: PathBuf,
    pub history: PathBuf,
    pub data: PathBuf,
    pub result: PathBuf,
    pub log: PathBuf,
    pub config: PathBuf,
    pub meta: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierSettings {
    pub enabled: bool,
    pub info_tokens: Vec<String>,
    pub error_tokens: Vec<String>,
}

/// ライブチャネルの上限
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LiveSettings {
    /// viewer ごとに溜められるメッセージ数。これ以上遅れた viewer は切断する。
    pub outbox_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3001".into(),
            project_root: PathBuf::from("."),
            launcher: LauncherSettings::default(),
            template: PathBuf::from("config/template.yaml"),
            storage: StorageSettings::default(),
            classifier: ClassifierSettings::default(),
            live: LiveSettings::default(),
        }
    }
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            script: PathBuf::from("scripts/run_tuning.sh"),
            interpreter: Some("sh".into()),
            spawn_grace_ms: 500,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("workspace"),
            history: PathBuf::from("history"),
            data: PathBuf::from("data"),
            result: PathBuf::from("result"),
            log: PathBuf::from("log"),
            config: PathBuf::from("config"),
            meta: PathBuf::from("meta"),
        }
    }
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            info_tokens: vec!["INFO".into(), "WARN".into()],
            error_tokens: vec!["ERROR".into(), "Traceback".into(), "Exception".into()],
        }
    }
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }
}

impl Settings {
    /// `path` が `None` なら既定値。指定時はファイルが存在しなければならない。
    pub async fn load(path: Option<&Path>) -> Result<Self, OrchestratorError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OrchestratorError::not_found(
                    "settings file",
                    path.display().to_string(),
                ));
            }
            Err(e) => return Err(OrchestratorError::io(format!("read {}", path.display()), e)),
        };
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, OrchestratorError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn template_path(&self) -> PathBuf {
        self.project_root.join(&self.template)
    }

    pub fn storage_roots(&self) -> StorageRoots {
        let base = self.project_root.join(&self.storage.root);
        StorageRoots {
            history: base.join(&self.storage.history),
            data: base.join(&self.storage.data),
            result: base.join(&self.storage.result),
            log: base.join(&self.storage.log),
            config: base.join(&self.storage.config),
            meta: base.join(&self.storage.meta),
        }
    }

    /// 絶対パスのプロジェクトルートに固定した launcher
    ///
    /// 子プロセスはプロジェクトルートを作業ディレクトリとして動くので、相対のままだと
    /// ルートが二重に適用される。
    pub fn launcher_spec(&self) -> Result<LauncherSpec, OrchestratorError> {
        let project_root = std::path::absolute(&self.project_root).map_err(|e| {
            OrchestratorError::io(format!("absolutize {}", self.project_root.display()), e)
        })?;
        Ok(LauncherSpec {
            project_root,
            script: self.launcher.script.clone(),
            interpreter: self
                .launcher
                .interpreter
                .clone()
                .filter(|i| !i.trim().is_empty()),
        })
    }

    pub fn spawn_grace(&self) -> Duration {
        Duration::from_millis(self.launcher.spawn_grace_ms)
    }

    /// 有効なら stderr の分類器
    pub fn stream_classifier(&self) -> Option<StreamClassifier> {
        self.classifier.enabled.then(|| {
            StreamClassifier::new(
                self.classifier.info_tokens.clone(),
                self.classifier.error_tokens.clone(),
            )
        })
    }
}
