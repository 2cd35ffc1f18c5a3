//! 起動リクエスト: チューニング実行を開始するためにクライアントが送るもの
//!
//! 独立した 2 つの部分:
//! - `FileInputs`: インラインのファイル内容とサーバー側ディレクトリ参照
//! - `TuningOverrides`: 設定テンプレートに上書きするリクエストごとの値
//!
//! 上書きはすべて任意。指定がなければテンプレート、次に `app::config` の
//! 既定値にフォールバックする。

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::OrchestratorError;

const MAX_NAME_LEN: usize = 128;

/// 「機能無効」を表す strategy 値
pub const STRATEGY_NONE: &str = "none";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub inputs: FileInputs,
    #[serde(flatten)]
    pub tuning: TuningOverrides,
}

/// 実行の入力ファイルの出どころ
///
/// `*_content` はインラインでアップロードされ、解決済みディレクトリ配下に書かれる。
/// `*_dir` は既存のサーバー側ディレクトリを指す（各ルートからの相対）。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInputs {
    #[serde(default)]
    pub history_content: Option<String>,
    #[serde(default)]
    pub history_dir: Option<String>,
    #[serde(default)]
    pub data_content: Option<String>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub save_dir: Option<String>,
}

impl FileInputs {
    /// 指定されたサーバー側ディレクトリ参照（フィールド名付き）
    pub fn dir_refs(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("historyDir", self.history_dir.as_deref()),
            ("dataDir", self.data_dir.as_deref()),
            ("saveDir", self.save_dir.as_deref()),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.map(|v| (field, v)))
    }
}

/// ディレクトリ参照を、カテゴリルートからの相対パスにする
///
/// 先頭の区切り文字は取り除くので `/foo` と `foo` は同じ意味。
/// ルートの外に出うるもの（`..`、ドライブ prefix）は拒否。
pub fn relative_dir_ref(sub_path: &str) -> Result<PathBuf, OrchestratorError> {
    let trimmed = sub_path.trim().trim_start_matches(['/', '\\']);
    let rel = Path::new(trimmed);
    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(invalid(format!(
                    "directory reference {sub_path:?} escapes its root"
                )));
            }
        }
    }
    Ok(rel.to_path_buf())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningOverrides {
    /// イテレーション予算
    #[serde(default)]
    pub iter_num: Option<u32>,
    #[serde(default)]
    pub random: RandomOverrides,
    #[serde(default)]
    pub warm_start: WarmStartOverrides,
    #[serde(default)]
    pub transfer_learning: TransferOverrides,
    #[serde(default)]
    pub compression: CompressionOverrides,
    #[serde(default)]
    pub scheduler: SchedulerOverrides,
}

/// ランダム探索のパラメータ
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomOverrides {
    #[serde(default)]
    pub seed: Option<u64>,
    /// surrogate の選択ではなくランダムな設定をサンプルする確率
    #[serde(default)]
    pub prob: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmStartOverrides {
    #[serde(default)]
    pub strategy: Option<String>,
    /// 履歴から取り出す warm-start 設定の数
    #[serde(default)]
    pub num: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOverrides {
    #[serde(default)]
    pub strategy: Option<String>,
    /// 考慮するソースタスクの最大数
    #[serde(default)]
    pub max_sources: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionOverrides {
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub top_ratio: Option<f64>,
}

/// マルチフィデリティ scheduler のリソース予算
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerOverrides {
    #[serde(default)]
    pub min_resource: Option<u32>,
    #[serde(default)]
    pub max_resource: Option<u32>,
    #[serde(default)]
    pub eta: Option<u32>,
}

impl TuningOverrides {
    /// warm-start と transfer learning は過去の観測を読む
    pub fn needs_history(&self) -> bool {
        strategy_enabled(&self.warm_start.strategy) || strategy_enabled(&self.transfer_learning.strategy)
    }
}

fn strategy_enabled(strategy: &Option<String>) -> bool {
    strategy
        .as_deref()
        .map(str::trim)
        .is_some_and(|s| !s.is_empty() && !s.eq_ignore_ascii_case(STRATEGY_NONE))
}

fn invalid(message: impl Into<String>) -> OrchestratorError {
    OrchestratorError::Validation(message.into())
}

impl LaunchRequest {
    /// 不正な入力を副作用の前に拒否
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(invalid(format!("name is longer than {MAX_NAME_LEN} characters")));
        }

        if let Some(content) = &self.inputs.history_content
            && content.trim().is_empty()
        {
            return Err(invalid("history content is empty"));
        }
        if let Some(content) = &self.inputs.data_content
            && content.trim().is_empty()
        {
            return Err(invalid("data content is empty"));
        }
        for (field, value) in self.inputs.dir_refs() {
            relative_dir_ref(value).map_err(|e| match e {
                OrchestratorError::Validation(msg) => invalid(format!("{field}: {msg}")),
                other => other,
            })?;
        }
        if self.tuning.needs_history()
            && self.inputs.history_content.is_none()
            && self.inputs.history_dir.is_none()
        {
            return Err(invalid(
                "warm start / transfer learning need history: upload historyContent or reference historyDir",
            ));
        }

        self.tuning.validate()
    }
}

impl TuningOverrides {
    fn validate(&self) -> Result<(), OrchestratorError> {
        if self.iter_num == Some(0) {
            return Err(invalid("iterNum must be positive"));
        }
        if let Some(prob) = self.random.prob
            && !(0.0..=1.0).contains(&prob)
        {
            return Err(invalid(format!("random.prob must be within [0, 1], got {prob}")));
        }
        if self.compression.top_k == Some(0) {
            return Err(invalid("compression.topK must be positive"));
        }
        if let Some(ratio) = self.compression.top_ratio
            && !(ratio > 0.0 && ratio <= 1.0)
        {
            return Err(invalid(format!(
                "compression.topRatio must be within (0, 1], got {ratio}"
            )));
        }
        if self.scheduler.min_resource == Some(0) {
            return Err(invalid("scheduler.minResource must be positive"));
        }
        if let (Some(min), Some(max)) = (self.scheduler.min_resource, self.scheduler.max_resource)
            && min > max
        {
            return Err(invalid(format!(
                "scheduler.minResource ({min}) exceeds maxResource ({max})"
            )));
        }
        if let Some(eta) = self.scheduler.eta
            && eta < 2
        {
            return Err(invalid("scheduler.eta must be at least 2"));
        }
        Ok(())
    }
}
