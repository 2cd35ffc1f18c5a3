//! ドメイン識別子（強い型付けの ID）
//!
//! - `TaskId`: 名前由来かつ衝突しにくい（`<slug>-<ulid>`）。
//!   ULID 部分により再起動をまたいで一意、かつ作成時刻順にソート可能。
//!   ID はファイル名（メタデータ、設定、ログ）にも使うので、クライアント由来の値は
//!   必ず `TaskId::parse` を通す。
//! - `ViewerId`: ライブチャネルの接続 1 本（`viewer-<ulid>`）。

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

use super::errors::OrchestratorError;

/// タスク ID の人間可読部分の最大長
pub const MAX_SLUG_LEN: usize = 32;

/// `TaskId::parse` が受け付ける上限
pub const MAX_TASK_ID_LEN: usize = 96;

const FALLBACK_SLUG: &str = "task";
const VIEWER_PREFIX: &str = "viewer-";

/// Task の識別子（チューニングプログラムの監視付き実行 1 回分）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// タスク名と新しい ULID から ID を作る
    pub fn from_name(name: &str, ulid: Ulid) -> Self {
        let slug = slugify(name);
        Self(format!("{slug}-{}", ulid.to_string().to_lowercase()))
    }

    /// 外部から受け取った ID を検証（パスパラメータ、ライブチャネル）
    pub fn parse(value: &str) -> Result<Self, OrchestratorError> {
        let valid = !value.is_empty()
            && value.len() <= MAX_TASK_ID_LEN
            && !value.starts_with('-')
            && value
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !valid {
            return Err(OrchestratorError::Validation(format!(
                "malformed task id: {value:?}"
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for TaskId {
    type Error = OrchestratorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(MAX_SLUG_LEN);
    for c in name.chars() {
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let trimmed = slug.trim_end_matches('-');
    if trimmed.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        trimmed.to_string()
    }
}

/// ライブ viewer 接続の識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ViewerId(Ulid);

impl ViewerId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{VIEWER_PREFIX}{}", self.0)
    }
}

impl TryFrom<String> for ViewerId {
    type Error = OrchestratorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let raw = value.strip_prefix(VIEWER_PREFIX).unwrap_or(&value);
        Ulid::from_string(raw).map(Self).map_err(|e| {
            OrchestratorError::Validation(format!("malformed viewer id {value:?}: {e}"))
        })
    }
}

impl From<ViewerId> for String {
    fn from(id: ViewerId) -> Self {
        id.to_string()
    }
}
