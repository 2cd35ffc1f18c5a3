//! ConfigSynthesizer - テンプレート + リクエストごとの上書き -> 実行設定
//!
//! 各フィールドの優先順位: リクエストの上書き、次にテンプレートの値、次に下記の既定値。
//! `merge` は純粋関数で、同じテンプレートと同じ上書きからは常に同じドキュメント
//! （マッピングの順序も含む）ができる。`synthesize` の副作用は `<taskId>.yaml` の
//! 書き込みだけ。
//!
//! 生成されるドキュメントの構成:
//!
//! ```yaml
//! task_id: <id>
//! iter_num: 50
//! random: { seed: 42, prob: 0.1 }
//! warm_start: { strategy: none, num: 3 }
//! transfer_learning: { strategy: none, max_sources: 5 }
//! compression: { strategy: none, top_k: 20, top_ratio: 0.8 }
//! scheduler: { min_resource: 1, max_resource: 27, eta: 3 }
//! paths: { history_dir, data_dir, save_dir, log_dir }
//! space: { history_file, output_dir }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::debug;

use super::paths::ResolvedPaths;
use crate::domain::request::STRATEGY_NONE;
use crate::domain::{OrchestratorError, TaskId, TuningOverrides};

pub const DEFAULT_ITER_NUM: u32 = 50;
pub const DEFAULT_RANDOM_SEED: u64 = 42;
pub const DEFAULT_RANDOM_PROB: f64 = 0.1;
pub const DEFAULT_WARM_START_NUM: u32 = 3;
pub const DEFAULT_MAX_SOURCES: u32 = 5;
pub const DEFAULT_TOP_K: u32 = 20;
pub const DEFAULT_TOP_RATIO: f64 = 0.8;
pub const DEFAULT_MIN_RESOURCE: u32 = 1;
pub const DEFAULT_MAX_RESOURCE: u32 = 27;
pub const DEFAULT_ETA: u32 = 3;

pub const ENV_TASK_ID: &str = "TUNER_TASK_ID";
pub const ENV_CONFIG_FILE: &str = "TUNER_CONFIG_FILE";
pub const ENV_ITER_NUM: &str = "TUNER_ITER_NUM";
pub const ENV_HISTORY_DIR: &str = "TUNER_HISTORY_DIR";
pub const ENV_DATA_DIR: &str = "TUNER_DATA_DIR";
pub const ENV_SAVE_DIR: &str = "TUNER_SAVE_DIR";
pub const ENV_LOG_DIR: &str = "TUNER_LOG_DIR";
pub const ENV_COMPRESS_STRATEGY: &str = "TUNER_COMPRESS_STRATEGY";
pub const ENV_COMPRESS_TOPK: &str = "TUNER_COMPRESS_TOPK";

/// テンプレート以外に `merge` が必要とするもの
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    pub task_id: &'a TaskId,
    pub overrides: &'a TuningOverrides,
    pub paths: &'a ResolvedPaths,
    /// このタスク用に書き出したインライン履歴（あれば）
    pub history_file: Option<&'a Path>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedConfig {
    pub config_file: PathBuf,
    pub document: Value,
    /// 環境変数を読むプログラム向けに、主要な設定をフラットに写したもの
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ConfigSynthesizer {
    template_path: PathBuf,
}

impl ConfigSynthesizer {
    pub fn new(template_path: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
        }
    }

    pub fn template_path(&self) -> &Path {
        &self.template_path
    }

    /// テンプレートを読む。ファイルが無ければ `NotFound`、空ファイルは空のマッピング。
    pub async fn load_template(&self) -> Result<Value, OrchestratorError> {
        let text = match tokio::fs::read_to_string(&self.template_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OrchestratorError::not_found(
                    "config template",
                    self.template_path.display().to_string(),
                ));
            }
            Err(e) => {
                return Err(OrchestratorError::io(
                    format!("read {}", self.template_path.display()),
                    e,
                ));
            }
        };
        let value: Value = serde_yaml::from_str(&text)?;
        Ok(match value {
            Value::Null => Value::Mapping(Mapping::new()),
            other => other,
        })
    }

    /// 読み込み、merge して `<config dir>/<taskId>.yaml` に書く
    pub async fn synthesize(
        &self,
        input: SynthesisInput<'_>,
    ) -> Result<SynthesizedConfig, OrchestratorError> {
        let template = self.load_template().await?;
        let document = merge(template, &input)?;

        let config_file = input
            .paths
            .config_dir
            .join(format!("{}.yaml", input.task_id));
        let text = serde_yaml::to_string(&document)?;
        tokio::fs::write(&config_file, text)
            .await
            .map_err(|e| OrchestratorError::io(format!("write {}", config_file.display()), e))?;

        let env = environment(&document, &config_file, input.paths);
        debug!(task_id = %input.task_id, file = %config_file.display(), "run configuration written");
        Ok(SynthesizedConfig {
            config_file,
            document,
            env,
        })
    }
}

/// リクエストをテンプレートに重ねる
pub fn merge(template: Value, input: &SynthesisInput<'_>) -> Result<Value, OrchestratorError> {
    let Value::Mapping(mut root) = template else {
        return Err(OrchestratorError::Validation(
            "config template must be a YAML mapping".into(),
        ));
    };
    let o = input.overrides;

    root.insert("task_id".into(), input.task_id.as_str().into());
    overlay(&mut root, "iter_num", o.iter_num.map(Value::from), DEFAULT_ITER_NUM.into());

    let random = group(&mut root, "random")?;
    overlay(random, "seed", o.random.seed.map(Value::from), DEFAULT_RANDOM_SEED.into());
    overlay(random, "prob", o.random.prob.map(Value::from), DEFAULT_RANDOM_PROB.into());

    let warm = group(&mut root, "warm_start")?;
    overlay(warm, "strategy", o.warm_start.strategy.clone().map(Value::from), STRATEGY_NONE.into());
    overlay(warm, "num", o.warm_start.num.map(Value::from), DEFAULT_WARM_START_NUM.into());

    let transfer = group(&mut root, "transfer_learning")?;
    overlay(
        transfer,
        "strategy",
        o.transfer_learning.strategy.clone().map(Value::from),
        STRATEGY_NONE.into(),
    );
    overlay(
        transfer,
        "max_sources",
        o.transfer_learning.max_sources.map(Value::from),
        DEFAULT_MAX_SOURCES.into(),
    );

    let compression = group(&mut root, "compression")?;
    overlay(
        compression,
        "strategy",
        o.compression.strategy.clone().map(Value::from),
        STRATEGY_NONE.into(),
    );
    overlay(compression, "top_k", o.compression.top_k.map(Value::from), DEFAULT_TOP_K.into());
    overlay(
        compression,
        "top_ratio",
        o.compression.top_ratio.map(Value::from),
        DEFAULT_TOP_RATIO.into(),
    );

    let scheduler = group(&mut root, "scheduler")?;
    overlay(
        scheduler,
        "min_resource",
        o.scheduler.min_resource.map(Value::from),
        DEFAULT_MIN_RESOURCE.into(),
    );
    overlay(
        scheduler,
        "max_resource",
        o.scheduler.max_resource.map(Value::from),
        DEFAULT_MAX_RESOURCE.into(),
    );
    overlay(scheduler, "eta", o.scheduler.eta.map(Value::from), DEFAULT_ETA.into());

    // 解決済みディレクトリは常にテンプレートより優先
    let paths = group(&mut root, "paths")?;
    paths.insert("history_dir".into(), path_value(&input.paths.history_dir));
    paths.insert("data_dir".into(), path_value(&input.paths.data_dir));
    paths.insert("save_dir".into(), path_value(&input.paths.save_dir));
    paths.insert("log_dir".into(), path_value(&input.paths.log_dir));

    let space = group(&mut root, "space")?;
    overlay(
        space,
        "history_file",
        input.history_file.map(path_value),
        Value::Null,
    );
    overlay(
        space,
        "output_dir",
        Some(path_value(&input.paths.save_dir)),
        Value::Null,
    );

    Ok(Value::Mapping(root))
}

/// 子プロセス用の環境変数の上書き
pub fn environment(
    document: &Value,
    config_file: &Path,
    paths: &ResolvedPaths,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let mut put = |key: &str, value: Option<String>| {
        if let Some(value) = value {
            env.insert(key.to_string(), value);
        }
    };

    put(ENV_TASK_ID, scalar(document.get("task_id")));
    put(ENV_CONFIG_FILE, Some(config_file.display().to_string()));
    put(ENV_ITER_NUM, scalar(document.get("iter_num")));
    put(ENV_HISTORY_DIR, Some(paths.history_dir.display().to_string()));
    put(ENV_DATA_DIR, Some(paths.data_dir.display().to_string()));
    put(ENV_SAVE_DIR, Some(paths.save_dir.display().to_string()));
    put(ENV_LOG_DIR, Some(paths.log_dir.display().to_string()));

    let compression = document.get("compression");
    put(
        ENV_COMPRESS_STRATEGY,
        scalar(compression.and_then(|c| c.get("strategy"))),
    );
    put(
        ENV_COMPRESS_TOPK,
        scalar(compression.and_then(|c| c.get("top_k"))),
    );
    env
}

/// `key` のサブマッピング。無いか null なら作る。
fn group<'a>(root: &'a mut Mapping, key: &str) -> Result<&'a mut Mapping, OrchestratorError> {
    let slot = root
        .entry(Value::from(key))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if slot.is_null() {
        *slot = Value::Mapping(Mapping::new());
    }
    slot.as_mapping_mut().ok_or_else(|| {
        OrchestratorError::Validation(format!("config template key `{key}` must be a mapping"))
    })
}

fn overlay(map: &mut Mapping, key: &str, value: Option<Value>, default: Value) {
    match value {
        Some(value) => {
            map.insert(key.into(), value);
        }
        None => {
            let missing = map.get(key).is_none_or(Value::is_null);
            if missing {
                map.insert(key.into(), default);
            }
        }
    }
}

fn path_value(path: &Path) -> Value {
    Value::from(path.display().to_string())
}

fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "\
iter_num: 100
random:
  seed: 7
warm_start:
  strategy: none
compression:
  strategy: shap
  top_k: 10
extra:
  keep: me
";

    fn paths(base: &Path) -> ResolvedPaths {
        ResolvedPaths {
            history_dir: base.join("history"),
            data_dir: base.join("data"),
            save_dir: base.join("result"),
            log_dir: base.join("log/t-1"),
            config_dir: base.join("config"),
        }
    }

    fn template() -> Value {
        serde_yaml::from_str(TEMPLATE).unwrap()
    }

    #[test]
    fn template_values_survive_when_not_overridden() {
        let id = TaskId::parse("t-1").unwrap();
        let overrides = TuningOverrides::default();
        let p = paths(Path::new("/w"));
        let doc = merge(
            template(),
            &SynthesisInput {
                task_id: &id,
                overrides: &overrides,
                paths: &p,
                history_file: None,
            },
        )
        .unwrap();

        assert_eq!(doc["iter_num"], Value::from(100u32));
        assert_eq!(doc["random"]["seed"], Value::from(7u64));
        assert_eq!(doc["compression"]["strategy"], Value::from("shap"));
        assert_eq!(doc["extra"]["keep"], Value::from("me"));
    }

    #[test]
    fn overrides_win_then_defaults_fill_gaps() {
        let id = TaskId::parse("t-1").unwrap();
        let mut overrides = TuningOverrides::default();
        overrides.iter_num = Some(10);
        overrides.compression.top_k = Some(3);
        overrides.warm_start.strategy = Some("best".into());
        let p = paths(Path::new("/w"));
        let doc = merge(
            template(),
            &SynthesisInput {
                task_id: &id,
                overrides: &overrides,
                paths: &p,
                history_file: Some(Path::new("/w/history/t-1.json")),
            },
        )
        .unwrap();

        assert_eq!(doc["iter_num"], Value::from(10u32));
        assert_eq!(doc["compression"]["top_k"], Value::from(3u32));
        assert_eq!(doc["warm_start"]["strategy"], Value::from("best"));
        // 上書きもテンプレートの値も無い
        assert_eq!(doc["random"]["prob"], Value::from(DEFAULT_RANDOM_PROB));
        assert_eq!(doc["scheduler"]["max_resource"], Value::from(DEFAULT_MAX_RESOURCE));
        assert_eq!(doc["transfer_learning"]["strategy"], Value::from("none"));
        assert_eq!(doc["paths"]["log_dir"], Value::from("/w/log/t-1"));
        assert_eq!(doc["space"]["history_file"], Value::from("/w/history/t-1.json"));
        assert_eq!(doc["task_id"], Value::from("t-1"));
    }

    #[test]
    fn merge_is_deterministic() {
        let id = TaskId::parse("t-1").unwrap();
        let mut overrides = TuningOverrides::default();
        overrides.random.prob = Some(0.25);
        overrides.scheduler.eta = Some(4);
        let p = paths(Path::new("/w"));
        let input = SynthesisInput {
            task_id: &id,
            overrides: &overrides,
            paths: &p,
            history_file: None,
        };

        let a = serde_yaml::to_string(&merge(template(), &input).unwrap()).unwrap();
        let b = serde_yaml::to_string(&merge(template(), &input).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn non_mapping_group_is_rejected() {
        let id = TaskId::parse("t-1").unwrap();
        let overrides = TuningOverrides::default();
        let p = paths(Path::new("/w"));
        let bad: Value = serde_yaml::from_str("random: 5").unwrap();
        let err = merge(
            bad,
            &SynthesisInput {
                task_id: &id,
                overrides: &overrides,
                paths: &p,
                history_file: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[test]
    fn environment_mirrors_hot_settings() {
        let p = paths(Path::new("/w"));
        let doc: Value = serde_yaml::from_str(
            "task_id: t-1\niter_num: 10\ncompression:\n  strategy: shap\n  top_k: 5\n",
        )
        .unwrap();
        let env = environment(&doc, Path::new("/w/config/t-1.yaml"), &p);

        assert_eq!(env[ENV_ITER_NUM], "10");
        assert_eq!(env[ENV_COMPRESS_STRATEGY], "shap");
        assert_eq!(env[ENV_COMPRESS_TOPK], "5");
        assert_eq!(env[ENV_LOG_DIR], "/w/log/t-1");
        assert_eq!(env[ENV_CONFIG_FILE], "/w/config/t-1.yaml");
        assert_eq!(env[ENV_TASK_ID], "t-1");
    }

    #[tokio::test]
    async fn missing_template_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let synth = ConfigSynthesizer::new(tmp.path().join("nope.yaml"));
        let err = synth.load_template().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn synthesize_writes_task_scoped_file() {
        let tmp = tempfile::tempdir().unwrap();
        let template_path = tmp.path().join("template.yaml");
        std::fs::write(&template_path, TEMPLATE).unwrap();
        let p = paths(tmp.path());
        std::fs::create_dir_all(&p.config_dir).unwrap();

        let id = TaskId::parse("t-1").unwrap();
        let overrides = TuningOverrides::default();
        let synth = ConfigSynthesizer::new(&template_path);
        let out = synth
            .synthesize(SynthesisInput {
                task_id: &id,
                overrides: &overrides,
                paths: &p,
                history_file: None,
            })
            .await
            .unwrap();

        assert_eq!(out.config_file, p.config_dir.join("t-1.yaml"));
        let written: Value =
            serde_yaml::from_str(&std::fs::read_to_string(&out.config_file).unwrap()).unwrap();
        assert_eq!(written, out.document);
        assert_eq!(out.env[ENV_ITER_NUM], "100");
    }

    #[tokio::test]
    async fn empty_template_gets_all_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let template_path = tmp.path().join("template.yaml");
        std::fs::write(&template_path, "").unwrap();
        let synth = ConfigSynthesizer::new(&template_path);
        assert_eq!(synth.load_template().await.unwrap(), Value::Mapping(Mapping::new()));
    }
}
