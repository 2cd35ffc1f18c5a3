//! App - port の上に構築したサービス群
//!
//! # コンポーネント
//! - **PathResolver**: 実行ごとのディレクトリ構成
//! - **ConfigSynthesizer**: テンプレート + 上書き -> `<taskId>.yaml` と環境変数
//! - **ProcessSupervisor**: 起動、出力をディスクと sink に分岐、終了結果
//! - **LogBroadcaster**: 購読レジストリとライブ viewer への配信
//! - **StreamClassifier**: 境界での任意の stderr 付け替え
//! - **TaskLifecycleManager**: 上記すべての上の起動 / 状態 / 一覧
//! - **OrchestratorBuilder**: `Settings` からの組み立て

pub mod broadcaster;
pub mod builder;
pub mod classifier;
pub mod config;
pub mod lifecycle;
pub mod paths;
pub mod supervisor;

pub use self::broadcaster::{LogBroadcaster, ViewerReceiver};
pub use self::builder::{Orchestrator, OrchestratorBuilder};
pub use self::classifier::StreamClassifier;
pub use self::config::{ConfigSynthesizer, SynthesizedConfig};
pub use self::lifecycle::{LaunchReceipt, LauncherSpec, TaskLifecycleManager, TaskStatusView};
pub use self::paths::{PathResolver, ResolvedPaths, StorageRoots};
pub use self::supervisor::{ProcessSpec, ProcessSupervisor, SupervisedProcess};
