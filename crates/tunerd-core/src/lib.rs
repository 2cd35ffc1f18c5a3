//! tunerd-core
//!
//! チューニング実行のタスクオーケストレーションとライブログ配信。
//!
//! # モジュール
//! - **domain**: ID、タスクレコードと状態機械、起動リクエスト、ログ行、ライブチャネルのメッセージ、エラー
//! - **ports**: Clock, IdGenerator, TaskStore, EventSink
//! - **app**: パス解決、設定ファイル合成、プロセス監視、配信、ライフサイクル、builder
//! - **impls**: JSON ファイル / インメモリの TaskStore
//! - **settings**: YAML のサーバー設定

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod settings;

pub use self::app::{Orchestrator, OrchestratorBuilder};
pub use self::settings::Settings;
