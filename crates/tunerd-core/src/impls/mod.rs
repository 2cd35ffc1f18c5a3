//! Impls - port の実装
//!
//! - **JsonFileTaskStore**: 本番用、タスクごとに JSON ファイル 1 つ
//! - **InMemoryTaskStore**: テスト / 組み込み用

pub mod inmem_store;
pub mod json_store;

pub use self::inmem_store::InMemoryTaskStore;
pub use self::json_store::JsonFileTaskStore;
