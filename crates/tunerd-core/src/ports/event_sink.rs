//! EventSink port - ログ行と状態遷移の送り先
//!
//! # 実装
//! - `LogBroadcaster`: ライブ viewer への配信（app::broadcaster）
//! - `NoopEventSink`: すべて捨てる（ヘッドレス実行、テスト）
//!
//! 呼び出し側から見て publish は失敗しない。viewer が消えたときの後始末は
//! sink の責務で、supervisor の責務ではない。

use async_trait::async_trait;

use crate::domain::{LogLine, StatusUpdate};

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish_log(&self, line: LogLine);

    async fn publish_status(&self, update: StatusUpdate);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn publish_log(&self, _line: LogLine) {}

    async fn publish_status(&self, _update: StatusUpdate) {}
}
