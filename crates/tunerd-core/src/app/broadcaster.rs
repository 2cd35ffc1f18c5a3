//! LogBroadcaster - ログ行と状態遷移をライブ viewer に配信
//!
//! # ルーティング
//! - `publish_log`: そのタスク ID の購読者だけ（購読者がいなければ何もしない）
//! - `publish_status`: 購読者には `task-status`、さらに接続中の全 viewer に
//!   `task-status-broadcast`
//! - subscribe / unsubscribe の応答は要求した viewer だけに返す
//!
//! # 実装の詳細
//! - viewer ごとに有界の mpsc sender。receiver は接続タスクが持つ。
//!   outbox が満杯の viewer は無制限にバッファせず切断する。
//! - 両テーブルを 1 つの async mutex で守るので、タスク ID への追加/削除と
//!   「空集合の刈り取り」は同じクリティカルセクションで起きる。
//! - receiver が消えた（または outbox が満杯の）viewer は、次の送信失敗時に
//!   明示的な切断と同じように削除する。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::domain::{
    ConnectionAck, LogLine, ServerMessage, StatusUpdate, TaskId, TaskRef, ViewerId,
};
use crate::ports::{Clock, EventSink, IdGenerator};

pub type ViewerSender = mpsc::Sender<ServerMessage>;
pub type ViewerReceiver = mpsc::Receiver<ServerMessage>;

/// viewer ごとに溜められるメッセージ数。超えたら滞留とみなす。
pub const DEFAULT_OUTBOX_CAPACITY: usize = 1024;

#[derive(Default)]
struct Registry {
    viewers: HashMap<ViewerId, ViewerSender>,
    subscriptions: HashMap<TaskId, HashSet<ViewerId>>,
}

impl Registry {
    /// viewer を全テーブルから外し、空になったタスクのエントリを刈り取る
    fn drop_viewer(&mut self, viewer: ViewerId) -> bool {
        let known = self.viewers.remove(&viewer).is_some();
        self.subscriptions.retain(|_, set| {
            set.remove(&viewer);
            !set.is_empty()
        });
        known
    }

    fn send_to(&self, viewer: ViewerId, message: ServerMessage) -> bool {
        match self.viewers.get(&viewer) {
            Some(tx) => offer(viewer, tx, message),
            None => false,
        }
    }
}

/// 待たずにキューへ積む。false ならその viewer は切断すべき。
fn offer(viewer: ViewerId, tx: &ViewerSender, message: ServerMessage) -> bool {
    match tx.try_send(message) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(%viewer, "viewer outbox full; dropping viewer");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

pub struct LogBroadcaster {
    registry: Mutex<Registry>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    outbox_capacity: usize,
}

impl LogBroadcaster {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            clock,
            ids,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }

    /// viewer ごとのキュー長（最低 1）
    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity.max(1);
        self
    }

    /// 新しい viewer を登録。receiver の最初のメッセージは接続の ack。
    pub async fn connect(&self) -> (ViewerId, ViewerReceiver) {
        let viewer = self.ids.generate_viewer_id();
        let (tx, rx) = mpsc::channel(self.outbox_capacity);
        let ack = ServerMessage::Connected(ConnectionAck {
            viewer_id: viewer,
            server_time: self.clock.now(),
        });
        // 作ったばかりの channel で容量は 1 以上、receiver も生きている
        let _ = tx.try_send(ack);

        let mut registry = self.registry.lock().await;
        registry.viewers.insert(viewer, tx);
        info!(%viewer, viewers = registry.viewers.len(), "viewer connected");
        (viewer, rx)
    }

    /// viewer とその購読をすべて忘れる
    pub async fn disconnect(&self, viewer: ViewerId) {
        let mut registry = self.registry.lock().await;
        if registry.drop_viewer(viewer) {
            info!(%viewer, viewers = registry.viewers.len(), "viewer disconnected");
        }
    }

    /// `viewer` を `task_id` に購読させる。未知の viewer なら false。
    pub async fn subscribe(&self, task_id: TaskId, viewer: ViewerId) -> bool {
        let mut registry = self.registry.lock().await;
        if !registry.viewers.contains_key(&viewer) {
            return false;
        }
        registry
            .subscriptions
            .entry(task_id.clone())
            .or_default()
            .insert(viewer);
        debug!(%viewer, %task_id, "subscribed");
        if !registry.send_to(viewer, ServerMessage::SubscribeSuccess(TaskRef { task_id })) {
            registry.drop_viewer(viewer);
            return false;
        }
        true
    }

    /// `viewer` の `task_id` 購読を解除。空になったタスクのエントリは刈り取る。
    pub async fn unsubscribe(&self, task_id: TaskId, viewer: ViewerId) -> bool {
        let mut registry = self.registry.lock().await;
        if !registry.viewers.contains_key(&viewer) {
            return false;
        }
        if let Some(set) = registry.subscriptions.get_mut(&task_id) {
            set.remove(&viewer);
            if set.is_empty() {
                registry.subscriptions.remove(&task_id);
            }
        }
        debug!(%viewer, %task_id, "unsubscribed");
        if !registry.send_to(viewer, ServerMessage::UnsubscribeSuccess(TaskRef { task_id })) {
            registry.drop_viewer(viewer);
            return false;
        }
        true
    }

    /// 1 つの viewer にメッセージを送る（gateway からのエラー応答）
    pub async fn send_to(&self, viewer: ViewerId, message: ServerMessage) -> bool {
        let mut registry = self.registry.lock().await;
        let delivered = registry.send_to(viewer, message);
        if !delivered {
            registry.drop_viewer(viewer);
        }
        delivered
    }

    pub async fn has_subscribers(&self, task_id: &TaskId) -> bool {
        self.registry.lock().await.subscriptions.contains_key(task_id)
    }

    pub async fn viewer_count(&self) -> usize {
        self.registry.lock().await.viewers.len()
    }

    /// 購読者が 1 人以上いるタスク ID の数
    pub async fn subscribed_task_count(&self) -> usize {
        self.registry.lock().await.subscriptions.len()
    }

    async fn deliver_log(&self, line: LogLine) {
        let mut registry = self.registry.lock().await;
        let Some(subscribers) = registry.subscriptions.get(&line.task_id) else {
            return;
        };
        let targets: Vec<ViewerId> = subscribers.iter().copied().collect();

        let mut gone = Vec::new();
        for viewer in targets {
            if !registry.send_to(viewer, ServerMessage::TaskLog(line.clone())) {
                gone.push(viewer);
            }
        }
        for viewer in gone {
            registry.drop_viewer(viewer);
        }
    }

    async fn deliver_status(&self, update: StatusUpdate) {
        let mut registry = self.registry.lock().await;
        let subscribers: Vec<ViewerId> = registry
            .subscriptions
            .get(&update.task_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        let mut gone = Vec::new();
        for viewer in subscribers {
            if !registry.send_to(viewer, ServerMessage::TaskStatus(update.clone())) {
                gone.push(viewer);
            }
        }
        for (viewer, tx) in &registry.viewers {
            if !offer(*viewer, tx, ServerMessage::TaskStatusBroadcast(update.clone())) {
                gone.push(*viewer);
            }
        }
        for viewer in gone {
            registry.drop_viewer(viewer);
        }
    }
}

#[async_trait]
impl EventSink for LogBroadcaster {
    async fn publish_log(&self, line: LogLine) {
        self.deliver_log(line).await;
    }

    async fn publish_status(&self, update: StatusUpdate) {
        self.deliver_status(update).await;
    }
}
