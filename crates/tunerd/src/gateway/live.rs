//! `/ws` ライブチャネル
//!
//! 接続ごとにタスク 1 つ: クライアントのフレームを `ClientMessage` にパースして
//! broadcaster に適用し、broadcaster がこの viewer 宛てに積んだものはすべて
//! JSON のテキストフレームとして書き戻す。

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tracing::{debug, warn};
use tunerd_core::app::LogBroadcaster;
use tunerd_core::domain::{ClientMessage, ErrorNotice, ServerMessage, TaskRef, ViewerId};

use super::AppState;

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_viewer(socket, state))
}

async fn serve_viewer(mut socket: WebSocket, state: AppState) {
    let broadcaster = &state.orchestrator.broadcaster;
    let (viewer, mut outbox) = broadcaster.connect().await;

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => apply(broadcaster, viewer, &text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(%viewer, error = %e, "socket error");
                    break;
                }
            },
            outgoing = outbox.recv() => {
                let Some(message) = outgoing else { break };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(%viewer, error = %e, "could not encode message");
                        continue;
                    }
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    }

    broadcaster.disconnect(viewer).await;
}

/// クライアントのフレームを 1 つ適用。パースできないものにはこの viewer だけに `error` を返す。
pub(crate) async fn apply(broadcaster: &LogBroadcaster, viewer: ViewerId, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::SubscribeTask(TaskRef { task_id })) => {
            broadcaster.subscribe(task_id, viewer).await;
        }
        Ok(ClientMessage::UnsubscribeTask(TaskRef { task_id })) => {
            broadcaster.unsubscribe(task_id, viewer).await;
        }
        Err(e) => {
            debug!(%viewer, error = %e, "malformed client message");
            broadcaster
                .send_to(
                    viewer,
                    ServerMessage::Error(ErrorNotice {
                        message: format!("malformed message: {e}"),
                    }),
                )
                .await;
        }
    }
}
