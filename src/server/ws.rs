use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.ws_tx.subscribe();

    // Initial snapshot so the client can render trades, balance and bookings
    let initial = {
        let snapshot = state.snapshot_rx.borrow().clone();
        serde_json::to_value(&snapshot).map(|mut v| {
            v["type"] = serde_json::Value::from("snapshot");
            v
        })
    };
    if let Ok(json) = initial {
        if sender.send(Message::Text(json.to_string().into())).await.is_err() {
            return;
        }
    }

    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ws_msg) => {
                    let Ok(json) = serde_json::to_string(&ws_msg) else {
                        continue;
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                // Slow client: skip what it missed, keep streaming
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "ws client lagging");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Read (and discard) incoming messages; detect disconnect
    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    run_until_first_exits(send_task, recv_task).await;
}

/// Wait for either half of the connection to finish, then abort the other.
async fn run_until_first_exits(mut a: JoinHandle<()>, mut b: JoinHandle<()>) {
    tokio::select! {
        _ = &mut a => b.abort(),
        _ = &mut b => a.abort(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_finished_half_aborts_the_other() {
        let (guard_tx, guard_rx) = oneshot::channel::<()>();
        let forwarder = tokio::spawn(async move {
            let _guard = guard_tx;
            std::future::pending::<()>().await;
        });
        let reader = tokio::spawn(async {});

        run_until_first_exits(forwarder, reader).await;

        // the forwarder was dropped, taking its sender with it
        assert!(guard_rx.await.is_err());
    }
}
