//! WebSocket event stream.
//!
//! On connect, the client optionally presents its last-seen sequence number
//! (`?since=`); every retained event after it is replayed before live
//! delivery starts. A subscriber that falls behind the broadcast buffer is
//! closed with a `lagged` reason and is expected to re-sync over REST.

use crate::state::SharedState;
use aegis_core::Event;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

/// Application close code for backpressure disconnects.
const LAGGED_CLOSE_CODE: u16 = 4000;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub since: Option<u64>,
}

pub async fn upgrade(
    State(state): State<SharedState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| stream_events(socket, state, query.since))
}

async fn stream_events(socket: WebSocket, state: SharedState, since: Option<u64>) {
    let (backfill, mut receiver) = state.notifier.subscribe(since);
    let (mut sink, mut stream) = socket.split();
    info!(
        backfill = backfill.len(),
        clients = state.notifier.subscriber_count(),
        "event subscriber connected"
    );

    for event in &backfill {
        if send_event(&mut sink, event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Ok(event) => {
                    if send_event(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "subscriber lagged, disconnecting");
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: LAGGED_CLOSE_CODE,
                            reason: "lagged".into(),
                        })))
                        .await;
                    break;
                }
                Err(RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                // Clients may ping to keep the connection alive; anything
                // else from them is ignored.
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }

    info!("event subscriber disconnected");
}

async fn send_event(sink: &mut SplitSink<WebSocket, Message>, event: &Event) -> Result<(), ()> {
    let payload = serde_json::to_string(event).map_err(|_| ())?;
    sink.send(Message::Text(payload)).await.map_err(|_| ())
}
