//! Media-stream WebSocket lifecycle: ingress, dispatch, and egress wiring.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use voxbridge_core::protocol::TransportEvent;

use crate::dispatch::{spawn_synthesis_pump, Dispatcher};
use crate::state::GatewayState;

/// Handle one media-stream connection end to end.
///
/// Three loops per connection: the ingress task reads and decodes frames
/// into an unbounded queue (never blocking on downstream work), the
/// dispatcher consumes the queue sequentially, and the writer task drains
/// outbound frames to the socket.
pub async fn handle_media_stream(state: Arc<GatewayState>, ws: WebSocket) {
    info!("Media stream connected");

    let (mut ws_tx, mut ws_rx) = ws.split();

    // Outbound frames (media/mark/clear) from any component.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let (dispatcher, segment_rx) = Dispatcher::new(state.clone(), out_tx);
    spawn_synthesis_pump(state, dispatcher.sequencer(), segment_rx);

    // Ingress: decode and enqueue. Malformed or unknown events are logged
    // and skipped, never fatal.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();
    let ingress = tokio::spawn(async move {
        while let Some(message) = ws_rx.next().await {
            match message {
                Ok(Message::Text(text)) => match TransportEvent::parse(&text) {
                    Ok(event) => {
                        if event_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!(%e, "Skipping transport frame"),
                },
                Ok(Message::Close(_)) => {
                    debug!("Transport closed the stream");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(%e, "Media stream socket error");
                    break;
                }
            }
        }
    });

    dispatcher.run(event_rx).await;

    ingress.abort();
    writer.abort();
    info!("Media stream closed");
}
