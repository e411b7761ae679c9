use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use tandem_core::{ClientEnvelope, ProtocolError};
use tracing::{debug, info, warn};

use crate::{connection::ConnectionId, relay::Relay, AppState};

/// WebSocket upgrade handler for the relay protocol.
pub async fn websocket_handler(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);
    let relay = state.relay.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, relay, remote_addr))
}

async fn handle_socket(socket: WebSocket, relay: Relay, remote_addr: Option<SocketAddr>) {
    let (handle, mut rx) = relay.connect();
    let connection_id = handle.id();
    let overflow = handle.overflow_signal();
    drop(handle);
    let (mut ws_tx, mut ws_rx) = socket.split();

    info!(
        connection_id = %connection_id,
        remote_addr = ?remote_addr,
        "relay connection established"
    );

    let writer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let payload = match envelope.to_json() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(
                        connection_id = %connection_id,
                        error = %err,
                        "failed to encode envelope"
                    );
                    continue;
                }
            };
            if ws_tx.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
        debug!(connection_id = %connection_id, "writer task finished");
    });

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            _ = overflow.notified() => {
                warn!(connection_id = %connection_id, "closing connection that fell behind");
                break;
            }
        };
        let Some(frame) = frame else {
            break;
        };
        match frame {
            Ok(Message::Text(text)) => {
                handle_envelope(&relay, connection_id, ClientEnvelope::from_text(&text));
            }
            Ok(Message::Binary(bytes)) => {
                handle_envelope(&relay, connection_id, ClientEnvelope::from_bytes(&bytes));
            }
            Ok(Message::Close(frame)) => {
                debug!(
                    connection_id = %connection_id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                break;
            }
            Ok(_) => continue,
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "error receiving frame");
                break;
            }
        }
    }

    let released = relay.disconnect(connection_id);
    writer.abort();

    info!(
        connection_id = %connection_id,
        memberships_released = released,
        "relay connection closed"
    );
}

fn handle_envelope(
    relay: &Relay,
    connection_id: ConnectionId,
    decoded: Result<ClientEnvelope, ProtocolError>,
) {
    let envelope = match decoded {
        Ok(envelope) => envelope,
        Err(err) => {
            counter!(
                "tandem_relay_envelope_rejected_total",
                1,
                "reason" => err.metric_label()
            );
            warn!(connection_id = %connection_id, error = %err, "dropping undecodable frame");
            return;
        }
    };

    let kind = envelope.kind();
    match relay.dispatch(connection_id, envelope) {
        Ok(outcome) => {
            debug!(connection_id = %connection_id, kind, ?outcome, "envelope handled");
        }
        Err(err) => {
            counter!(
                "tandem_relay_envelope_rejected_total",
                1,
                "reason" => err.metric_label()
            );
            warn!(connection_id = %connection_id, kind, error = %err, "envelope rejected");
        }
    }
}
