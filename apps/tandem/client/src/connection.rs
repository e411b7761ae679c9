use std::time::Duration;

use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tandem_core::{ClientEnvelope, ServerEnvelope};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::{error::ClientError, messenger::EnvelopeSink};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// WebSocket connection to a relay, split into an outbound envelope channel
/// and a stream of decoded inbound envelopes.
pub struct RelayClient {
    outbound: mpsc::UnboundedSender<ClientEnvelope>,
    inbound: mpsc::UnboundedReceiver<ServerEnvelope>,
    shutdown: oneshot::Sender<()>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl RelayClient {
    /// Connect to a relay endpoint such as `ws://localhost:9090/ws`.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (stream, _) = timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| ClientError::ConnectTimeout)?
            .map_err(ClientError::Connect)?;
        debug!(url, "connected to relay");
        let (mut ws_tx, mut ws_rx) = stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientEnvelope>();
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();
        let writer = tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    biased;
                    next = outbound_rx.recv() => match next {
                        Some(envelope) => envelope,
                        None => break,
                    },
                    _ = &mut shutdown_rx => break,
                };
                if send_envelope(&mut ws_tx, envelope).await.is_err() {
                    return;
                }
            }
            while let Ok(envelope) = outbound_rx.try_recv() {
                if send_envelope(&mut ws_tx, envelope).await.is_err() {
                    return;
                }
            }
            let _ = ws_tx.send(Message::Close(None)).await;
        });

        let (inbound_tx, inbound) = mpsc::unbounded_channel::<ServerEnvelope>();
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                let decoded = match frame {
                    Ok(Message::Text(text)) => ServerEnvelope::from_text(text.as_str()),
                    Ok(Message::Binary(bytes)) => ServerEnvelope::from_bytes(&bytes),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        debug!(error = %err, "relay stream ended with error");
                        break;
                    }
                };
                match decoded {
                    Ok(envelope) => {
                        if inbound_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(err) => debug!(error = %err, "dropping undecodable relay frame"),
                }
            }
        });

        Ok(Self {
            outbound,
            inbound,
            shutdown,
            writer,
            reader,
        })
    }

    /// A cloneable sink for [`crate::SessionMessenger`].
    pub fn sender(&self) -> mpsc::UnboundedSender<ClientEnvelope> {
        self.outbound.clone()
    }

    pub fn send(&self, envelope: ClientEnvelope) -> Result<(), ClientError> {
        self.outbound.send(envelope).map_err(|_| ClientError::Closed)
    }

    /// Next envelope from the relay, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<ServerEnvelope> {
        self.inbound.recv().await
    }

    /// Like [`Self::recv`] but gives up after `wait`.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Option<ServerEnvelope> {
        timeout(wait, self.inbound.recv()).await.ok().flatten()
    }

    /// Flush queued envelopes, send a close frame and stop both tasks.
    pub async fn close(self) {
        let Self {
            shutdown,
            writer,
            reader,
            ..
        } = self;
        let _ = shutdown.send(());
        let _ = writer.await;
        reader.abort();
    }
}

impl EnvelopeSink for RelayClient {
    fn send_envelope(&mut self, envelope: ClientEnvelope) -> Result<(), ClientError> {
        self.send(envelope)
    }
}

async fn send_envelope(
    ws_tx: &mut WsSink,
    envelope: ClientEnvelope,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    match envelope.to_json() {
        Ok(payload) => ws_tx.send(Message::Text(payload.into())).await,
        Err(err) => {
            warn!(error = %err, "failed to encode envelope");
            Ok(())
        }
    }
}
