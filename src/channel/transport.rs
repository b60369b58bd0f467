use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use super::protocol::{ClientFrame, ServerFrame};
use crate::error::ChannelError;

/// One live connection. Frames go out through `outgoing`; frames come in on
/// `incoming`. The transport signals disconnect by closing `incoming`, and
/// dropping `outgoing` tears the connection down.
pub struct Connection {
    pub outgoing: mpsc::UnboundedSender<ClientFrame>,
    pub incoming: mpsc::UnboundedReceiver<ServerFrame>,
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Connection, ChannelError>;
}

/// JSON-over-websocket transport. A pair of spawned tasks owns the stream
/// halves and bridges them onto the channel pair.
#[derive(Default)]
pub struct WebSocketTransport;

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    async fn connect(&self, url: &Url) -> Result<Connection, ChannelError> {
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))?;
        let (mut sink, mut stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerFrame>();

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(%err, "failed to encode outgoing frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => {
                            if in_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(%err, "unrecognized frame from server"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        debug!(%err, "websocket read failed");
                        break;
                    }
                }
            }
            // in_tx drops here; the client observes the closed channel
        });

        Ok(Connection {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
