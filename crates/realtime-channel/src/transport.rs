//! Socket transport behind the channel.

use crate::{ChannelError, ChannelResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

const INBOUND_CAPACITY: usize = 256;

/// Frame written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    /// Keepalive. WebSocket servers answer with a pong.
    Ping,
    Close,
}

/// Event read from the socket. `Closed` and `Error` end the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(String),
    /// Control frame from the server. Carries nothing but liveness.
    Heartbeat,
    Closed(Option<String>),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    pub bearer: Option<String>,
}

/// An open socket as a pair of channels.
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens sockets.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: ConnectRequest) -> ChannelResult<Connection>;
}

/// tokio-tungstenite connector with the bearer token in the handshake.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, request: ConnectRequest) -> ChannelResult<Connection> {
        let mut ws_request = request.url.as_str().into_client_request()?;
        if let Some(token) = &request.bearer {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ChannelError::Connection(e.to_string()))?;
            ws_request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _) = connect_async(ws_request).await?;
        let (mut write, mut read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(INBOUND_CAPACITY);

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                match frame {
                    Outbound::Text(text) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            warn!(error = %e, "WebSocket write failed");
                            break;
                        }
                    }
                    Outbound::Ping => {
                        if let Err(e) = write.send(Message::Ping(Default::default())).await {
                            warn!(error = %e, "WebSocket ping failed");
                            break;
                        }
                    }
                    Outbound::Close => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            let _ = write.close().await;
            debug!("WebSocket writer stopped");
        });

        tokio::spawn(async move {
            while let Some(item) = read.next().await {
                let event = match item {
                    Ok(Message::Text(text)) => TransportEvent::Message(text.to_string()),
                    Ok(Message::Close(frame)) => {
                        let reason = frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                        let _ = in_tx.send(TransportEvent::Closed(reason)).await;
                        return;
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => TransportEvent::Heartbeat,
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(TransportEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                if in_tx.send(event).await.is_err() {
                    return;
                }
            }
            let _ = in_tx.send(TransportEvent::Closed(None)).await;
        });

        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
