// WebSocket connector
//
// Each connection gets a pump task that owns the socket: it drains the
// outbound queue into binary messages and forwards inbound messages into the
// link. The socket is closed and dropped when the pump exits, which happens
// when the local side drops its outbound sender, the remote side closes, or
// the socket errors. Either way the inbound sequence ends with `Closed`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::connection::NORMAL_CLOSURE;
use super::link::{link_pair, CloseInfo, Connector, ControlMessage, Inbound, Link, LinkPeer};
use crate::error::TransportError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections carrying binary PCM frames
pub struct WebSocketConnector {
    queue_frames: usize,
}

impl WebSocketConnector {
    /// `queue_frames` bounds each direction's in-flight frame queue
    pub fn new(queue_frames: usize) -> Self {
        Self { queue_frames }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<Link, TransportError> {
        let (socket, response) =
            connect_async(endpoint)
                .await
                .map_err(|e| TransportError::ConnectFailure {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                })?;

        debug!("WebSocket handshake complete (status {})", response.status());

        let (link, peer) = link_pair(self.queue_frames);
        tokio::spawn(pump(socket, peer));

        Ok(link)
    }
}

async fn pump(socket: Socket, mut peer: LinkPeer) {
    let (mut sink, mut stream) = socket.split();

    let close = loop {
        tokio::select! {
            outbound = peer.outbound.recv() => match outbound {
                Some(payload) => {
                    if let Err(e) = sink.send(Message::Binary(payload.into())).await {
                        warn!("WebSocket send failed: {}", e);
                        break CloseInfo { code: None, reason: e.to_string() };
                    }
                }
                None => {
                    debug!("Outbound queue dropped, closing WebSocket");
                    if let Err(e) = sink.close().await {
                        debug!("WebSocket close handshake failed: {}", e);
                    }
                    break CloseInfo {
                        code: Some(NORMAL_CLOSURE),
                        reason: "closed by client".to_string(),
                    };
                }
            },

            message = stream.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    if peer.inbound.send(Inbound::Audio(data.to_vec())).await.is_err() {
                        debug!("Inbound consumer gone, closing WebSocket");
                        let _ = sink.close().await;
                        break CloseInfo::default();
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ControlMessage>(text.as_str()) {
                        Ok(control) => {
                            if peer.inbound.send(Inbound::Control(control)).await.is_err() {
                                let _ = sink.close().await;
                                break CloseInfo::default();
                            }
                        }
                        Err(_) => debug!("Ignoring text message: {}", text.as_str()),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => CloseInfo {
                            code: Some(u16::from(frame.code)),
                            reason: frame.reason.as_str().to_string(),
                        },
                        None => CloseInfo::default(),
                    };
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket receive failed: {}", e);
                    break CloseInfo { code: None, reason: e.to_string() };
                }
                None => break CloseInfo::default(),
            },
        }
    };

    info!(
        "WebSocket closed (code={:?}, reason={:?})",
        close.code, close.reason
    );

    // Consumer may already be gone
    let _ = peer.inbound.send(Inbound::Closed(close)).await;
}
