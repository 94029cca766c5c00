use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Control message sent by the remote endpoint as a text frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// The user barged in; drop queued speech
    Stop,
}

/// Why a connection ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: Option<u16>,
    pub reason: String,
}

/// Traffic arriving from the remote endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One binary frame of little-endian PCM
    Audio(Vec<u8>),
    Control(ControlMessage),
    /// Last item before the inbound sequence terminates
    Closed(CloseInfo),
}

/// Local end of one live connection
///
/// Dropping `outbound` tells the owner of the socket to close it.
pub struct Link {
    pub outbound: mpsc::Sender<Vec<u8>>,
    pub inbound: mpsc::Receiver<Inbound>,
}

/// Far end of a `Link`, held by whatever owns the socket
pub struct LinkPeer {
    pub outbound: mpsc::Receiver<Vec<u8>>,
    pub inbound: mpsc::Sender<Inbound>,
}

/// Create a connected `Link`/`LinkPeer` pair with `capacity` frames per direction
pub fn link_pair(capacity: usize) -> (Link, LinkPeer) {
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity.max(1));

    (
        Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        },
        LinkPeer {
            outbound: outbound_rx,
            inbound: inbound_tx,
        },
    )
}

/// Opens binary-frame connections to an endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Link, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_message_json() {
        let msg: ControlMessage = serde_json::from_str(r#"{"type":"stop"}"#).unwrap();
        assert_eq!(msg, ControlMessage::Stop);
        assert_eq!(serde_json::to_string(&msg).unwrap(), r#"{"type":"stop"}"#);
    }

    #[test]
    fn test_unknown_control_message_rejected() {
        assert!(serde_json::from_str::<ControlMessage>(r#"{"type":"transcript"}"#).is_err());
    }

    #[tokio::test]
    async fn test_link_pair_carries_both_directions() {
        let (mut link, mut peer) = link_pair(4);

        link.outbound.send(vec![1, 2]).await.unwrap();
        assert_eq!(peer.outbound.recv().await, Some(vec![1, 2]));

        peer.inbound.send(Inbound::Audio(vec![3, 4])).await.unwrap();
        assert_eq!(link.inbound.recv().await, Some(Inbound::Audio(vec![3, 4])));

        drop(link);
        assert_eq!(peer.outbound.recv().await, None);
    }
}
