//! Resilient binary-frame transport
//!
//! - `link`: the channel pair between a socket owner and the rest of the engine
//! - `connection`: `Transport`, the single live connection and its state
//! - `websocket`: tokio-tungstenite connector
//! - `reconnect`: backoff supervisor that keeps the transport connected

pub mod connection;
pub mod link;
pub mod reconnect;
pub mod websocket;

pub use connection::{
    ConnectionState, FrameStream, Received, Transport, TransportEvent, NORMAL_CLOSURE,
};
pub use link::{link_pair, CloseInfo, Connector, ControlMessage, Inbound, Link, LinkPeer};
pub use reconnect::{
    InboundHandler, ReconnectPolicy, ReconnectState, ReconnectSupervisor, SupervisorExit,
    SupervisorState,
};
pub use websocket::WebSocketConnector;
