//! MQTT 3.1.1 session over a message-oriented transport
//!
//! Pure functions are kept apart from I/O so that most of the session can be
//! tested without a network:
//!
//! - [`packet`] and [`codec`] - control packet types and the wire codec
//! - [`connection`] - the connection state machine and its configuration
//! - [`health_monitor`] - reconnection decisions and health assessment
//! - [`message_handler`] - packet routing and PUBLISH dispatch
//! - [`dedup`] - duplicate notification suppression
//! - [`client`] - the I/O supervisor tying them together
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use works_notify::config::WorksConfig;
//! use works_notify::protocol::WorksMessage;
//! use works_notify::transport::mqtt::WorksClient;
//! use works_notify::transport::websocket::WebSocketConnector;
//!
//! # tokio_test::block_on(async {
//! let mut client = WorksClient::new(
//!     WorksConfig::default(),
//!     Arc::new(WebSocketConnector::new()),
//!     |message: WorksMessage| println!("{}: {:?}", message.message_type, message.text),
//! )?
//! .with_cookie_header("NEO_SES=...");
//!
//! client.start();
//! client.wait().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod codec;
pub mod connection;
pub mod dedup;
pub mod health_monitor;
pub mod message_handler;
pub mod packet;

pub use client::{ClientHealth, WorksClient};
pub use codec::{decode, encode, encode_to_bytes, PacketBuffer, PacketError};
pub use connection::{
    BackoffPolicy, ConnectionState, ConnectionStateMachine, Credentials, KeepaliveAction,
    ReconnectConfig, SessionSettings,
};
pub use dedup::MessageDeduplicator;
pub use health_monitor::{
    ConnectionEvent, ConnectionQuality, HealthMetrics, HealthMonitor, ReconnectionDecision,
};
pub use message_handler::{
    route_packet, DispatchStats, MessageHandler, PacketRoute, PublishDispatcher,
};
pub use packet::{ConnAck, Connect, ConnectReturnCode, Packet, PacketType, Publish, QoS};
