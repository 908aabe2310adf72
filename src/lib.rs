//! works-notify - LINE WORKS notification client
//!
//! Receives chat notifications from the LINE WORKS push endpoint, which
//! speaks MQTT 3.1.1 over a WebSocket. The crate provides:
//! - the MQTT wire codec and frame reassembly
//! - a connection state machine with keepalive and backoff
//! - payload parsing for notification and relay messages
//! - duplicate suppression and a supervised client with a callback interface
//!
//! # Quick Start
//!
//! ```rust
//! use works_notify::protocol::{MessageParser, MessageType};
//!
//! let payload = br#"{"nType":1,"notification-id":"msg.1","chType":6,"chNo":42}"#;
//! let message = MessageParser::parse(payload).unwrap();
//! assert_eq!(message.message_type, MessageType::Text);
//! assert_eq!(message.channel_id, "42");
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, WorksConfig};
pub use error::{ErrorKind, WorksError, WorksResult};
pub use protocol::{MessageParser, WorksMessage};
pub use transport::mqtt::{ConnectionState, Credentials, MessageHandler, WorksClient};
