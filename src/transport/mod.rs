//! Transport layer for the notification client
//!
//! The MQTT session runs over any byte transport that can be opened with a set
//! of handshake headers. [`websocket::WebSocketConnector`] is the production
//! implementation; tests substitute `testing::MockConnector`.

use crate::error::WorksError;
use bytes::Bytes;

pub mod mqtt;
pub mod websocket;

/// Handshake headers as ordered name/value pairs
pub type HandshakeHeaders = Vec<(String, String)>;

/// Opens transport streams
///
/// Implementations map an HTTP 401/403 handshake response to
/// [`WorksError::Authentication`] and every other failure to
/// [`WorksError::Connection`].
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        url: &str,
        headers: &HandshakeHeaders,
    ) -> Result<Box<dyn TransportStream>, WorksError>;
}

/// A bidirectional, message-oriented byte stream
#[async_trait::async_trait]
pub trait TransportStream: Send {
    /// Next chunk of inbound bytes, or `None` once the peer has closed
    async fn read(&mut self) -> Result<Option<Bytes>, WorksError>;

    async fn write(&mut self, data: Bytes) -> Result<(), WorksError>;

    async fn close(&mut self) -> Result<(), WorksError>;
}
