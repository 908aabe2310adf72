//! WebSocket transport built on tokio-tungstenite
//!
//! MQTT packets travel in binary frames. Text frames are not part of the
//! protocol and are dropped; ping and pong frames are answered by tungstenite.

use super::{Connector, HandshakeHeaders, TransportStream};
use crate::config::WebSocketSection;
use crate::error::WorksError;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

/// Build the handshake headers the notification endpoint expects
pub fn handshake_headers(config: &WebSocketSection, cookie: Option<&str>) -> HandshakeHeaders {
    let mut headers = vec![
        (
            "Sec-WebSocket-Protocol".to_string(),
            config.subprotocol.clone(),
        ),
        ("Origin".to_string(), config.origin.clone()),
        ("User-Agent".to_string(), config.user_agent.clone()),
    ];
    if let Some(cookie) = cookie.filter(|c| !c.is_empty()) {
        headers.push(("Cookie".to_string(), cookie.to_string()));
    }
    headers.extend(
        config
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone())),
    );
    headers
}

/// Map a handshake failure onto the client error taxonomy
fn classify_handshake_error(error: WsError) -> WorksError {
    match error {
        WsError::Http(response)
            if response.status() == StatusCode::UNAUTHORIZED
                || response.status() == StatusCode::FORBIDDEN =>
        {
            WorksError::authentication(format!(
                "WebSocket handshake rejected with HTTP {}",
                response.status()
            ))
        }
        WsError::Http(response) => WorksError::connection(format!(
            "WebSocket handshake failed with HTTP {}",
            response.status()
        )),
        other => WorksError::connection(format!("WebSocket connect failed: {other}")),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn open(
        &self,
        url: &str,
        headers: &HandshakeHeaders,
    ) -> Result<Box<dyn TransportStream>, WorksError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| WorksError::connection(format!("Invalid WebSocket URL {url}: {e}")))?;

        for (name, value) in headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| WorksError::connection(format!("Invalid header name {name}: {e}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| WorksError::connection(format!("Invalid value for {name}: {e}")))?;
            request.headers_mut().insert(header_name, header_value);
        }

        debug!(target: "mqtt_transport", url = %url, "Opening WebSocket");
        let (stream, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(classify_handshake_error)?;
        debug!(target: "mqtt_transport", status = %response.status(), "WebSocket handshake complete");

        Ok(Box::new(WebSocketTransport { inner: stream }))
    }
}

pub struct WebSocketTransport {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl TransportStream for WebSocketTransport {
    async fn read(&mut self) -> Result<Option<Bytes>, WorksError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                Some(Ok(Message::Text(text))) => {
                    debug!(target: "mqtt_transport", len = text.len(), "Ignoring text frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(target: "mqtt_transport", ?frame, "Server closed WebSocket");
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    trace!(target: "mqtt_transport", ?other, "Control frame");
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    return Ok(None)
                }
                Some(Err(e)) => {
                    return Err(WorksError::connection(format!("WebSocket read failed: {e}")))
                }
            }
        }
    }

    async fn write(&mut self, data: Bytes) -> Result<(), WorksError> {
        self.inner
            .send(Message::Binary(data))
            .await
            .map_err(|e| WorksError::connection(format!("WebSocket write failed: {e}")))
    }

    async fn close(&mut self) -> Result<(), WorksError> {
        match self.inner.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(WorksError::connection(format!("WebSocket close failed: {e}"))),
        }
    }
}
