//! Mock implementations for testing
//!
//! [`MockConnector`] stands in for the WebSocket endpoint. Each successful
//! open creates a [`MockStream`] whose inbound side is driven by a
//! [`MockServerHandle`], and every outbound write is recorded for assertions.
//! By default the mock answers CONNECT with an accepted CONNACK and PINGREQ
//! with PINGRESP, like a healthy server.

use crate::error::WorksError;
use crate::transport::mqtt::codec::{decode, encode_to_bytes, PacketError};
use crate::transport::mqtt::packet::{ConnAck, ConnectReturnCode, Packet, PacketType};
use crate::transport::{Connector, HandshakeHeaders, TransportStream};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};

/// What the mock server pushes to the client
#[derive(Debug, Clone)]
pub enum MockFrame {
    Data(Bytes),
    /// Read error on the client side
    Error(String),
    Close,
}

/// Server side of one mock connection
#[derive(Debug, Clone)]
pub struct MockServerHandle {
    tx: mpsc::UnboundedSender<MockFrame>,
}

impl MockServerHandle {
    /// Push raw bytes as one frame
    pub fn send_bytes(&self, data: impl Into<Bytes>) {
        let _ = self.tx.send(MockFrame::Data(data.into()));
    }

    pub fn send_packet(&self, packet: &Packet) -> Result<(), PacketError> {
        self.send_bytes(encode_to_bytes(packet)?);
        Ok(())
    }

    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.tx.send(MockFrame::Error(message.into()));
    }

    pub fn close(&self) {
        let _ = self.tx.send(MockFrame::Close);
    }
}

#[derive(Debug, Default)]
struct MockState {
    open_failures: VecDeque<WorksError>,
    servers: Vec<MockServerHandle>,
    handshakes: Vec<(String, HandshakeHeaders)>,
    written: Vec<Bytes>,
    closes: usize,
}

/// Scriptable [`Connector`] for tests
#[derive(Debug, Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    opens: Arc<watch::Sender<usize>>,
    writes: Arc<watch::Sender<usize>>,
    connack: Option<ConnectReturnCode>,
    answer_pings: bool,
    stall_writes: bool,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            opens: Arc::new(watch::channel(0).0),
            writes: Arc::new(watch::channel(0).0),
            connack: Some(ConnectReturnCode::Accepted),
            answer_pings: true,
            stall_writes: false,
        }
    }

    /// Answer CONNECT with this return code
    pub fn with_connack(mut self, code: ConnectReturnCode) -> Self {
        self.connack = Some(code);
        self
    }

    /// Never answer CONNECT; the test drives CONNACK itself
    pub fn without_connack(mut self) -> Self {
        self.connack = None;
        self
    }

    /// Let PINGREQs go unanswered
    pub fn without_pingresp(mut self) -> Self {
        self.answer_pings = false;
        self
    }

    /// Writes never complete, like a peer that stopped reading
    pub fn with_stalled_writes(mut self) -> Self {
        self.stall_writes = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next open fail with `error`
    pub fn fail_next_open(&self, error: WorksError) {
        self.lock().open_failures.push_back(error);
    }

    /// Make the next `count` opens fail with a retryable error
    pub fn fail_opens(&self, count: usize) {
        let mut state = self.lock();
        for _ in 0..count {
            state
                .open_failures
                .push_back(WorksError::connection("connection refused"));
        }
    }

    /// Make the next open fail the way an HTTP 401 handshake does
    pub fn reject_unauthorized(&self) {
        self.fail_next_open(WorksError::authentication(
            "WebSocket handshake rejected with HTTP 401 Unauthorized",
        ));
    }

    /// Open attempts so far, failed ones included
    pub fn open_count(&self) -> usize {
        *self.opens.borrow()
    }

    pub async fn wait_for_opens(&self, count: usize) {
        let mut rx = self.opens.subscribe();
        let _ = rx.wait_for(|opens| *opens >= count).await;
    }

    /// Server handle for the `index`th successful connection
    pub fn server(&self, index: usize) -> Option<MockServerHandle> {
        self.lock().servers.get(index).cloned()
    }

    pub fn latest_server(&self) -> Option<MockServerHandle> {
        self.lock().servers.last().cloned()
    }

    /// URL and headers of every open attempt
    pub fn handshakes(&self) -> Vec<(String, HandshakeHeaders)> {
        self.lock().handshakes.clone()
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    /// Every packet written by the client, across connections
    pub fn written_packets(&self) -> Vec<Packet> {
        self.lock()
            .written
            .iter()
            .filter_map(|bytes| decode(bytes).ok().map(|(packet, _)| packet))
            .collect()
    }

    pub fn written_count(&self, packet_type: PacketType) -> usize {
        self.written_packets()
            .iter()
            .filter(|packet| packet.packet_type() == packet_type)
            .count()
    }

    /// Packet ids of every PUBACK written, in order
    pub fn puback_ids(&self) -> Vec<u16> {
        self.written_packets()
            .iter()
            .filter_map(|packet| match packet {
                Packet::PubAck { packet_id } => Some(*packet_id),
                _ => None,
            })
            .collect()
    }

    /// Wait until at least `count` packets of `packet_type` have been written
    pub async fn wait_for_written(&self, packet_type: PacketType, count: usize) {
        let mut rx = self.writes.subscribe();
        let _ = rx
            .wait_for(|_| self.written_count(packet_type) >= count)
            .await;
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(
        &self,
        url: &str,
        headers: &HandshakeHeaders,
    ) -> Result<Box<dyn TransportStream>, WorksError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let failure = {
            let mut state = self.lock();
            state.handshakes.push((url.to_string(), headers.clone()));
            let failure = state.open_failures.pop_front();
            if failure.is_none() {
                state.servers.push(MockServerHandle { tx: tx.clone() });
            }
            failure
        };
        self.opens.send_modify(|opens| *opens += 1);

        if let Some(error) = failure {
            return Err(error);
        }

        Ok(Box::new(MockStream {
            inbound: rx,
            loopback: MockServerHandle { tx },
            state: Arc::clone(&self.state),
            writes: Arc::clone(&self.writes),
            connack: self.connack,
            answer_pings: self.answer_pings,
            stall_writes: self.stall_writes,
            closed: false,
        }))
    }
}

/// Client side of one mock connection
#[derive(Debug)]
pub struct MockStream {
    inbound: mpsc::UnboundedReceiver<MockFrame>,
    loopback: MockServerHandle,
    state: Arc<Mutex<MockState>>,
    writes: Arc<watch::Sender<usize>>,
    connack: Option<ConnectReturnCode>,
    answer_pings: bool,
    stall_writes: bool,
    closed: bool,
}

impl MockStream {
    fn auto_reply(&self, data: &[u8]) -> Option<Packet> {
        let packet_type = data.first().and_then(|byte| PacketType::from_u8(byte >> 4))?;
        match packet_type {
            PacketType::Connect => self.connack.map(|return_code| {
                Packet::ConnAck(ConnAck {
                    session_present: false,
                    return_code,
                })
            }),
            PacketType::PingReq if self.answer_pings => Some(Packet::PingResp),
            _ => None,
        }
    }
}

#[async_trait]
impl TransportStream for MockStream {
    async fn read(&mut self) -> Result<Option<Bytes>, WorksError> {
        if self.closed {
            return Ok(None);
        }
        match self.inbound.recv().await {
            Some(MockFrame::Data(data)) => Ok(Some(data)),
            Some(MockFrame::Error(message)) => Err(WorksError::connection(message)),
            Some(MockFrame::Close) | None => {
                self.closed = true;
                Ok(None)
            }
        }
    }

    async fn write(&mut self, data: Bytes) -> Result<(), WorksError> {
        if self.closed {
            return Err(WorksError::connection("write on closed mock stream"));
        }
        if self.stall_writes {
            std::future::pending::<()>().await;
        }

        let reply = self.auto_reply(&data);
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .written
            .push(data);
        self.writes.send_modify(|writes| *writes += 1);

        if let Some(reply) = reply {
            let _ = self.loopback.send_packet(&reply);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), WorksError> {
        self.closed = true;
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .closes += 1;
        Ok(())
    }
}
