//! Inbound packet routing and PUBLISH dispatch
//!
//! [`route_packet`] is a pure routing decision. [`PublishDispatcher`] turns a
//! PUBLISH into at most one consumer callback plus the PUBACK owed for it.

use super::dedup::MessageDeduplicator;
use super::packet::{ConnAck, Packet, PacketType, Publish};
use crate::protocol::{MessageParser, WorksMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Consumer of delivered messages
///
/// Called on the client's supervisor task, so implementations should hand
/// work off rather than block.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, message: WorksMessage);
}

impl<F> MessageHandler for F
where
    F: Fn(WorksMessage) + Send + Sync,
{
    fn on_message(&self, message: WorksMessage) {
        self(message)
    }
}

impl MessageHandler for mpsc::UnboundedSender<WorksMessage> {
    fn on_message(&self, message: WorksMessage) {
        if let Err(e) = self.send(message) {
            debug!(
                notification_id = %e.0.notification_id,
                "Message receiver dropped, discarding"
            );
        }
    }
}

/// Where an inbound packet should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketRoute {
    ConnAck(ConnAck),
    PingResp,
    PubAck { packet_id: u16 },
    Publish(Publish),
    /// Server closed the session
    ServerDisconnect,
    /// Client-to-server packet received from the server
    Unexpected(PacketType),
}

/// Route an inbound packet (pure function)
pub fn route_packet(packet: Packet) -> PacketRoute {
    match packet {
        Packet::ConnAck(connack) => PacketRoute::ConnAck(connack),
        Packet::PingResp => PacketRoute::PingResp,
        Packet::PubAck { packet_id } => PacketRoute::PubAck { packet_id },
        Packet::Publish(publish) => PacketRoute::Publish(publish),
        Packet::Disconnect => PacketRoute::ServerDisconnect,
        other @ (Packet::Connect(_) | Packet::PingReq) => PacketRoute::Unexpected(other.packet_type()),
    }
}

/// Per-dispatcher delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub duplicates: u64,
    pub rejected: u64,
}

/// Parses, deduplicates and delivers PUBLISH payloads
pub struct PublishDispatcher {
    dedup: MessageDeduplicator,
    handler: Arc<dyn MessageHandler>,
    stats: DispatchStats,
}

impl PublishDispatcher {
    pub fn new(dedup: MessageDeduplicator, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            dedup,
            handler,
            stats: DispatchStats::default(),
        }
    }

    /// Deliver a PUBLISH and return the PUBACK to send, if one is owed
    ///
    /// The PUBACK is returned whenever the PUBLISH carried a packet id,
    /// regardless of whether the payload parsed or was a duplicate.
    pub fn dispatch(&mut self, publish: &Publish) -> Option<Packet> {
        let ack = publish
            .packet_id
            .map(|packet_id| Packet::PubAck { packet_id });

        match MessageParser::parse(&publish.payload) {
            Ok(message) => {
                if self.dedup.should_process(&message.notification_id) {
                    debug!(
                        target: "mqtt_transport",
                        notification_id = %message.notification_id,
                        message_type = %message.message_type,
                        "Delivering message"
                    );
                    self.stats.delivered += 1;
                    self.handler.on_message(message);
                } else {
                    debug!(
                        target: "mqtt_transport",
                        notification_id = %message.notification_id,
                        "Duplicate message suppressed"
                    );
                    self.stats.duplicates += 1;
                }
            }
            Err(e) => {
                warn!(
                    topic = %publish.topic,
                    payload_len = publish.payload.len(),
                    error = %e,
                    "Dropping unparseable PUBLISH"
                );
                self.stats.rejected += 1;
            }
        }

        ack
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }
}
