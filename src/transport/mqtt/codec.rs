//! Wire codec for MQTT control packets
//!
//! Encoding and decoding are pure functions over byte buffers. [`PacketBuffer`]
//! layers frame reassembly on top so the transport can hand over WebSocket
//! frames without caring where packet boundaries fall.

use super::packet::{
    ConnAck, Connect, ConnectReturnCode, FixedHeader, Packet, PacketType, Publish, QoS,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Largest value a four byte remaining-length field can carry
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Default cap on a single inbound packet, fixed header included
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Largest length-prefixed string or binary field
pub const MAX_STRING_LENGTH: usize = u16::MAX as usize;

/// Wire-level decoding and encoding failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("Incomplete packet: {needed} more bytes required")]
    Incomplete { needed: usize },

    #[error("Unknown packet type {0}")]
    UnknownPacketType(u8),

    #[error("Malformed remaining length")]
    MalformedRemainingLength,

    #[error("Remaining length {0} exceeds maximum of {MAX_REMAINING_LENGTH}")]
    RemainingLengthTooLarge(usize),

    #[error("Packet of {size} bytes exceeds maximum packet size {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("{packet_type:?} remaining length must be {expected}, got {actual}")]
    InvalidRemainingLength {
        packet_type: PacketType,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid flags {flags:#06b} for {packet_type:?}")]
    InvalidFlags { packet_type: PacketType, flags: u8 },

    #[error("Invalid QoS level {0}")]
    InvalidQos(u8),

    #[error("Topic name must not be empty")]
    EmptyTopic,

    #[error("{field} is {len} bytes, maximum is {MAX_STRING_LENGTH}")]
    StringTooLong { field: &'static str, len: usize },

    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("Packet truncated while reading {0}")]
    Truncated(&'static str),

    #[error("{0} trailing bytes after packet body")]
    TrailingBytes(usize),

    #[error("Unknown CONNACK return code {0}")]
    UnknownReturnCode(u8),

    #[error("Packet identifier must be non-zero")]
    ZeroPacketId,

    #[error("QoS {0:?} publish requires a packet identifier")]
    MissingPacketId(QoS),

    #[error("QoS 0 publish must not carry a packet identifier")]
    UnexpectedPacketId,
}

impl PacketError {
    /// Whether the byte stream can no longer be split into packets
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            PacketError::MalformedRemainingLength | PacketError::PacketTooLarge { .. }
        )
    }
}

/// Encode a remaining-length value as a base-128 varint
pub fn encode_remaining_length(length: usize, buf: &mut BytesMut) -> Result<(), PacketError> {
    if length > MAX_REMAINING_LENGTH {
        return Err(PacketError::RemainingLengthTooLarge(length));
    }

    let mut value = length;
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
    Ok(())
}

/// Decode a remaining-length varint from the start of `buf`
///
/// Returns the value and the number of bytes it occupied.
pub fn decode_remaining_length(buf: &[u8]) -> Result<(usize, usize), PacketError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;

    for (index, byte) in buf.iter().take(4).enumerate() {
        value += usize::from(byte & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok((value, index + 1));
        }
        multiplier *= 128;
    }

    if buf.len() >= 4 {
        Err(PacketError::MalformedRemainingLength)
    } else {
        Err(PacketError::Incomplete { needed: 1 })
    }
}

/// Parse the fixed header, returning it with its encoded size
pub fn parse_fixed_header(buf: &[u8]) -> Result<(FixedHeader, usize), PacketError> {
    let Some(&first) = buf.first() else {
        return Err(PacketError::Incomplete { needed: 2 });
    };

    let (remaining_length, length_bytes) = decode_remaining_length(&buf[1..])?;

    Ok((
        FixedHeader {
            packet_type: first >> 4,
            flags: first & 0x0F,
            remaining_length,
        },
        1 + length_bytes,
    ))
}

/// Decode one packet from the front of `buf`
///
/// On success returns the packet and the number of bytes consumed. Returns
/// [`PacketError::Incomplete`] when the buffer ends before the declared length.
pub fn decode(buf: &[u8]) -> Result<(Packet, usize), PacketError> {
    let (header, header_len) = parse_fixed_header(buf)?;
    let total = header_len + header.remaining_length;

    if buf.len() < total {
        return Err(PacketError::Incomplete {
            needed: total - buf.len(),
        });
    }

    let packet = decode_body(&header, &buf[header_len..total])?;
    Ok((packet, total))
}

/// Decode a packet body whose length has already been framed
pub fn decode_body(header: &FixedHeader, body: &[u8]) -> Result<Packet, PacketError> {
    let packet_type = PacketType::from_u8(header.packet_type)
        .ok_or(PacketError::UnknownPacketType(header.packet_type))?;

    if let Some(expected) = packet_type.fixed_remaining_length() {
        if header.remaining_length != expected || body.len() != expected {
            return Err(PacketError::InvalidRemainingLength {
                packet_type,
                expected,
                actual: body.len(),
            });
        }
    }

    if packet_type != PacketType::Publish && header.flags != 0 {
        return Err(PacketError::InvalidFlags {
            packet_type,
            flags: header.flags,
        });
    }

    let mut reader = BodyReader::new(body);
    let packet = match packet_type {
        PacketType::Connect => Packet::Connect(decode_connect(&mut reader)?),
        PacketType::ConnAck => {
            let ack_flags = reader.read_u8("acknowledge flags")?;
            if ack_flags & 0xFE != 0 {
                return Err(PacketError::InvalidFlags {
                    packet_type,
                    flags: ack_flags,
                });
            }
            let code = reader.read_u8("return code")?;
            let return_code =
                ConnectReturnCode::from_u8(code).ok_or(PacketError::UnknownReturnCode(code))?;
            Packet::ConnAck(ConnAck {
                session_present: ack_flags & 0x01 == 0x01,
                return_code,
            })
        }
        PacketType::Publish => Packet::Publish(decode_publish(header.flags, &mut reader)?),
        PacketType::PubAck => {
            let packet_id = reader.read_u16("packet identifier")?;
            if packet_id == 0 {
                return Err(PacketError::ZeroPacketId);
            }
            Packet::PubAck { packet_id }
        }
        PacketType::PingReq => Packet::PingReq,
        PacketType::PingResp => Packet::PingResp,
        PacketType::Disconnect => Packet::Disconnect,
    };

    reader.finish()?;
    Ok(packet)
}

fn decode_publish(flags: u8, reader: &mut BodyReader<'_>) -> Result<Publish, PacketError> {
    let qos_bits = (flags >> 1) & 0x03;
    let qos = QoS::from_u8(qos_bits).ok_or(PacketError::InvalidQos(qos_bits))?;

    let topic = reader.read_string("topic name")?;
    if topic.is_empty() {
        return Err(PacketError::EmptyTopic);
    }

    let packet_id = match qos {
        QoS::AtMostOnce => None,
        QoS::AtLeastOnce | QoS::ExactlyOnce => {
            let id = reader.read_u16("packet identifier")?;
            if id == 0 {
                return Err(PacketError::ZeroPacketId);
            }
            Some(id)
        }
    };

    Ok(Publish {
        dup: flags & 0x08 != 0,
        qos,
        retain: flags & 0x01 != 0,
        topic,
        packet_id,
        payload: Bytes::copy_from_slice(reader.rest()),
    })
}

fn decode_connect(reader: &mut BodyReader<'_>) -> Result<Connect, PacketError> {
    let protocol_name = reader.read_string("protocol name")?;
    let protocol_level = reader.read_u8("protocol level")?;
    let flags = reader.read_u8("connect flags")?;
    let keep_alive = reader.read_u16("keep alive")?;
    let client_id = reader.read_string("client identifier")?;

    let username = if flags & 0x80 != 0 {
        Some(reader.read_string("username")?)
    } else {
        None
    };
    let password = if flags & 0x40 != 0 {
        Some(reader.read_binary("password")?)
    } else {
        None
    };

    Ok(Connect {
        protocol_name,
        protocol_level,
        clean_session: flags & 0x02 != 0,
        keep_alive,
        client_id,
        username,
        password,
    })
}

/// Encode a packet, appending it to `buf`
pub fn encode(packet: &Packet, buf: &mut BytesMut) -> Result<(), PacketError> {
    let mut body = BytesMut::new();

    match packet {
        Packet::Connect(connect) => {
            put_string(&mut body, &connect.protocol_name, "protocol name")?;
            body.put_u8(connect.protocol_level);
            body.put_u8(connect.connect_flags());
            body.put_u16(connect.keep_alive);
            put_string(&mut body, &connect.client_id, "client identifier")?;
            if let Some(username) = &connect.username {
                put_string(&mut body, username, "username")?;
            }
            if let Some(password) = &connect.password {
                put_binary(&mut body, password, "password")?;
            }
        }
        Packet::ConnAck(connack) => {
            body.put_u8(u8::from(connack.session_present));
            body.put_u8(connack.return_code.as_u8());
        }
        Packet::Publish(publish) => {
            if publish.topic.is_empty() {
                return Err(PacketError::EmptyTopic);
            }
            put_string(&mut body, &publish.topic, "topic name")?;
            match (publish.qos, publish.packet_id) {
                (QoS::AtMostOnce, None) => {}
                (QoS::AtMostOnce, Some(_)) => return Err(PacketError::UnexpectedPacketId),
                (qos, None) => return Err(PacketError::MissingPacketId(qos)),
                (_, Some(0)) => return Err(PacketError::ZeroPacketId),
                (_, Some(id)) => body.put_u16(id),
            }
            body.put_slice(&publish.payload);
        }
        Packet::PubAck { packet_id } => {
            if *packet_id == 0 {
                return Err(PacketError::ZeroPacketId);
            }
            body.put_u16(*packet_id);
        }
        Packet::PingReq | Packet::PingResp | Packet::Disconnect => {}
    }

    buf.reserve(1 + 4 + body.len());
    buf.put_u8((packet.packet_type().as_u8() << 4) | packet.flags());
    encode_remaining_length(body.len(), buf)?;
    buf.put_slice(&body);
    Ok(())
}

/// Encode a packet into a standalone buffer ready for the transport
pub fn encode_to_bytes(packet: &Packet) -> Result<Bytes, PacketError> {
    let mut buf = BytesMut::new();
    encode(packet, &mut buf)?;
    Ok(buf.freeze())
}

fn put_string(buf: &mut BytesMut, value: &str, field: &'static str) -> Result<(), PacketError> {
    put_binary(buf, value.as_bytes(), field)
}

fn put_binary(buf: &mut BytesMut, value: &[u8], field: &'static str) -> Result<(), PacketError> {
    if value.len() > MAX_STRING_LENGTH {
        return Err(PacketError::StringTooLong {
            field,
            len: value.len(),
        });
    }
    buf.put_u16(value.len() as u16);
    buf.put_slice(value);
    Ok(())
}

/// Bounds-checked cursor over a packet body
struct BodyReader<'a> {
    buf: &'a [u8],
}

impl<'a> BodyReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn read_u8(&mut self, field: &'static str) -> Result<u8, PacketError> {
        if self.buf.remaining() < 1 {
            return Err(PacketError::Truncated(field));
        }
        Ok(self.buf.get_u8())
    }

    fn read_u16(&mut self, field: &'static str) -> Result<u16, PacketError> {
        if self.buf.remaining() < 2 {
            return Err(PacketError::Truncated(field));
        }
        Ok(self.buf.get_u16())
    }

    fn read_binary(&mut self, field: &'static str) -> Result<Bytes, PacketError> {
        let len = usize::from(self.read_u16(field)?);
        if self.buf.remaining() < len {
            return Err(PacketError::Truncated(field));
        }
        let (value, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(Bytes::copy_from_slice(value))
    }

    fn read_string(&mut self, field: &'static str) -> Result<String, PacketError> {
        let raw = self.read_binary(field)?;
        String::from_utf8(raw.to_vec()).map_err(|_| PacketError::InvalidUtf8(field))
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }

    fn finish(&self) -> Result<(), PacketError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(PacketError::TrailingBytes(self.buf.len()))
        }
    }
}

/// Reassembles packets from transport frames
///
/// Frames may carry partial packets or several packets at once. A packet
/// declaring more than `max_packet_size` bytes is a framing error rather than
/// something to wait for.
#[derive(Debug)]
pub struct PacketBuffer {
    buf: BytesMut,
    max_packet_size: usize,
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::with_max_packet_size(DEFAULT_MAX_PACKET_SIZE)
    }
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_packet_size,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Take the next complete packet, or `Ok(None)` if more bytes are needed
    ///
    /// A malformed packet body is removed from the buffer before the error is
    /// returned, so the next call continues with the following packet.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, PacketError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let (header, header_len) = match parse_fixed_header(&self.buf) {
            Ok(parsed) => parsed,
            Err(PacketError::Incomplete { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let total = header_len + header.remaining_length;
        if total > self.max_packet_size {
            return Err(PacketError::PacketTooLarge {
                size: total,
                max: self.max_packet_size,
            });
        }
        if self.buf.len() < total {
            return Ok(None);
        }

        let frame = self.buf.split_to(total);
        decode_body(&header, &frame[header_len..]).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip(packet: Packet) {
        let bytes = encode_to_bytes(&packet).unwrap();
        let (decoded, consumed) = decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_remaining_length_boundaries() {
        let cases = [
            (0usize, 1usize),
            (1, 1),
            (127, 1),
            (128, 2),
            (16_383, 2),
            (16_384, 3),
            (2_097_151, 3),
            (2_097_152, 4),
            (268_435_455, 4),
        ];

        for (value, width) in cases {
            let mut buf = BytesMut::new();
            encode_remaining_length(value, &mut buf).unwrap();
            assert_eq!(buf.len(), width, "width for {value}");
            assert_eq!(decode_remaining_length(&buf).unwrap(), (value, width));
        }
    }

    #[test]
    fn test_remaining_length_too_large() {
        let mut buf = BytesMut::new();
        assert_eq!(
            encode_remaining_length(268_435_456, &mut buf),
            Err(PacketError::RemainingLengthTooLarge(268_435_456))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_remaining_length_wire_bytes() {
        let mut buf = BytesMut::new();
        encode_remaining_length(321, &mut buf).unwrap();
        assert_eq!(&buf[..], &[0xC1, 0x02]);
    }

    #[test]
    fn test_five_byte_varint_is_malformed() {
        let result = decode_remaining_length(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert_eq!(result, Err(PacketError::MalformedRemainingLength));
        assert!(PacketError::MalformedRemainingLength.is_framing());
    }

    #[test]
    fn test_truncated_varint_is_incomplete() {
        assert_eq!(
            decode_remaining_length(&[0x80, 0x80]),
            Err(PacketError::Incomplete { needed: 1 })
        );
    }

    #[test]
    fn test_round_trip_every_packet_type() {
        let mut connect = Connect::new("web-beejs_0123456789ab", 50);
        connect.username = Some("dummy".to_string());
        connect.password = Some(Bytes::from_static(b"opaque-session-token"));
        round_trip(Packet::Connect(connect));
        round_trip(Packet::Connect(Connect::new("bare", 0)));

        round_trip(Packet::ConnAck(ConnAck {
            session_present: true,
            return_code: ConnectReturnCode::Accepted,
        }));
        round_trip(Packet::ConnAck(ConnAck {
            session_present: false,
            return_code: ConnectReturnCode::NotAuthorized,
        }));

        round_trip(Packet::Publish(Publish::new("noti", &b"{}"[..])));
        round_trip(Packet::Publish(Publish {
            dup: true,
            qos: QoS::AtLeastOnce,
            retain: true,
            topic: "noti/user".to_string(),
            packet_id: Some(u16::MAX),
            payload: Bytes::from_static(b"payload"),
        }));
        round_trip(Packet::Publish(
            Publish::new("t", Bytes::new()).with_qos(QoS::ExactlyOnce, 1),
        ));

        round_trip(Packet::PubAck { packet_id: 42 });
        round_trip(Packet::PingReq);
        round_trip(Packet::PingResp);
        round_trip(Packet::Disconnect);
    }

    #[test]
    fn test_maximum_topic_length_round_trips() {
        let topic = "a".repeat(MAX_STRING_LENGTH);
        round_trip(Packet::Publish(Publish::new(topic, &b"x"[..])));
    }

    #[test]
    fn test_oversized_topic_rejected() {
        let topic = "a".repeat(MAX_STRING_LENGTH + 1);
        let result = encode_to_bytes(&Packet::Publish(Publish::new(topic, Bytes::new())));
        assert_eq!(
            result,
            Err(PacketError::StringTooLong {
                field: "topic name",
                len: MAX_STRING_LENGTH + 1
            })
        );
    }

    #[test]
    fn test_empty_topic_rejected_both_ways() {
        let result = encode_to_bytes(&Packet::Publish(Publish::new("", Bytes::new())));
        assert_eq!(result, Err(PacketError::EmptyTopic));

        // PUBLISH, remaining length 2, zero-length topic
        let wire = [0x30, 0x02, 0x00, 0x00];
        assert_eq!(decode(&wire), Err(PacketError::EmptyTopic));
    }

    #[test]
    fn test_publish_qos_packet_id_consistency() {
        let mut publish = Publish::new("t", Bytes::new());
        publish.qos = QoS::AtLeastOnce;
        assert_eq!(
            encode_to_bytes(&Packet::Publish(publish.clone())),
            Err(PacketError::MissingPacketId(QoS::AtLeastOnce))
        );

        publish.qos = QoS::AtMostOnce;
        publish.packet_id = Some(3);
        assert_eq!(
            encode_to_bytes(&Packet::Publish(publish)),
            Err(PacketError::UnexpectedPacketId)
        );
    }

    #[test]
    fn test_decode_publish_wire_format() {
        // QoS 1 publish: topic "ab", packet id 0x0102, payload "hi"
        let wire = [
            0x32, 0x08, 0x00, 0x02, b'a', b'b', 0x01, 0x02, b'h', b'i',
        ];
        let (packet, consumed) = decode(&wire).unwrap();
        assert_eq!(consumed, wire.len());
        match packet {
            Packet::Publish(publish) => {
                assert_eq!(publish.topic, "ab");
                assert_eq!(publish.qos, QoS::AtLeastOnce);
                assert_eq!(publish.packet_id, Some(0x0102));
                assert_eq!(&publish.payload[..], b"hi");
            }
            other => panic!("expected publish, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_incomplete() {
        let bytes = encode_to_bytes(&Packet::PubAck { packet_id: 9 }).unwrap();
        assert_eq!(
            decode(&bytes[..3]),
            Err(PacketError::Incomplete { needed: 1 })
        );
        assert_eq!(decode(&[]), Err(PacketError::Incomplete { needed: 2 }));
        assert_eq!(decode(&[0x40]), Err(PacketError::Incomplete { needed: 1 }));
    }

    #[test]
    fn test_decode_unknown_packet_type() {
        // SUBACK is outside the supported subset
        assert_eq!(
            decode(&[0x90, 0x03, 0x00, 0x01, 0x00]),
            Err(PacketError::UnknownPacketType(9))
        );
        assert_eq!(decode(&[0x00, 0x00]), Err(PacketError::UnknownPacketType(0)));
    }

    #[test]
    fn test_decode_fixed_shape_length_mismatch() {
        assert_eq!(
            decode(&[0x20, 0x03, 0x00, 0x00, 0x00]),
            Err(PacketError::InvalidRemainingLength {
                packet_type: PacketType::ConnAck,
                expected: 2,
                actual: 3
            })
        );
        assert_eq!(
            decode(&[0xD0, 0x01, 0x00]),
            Err(PacketError::InvalidRemainingLength {
                packet_type: PacketType::PingResp,
                expected: 0,
                actual: 1
            })
        );
        assert!(matches!(
            decode(&[0x40, 0x01, 0x00]),
            Err(PacketError::InvalidRemainingLength { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_reserved_flags_and_qos3() {
        assert_eq!(
            decode(&[0xD1, 0x00]),
            Err(PacketError::InvalidFlags {
                packet_type: PacketType::PingResp,
                flags: 1
            })
        );
        assert_eq!(
            decode(&[0x36, 0x03, 0x00, 0x01, b't']),
            Err(PacketError::InvalidQos(3))
        );
    }

    #[test]
    fn test_decode_unknown_return_code() {
        assert_eq!(
            decode(&[0x20, 0x02, 0x00, 0x07]),
            Err(PacketError::UnknownReturnCode(7))
        );
    }

    #[test]
    fn test_decode_truncated_topic() {
        // declares a 5 byte topic but the body holds only 2 bytes of it
        assert_eq!(
            decode(&[0x30, 0x04, 0x00, 0x05, b'a', b'b']),
            Err(PacketError::Truncated("topic name"))
        );
    }

    #[test]
    fn test_decode_missing_packet_id() {
        assert_eq!(
            decode(&[0x32, 0x03, 0x00, 0x01, b't']),
            Err(PacketError::Truncated("packet identifier"))
        );
    }

    #[test]
    fn test_buffer_reassembles_split_frames() {
        let publish = Packet::Publish(
            Publish::new("noti", &b"{\"nType\":1}"[..]).with_qos(QoS::AtLeastOnce, 5),
        );
        let bytes = encode_to_bytes(&publish).unwrap();

        let mut buffer = PacketBuffer::new();
        buffer.extend(&bytes[..1]);
        assert_eq!(buffer.next_packet(), Ok(None));
        buffer.extend(&bytes[1..6]);
        assert_eq!(buffer.next_packet(), Ok(None));
        buffer.extend(&bytes[6..]);
        assert_eq!(buffer.next_packet(), Ok(Some(publish)));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_buffer_yields_multiple_packets_from_one_frame() {
        let mut frame = BytesMut::new();
        encode(&Packet::PingResp, &mut frame).unwrap();
        encode(&Packet::PubAck { packet_id: 2 }, &mut frame).unwrap();

        let mut buffer = PacketBuffer::new();
        buffer.extend(&frame);
        assert_eq!(buffer.next_packet(), Ok(Some(Packet::PingResp)));
        assert_eq!(
            buffer.next_packet(),
            Ok(Some(Packet::PubAck { packet_id: 2 }))
        );
        assert_eq!(buffer.next_packet(), Ok(None));
    }

    #[test]
    fn test_buffer_skips_malformed_packet() {
        let mut buffer = PacketBuffer::new();
        // unknown type 9 with a readable length, followed by a PINGRESP
        buffer.extend(&[0x90, 0x01, 0x00, 0xD0, 0x00]);
        assert_eq!(buffer.next_packet(), Err(PacketError::UnknownPacketType(9)));
        assert_eq!(buffer.next_packet(), Ok(Some(Packet::PingResp)));
    }

    #[test]
    fn test_buffer_reports_framing_error() {
        let mut buffer = PacketBuffer::new();
        buffer.extend(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        let error = buffer.next_packet().unwrap_err();
        assert!(error.is_framing());
    }

    #[test]
    fn test_buffer_rejects_oversized_packet_before_buffering_it() {
        let mut buffer = PacketBuffer::with_max_packet_size(64);
        // PUBLISH declaring 200 body bytes; only the header has arrived
        buffer.extend(&[0x30, 0xC8, 0x01]);
        assert_eq!(
            buffer.next_packet(),
            Err(PacketError::PacketTooLarge { size: 203, max: 64 })
        );
        assert!(buffer.next_packet().unwrap_err().is_framing());

        let mut buffer = PacketBuffer::with_max_packet_size(64);
        let packet = Packet::Publish(Publish::new("t", vec![b'x'; 40]));
        buffer.extend(&encode_to_bytes(&packet).unwrap());
        assert_eq!(buffer.next_packet(), Ok(Some(packet)));
    }

    proptest! {
        #[test]
        fn prop_remaining_length_round_trip(value in 0usize..=MAX_REMAINING_LENGTH) {
            let mut buf = BytesMut::new();
            encode_remaining_length(value, &mut buf).unwrap();
            let (decoded, used) = decode_remaining_length(&buf).unwrap();
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(used, buf.len());
        }
    }
}
