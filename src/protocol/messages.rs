//! Domain message types for Works Mobile notifications
//!
//! A [`WorksMessage`] is produced from every PUBLISH payload the backend pushes,
//! whether it arrived as a push notification or as a channel relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Kind of message carried by a notification or relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Sticker,
    File,
    Service,
    Emoji,
    Image,
    Badge,
    Away,
    Leave,
    Invite,
    Kick,
    Read,
}

impl MessageType {
    /// Map a wire code to a message type
    ///
    /// ```
    /// use works_notify::protocol::MessageType;
    ///
    /// assert_eq!(MessageType::from_code(1), Some(MessageType::Text));
    /// assert_eq!(MessageType::from_code(101), Some(MessageType::Text));
    /// assert_eq!(MessageType::from_code(18), Some(MessageType::Sticker));
    /// assert_eq!(MessageType::from_code(7), None);
    /// ```
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 | 101 => Some(MessageType::Text),
            18 => Some(MessageType::Sticker),
            16 => Some(MessageType::File),
            100 => Some(MessageType::Service),
            27 => Some(MessageType::Emoji),
            11 => Some(MessageType::Image),
            41 => Some(MessageType::Badge),
            102 => Some(MessageType::Away),
            202 => Some(MessageType::Leave),
            203 => Some(MessageType::Invite),
            204 => Some(MessageType::Kick),
            93004 => Some(MessageType::Read),
            _ => None,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Sticker => "sticker",
            MessageType::File => "file",
            MessageType::Service => "service notice",
            MessageType::Emoji => "emoji",
            MessageType::Image => "image",
            MessageType::Badge => "badge update",
            MessageType::Away => "away message",
            MessageType::Leave => "member left",
            MessageType::Invite => "member invited",
            MessageType::Kick => "member removed",
            MessageType::Read => "read receipt",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Personal,
    Group,
    /// Unrecognised code, or 0 when the payload carried none
    Other(i64),
}

impl ChannelType {
    pub fn from_code(code: i64) -> Self {
        match code {
            6 => ChannelType::Personal,
            10 => ChannelType::Group,
            other => ChannelType::Other(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            ChannelType::Personal => 6,
            ChannelType::Group => 10,
            ChannelType::Other(code) => code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StickerType {
    Line,
    Works,
}

impl StickerType {
    /// Case-insensitive match on the `stkType` value
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("line") {
            Some(StickerType::Line)
        } else if value.eq_ignore_ascii_case("works") {
            Some(StickerType::Works)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerInfo {
    pub sticker_type: StickerType,
    pub package_id: String,
    pub sticker_id: String,
    /// Animation and sound flags (`stkOpt`)
    pub options: Option<String>,
}

/// Which payload shape a message was parsed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    /// Push notification carrying `nType`
    Notification,
    /// Channel message inside `relayDataList`
    Relay,
}

/// A parsed chat notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorksMessage {
    /// Key used for duplicate suppression
    pub notification_id: String,
    pub message_type: MessageType,
    pub channel_type: ChannelType,
    pub channel_id: String,
    pub sender_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Set only for sticker messages that carried sticker fields
    pub sticker: Option<StickerInfo>,
    pub source: MessageSource,
    pub channel_title: Option<String>,
    pub sender_name: Option<String>,
    pub text: Option<String>,
    /// Localization key of a notification (e.g. the template for the alert text)
    pub loc_key: Option<String>,
    /// Raw JSON object the message was built from
    pub body: Value,
}

impl WorksMessage {
    pub fn is_sticker(&self) -> bool {
        self.message_type == MessageType::Sticker
    }
}

/// Payload parsing failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Payload has neither nType nor relayDataList")]
    MissingDiscriminator,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    #[error("Unknown message type code {0}")]
    UnknownMessageType(i64),

    #[error("relayDataList is empty")]
    EmptyRelayList,

    #[error("Invalid sticker: {0}")]
    InvalidSticker(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_codes() {
        let cases = [
            (1, MessageType::Text),
            (101, MessageType::Text),
            (18, MessageType::Sticker),
            (16, MessageType::File),
            (100, MessageType::Service),
            (27, MessageType::Emoji),
            (11, MessageType::Image),
            (41, MessageType::Badge),
            (102, MessageType::Away),
            (202, MessageType::Leave),
            (203, MessageType::Invite),
            (204, MessageType::Kick),
            (93004, MessageType::Read),
        ];
        for (code, expected) in cases {
            assert_eq!(MessageType::from_code(code), Some(expected), "code {code}");
        }
        assert_eq!(MessageType::from_code(0), None);
        assert_eq!(MessageType::from_code(-1), None);
    }

    #[test]
    fn test_channel_type_codes() {
        assert_eq!(ChannelType::from_code(6), ChannelType::Personal);
        assert_eq!(ChannelType::from_code(10), ChannelType::Group);
        assert_eq!(ChannelType::from_code(3), ChannelType::Other(3));
        assert_eq!(ChannelType::Group.code(), 10);
    }

    #[test]
    fn test_sticker_type_case_insensitive() {
        assert_eq!(StickerType::parse("line"), Some(StickerType::Line));
        assert_eq!(StickerType::parse("LINE"), Some(StickerType::Line));
        assert_eq!(StickerType::parse("Works"), Some(StickerType::Works));
        assert_eq!(StickerType::parse("none"), None);
        assert_eq!(StickerType::parse(""), None);
    }

    #[test]
    fn test_message_serializes_snake_case() {
        let message = WorksMessage {
            notification_id: "msg.1".to_string(),
            message_type: MessageType::Text,
            channel_type: ChannelType::Personal,
            channel_id: "100".to_string(),
            sender_id: None,
            timestamp: None,
            sticker: None,
            source: MessageSource::Notification,
            channel_title: None,
            sender_name: None,
            text: Some("hi".to_string()),
            loc_key: None,
            body: Value::Null,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["message_type"], "text");
        assert_eq!(json["channel_type"], "personal");
        assert_eq!(json["source"], "notification");
    }
}
