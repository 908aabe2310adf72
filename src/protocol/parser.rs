//! PUBLISH payload parser
//!
//! Field names follow the backend's JSON. Numeric fields are accepted either
//! as JSON numbers or as numeric strings since the backend uses both.

use super::messages::{
    ChannelType, MessageError, MessageSource, MessageType, StickerInfo, StickerType, WorksMessage,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

pub struct MessageParser;

impl MessageParser {
    /// Parse a UTF-8 JSON payload into a [`WorksMessage`]
    pub fn parse(payload: &[u8]) -> Result<WorksMessage, MessageError> {
        let text = std::str::from_utf8(payload).map_err(|_| MessageError::InvalidUtf8)?;
        let value: Value =
            serde_json::from_str(text).map_err(|e| MessageError::InvalidJson(e.to_string()))?;

        let Value::Object(object) = value else {
            return Err(MessageError::MissingDiscriminator);
        };

        if object.contains_key("nType") {
            Self::parse_notification(object)
        } else if let Some(relay_list) = object.get("relayDataList") {
            let first = match relay_list {
                Value::Array(items) => items.first().ok_or(MessageError::EmptyRelayList)?,
                _ => {
                    return Err(MessageError::InvalidField {
                        field: "relayDataList",
                        message: "expected an array".to_string(),
                    })
                }
            };
            let Value::Object(relay) = first else {
                return Err(MessageError::InvalidField {
                    field: "relayDataList",
                    message: "expected an array of objects".to_string(),
                });
            };
            Self::parse_relay(relay.clone())
        } else if object.contains_key("cmd") && object.contains_key("bdy") {
            Self::parse_relay(object)
        } else {
            Err(MessageError::MissingDiscriminator)
        }
    }

    fn parse_notification(object: Map<String, Value>) -> Result<WorksMessage, MessageError> {
        let code = code_field(&object, "nType")?.ok_or(MessageError::MissingField("nType"))?;
        let message_type =
            MessageType::from_code(code).ok_or(MessageError::UnknownMessageType(code))?;

        let notification_id = text_field(&object, "notification-id")
            .ok_or(MessageError::MissingField("notification-id"))?;

        let channel_type = code_field(&object, "chType")?
            .map(ChannelType::from_code)
            .unwrap_or(ChannelType::Other(0));

        let loc_args: Vec<String> = (0..)
            .map_while(|index| text_field(&object, &format!("loc-args{index}")))
            .collect();
        let sender_name = loc_args.first().cloned();
        let text = if loc_args.len() > 1 {
            loc_args.last().cloned()
        } else {
            None
        };

        let sticker = if message_type == MessageType::Sticker {
            match object.get("extras").filter(|v| !v.is_null()) {
                Some(extras) => parse_sticker(extras)?,
                None => match object.get("stkInfo") {
                    Some(info) => parse_sticker(info)?,
                    None => None,
                },
            }
        } else {
            None
        };

        let timestamp = timestamp_field(&object, "createTime")?;

        Ok(WorksMessage {
            notification_id,
            message_type,
            channel_type,
            channel_id: text_field(&object, "chNo").unwrap_or_default(),
            sender_id: text_field(&object, "fromUserNo"),
            timestamp,
            sticker,
            source: MessageSource::Notification,
            channel_title: text_field(&object, "chTitle"),
            sender_name,
            text,
            loc_key: text_field(&object, "loc-key"),
            body: Value::Object(object),
        })
    }

    fn parse_relay(relay: Map<String, Value>) -> Result<WorksMessage, MessageError> {
        let command = code_field(&relay, "cmd")?;
        let mut body = match relay.get("bdy") {
            Some(Value::Object(body)) => body.clone(),
            Some(_) => {
                return Err(MessageError::InvalidField {
                    field: "bdy",
                    message: "expected an object".to_string(),
                })
            }
            None => return Err(MessageError::MissingField("bdy")),
        };

        let code = code_field(&body, "msgTypeCode")?
            .or(command)
            .ok_or(MessageError::MissingField("cmd"))?;
        let message_type =
            MessageType::from_code(code).ok_or(MessageError::UnknownMessageType(code))?;

        let channel_id = text_field(&relay, "cid").unwrap_or_default();

        let notification_id = match text_field(&body, "msgTid") {
            Some(tid) => tid,
            None => {
                let serial =
                    text_field(&body, "msgSn").ok_or(MessageError::MissingField("msgTid"))?;
                // Read receipts share the msgSn of the message that was read
                match text_field(&body, "readerId") {
                    Some(reader) => format!("{channel_id}:{serial}:{reader}"),
                    None => format!("{channel_id}:{serial}"),
                }
            }
        };

        let channel_type = match code_field(&body, "chType")? {
            Some(code) => ChannelType::from_code(code),
            None => code_field(&relay, "chType")?
                .map(ChannelType::from_code)
                .unwrap_or(ChannelType::Other(0)),
        };

        // extras arrives as a JSON string; expose it decoded to consumers
        if let Some(Value::String(raw)) = body.get("extras") {
            match serde_json::from_str::<Value>(raw) {
                Ok(decoded) => {
                    body.insert("extras".to_string(), decoded);
                }
                Err(e) => debug!(error = %e, "Relay extras is not JSON, keeping raw string"),
            }
        }

        let sticker = if message_type == MessageType::Sticker {
            match body.get("extras").filter(|v| !v.is_null()) {
                Some(extras) => parse_sticker(extras)?,
                None => None,
            }
        } else {
            None
        };

        let sender_name = body
            .get("writerInfo")
            .and_then(|writer| writer.get("name"))
            .and_then(as_text);
        let sender_id = body
            .get("writerInfo")
            .and_then(|writer| writer.get("userNo"))
            .and_then(as_text)
            .or_else(|| text_field(&body, "userNo"));

        Ok(WorksMessage {
            notification_id,
            message_type,
            channel_type,
            channel_id,
            sender_id,
            timestamp: timestamp_field(&body, "ctime")?,
            sticker,
            source: MessageSource::Relay,
            channel_title: text_field(&body, "chTitle"),
            sender_name,
            text: text_field(&body, "msg"),
            loc_key: None,
            body: Value::Object(body),
        })
    }
}

/// Parse sticker fields from `extras` or `stkInfo`
///
/// Returns `Ok(None)` when the object carries no sticker fields at all.
fn parse_sticker(value: &Value) -> Result<Option<StickerInfo>, MessageError> {
    let decoded;
    let object = match value {
        Value::Object(object) => object,
        Value::String(raw) if raw.trim().is_empty() => return Ok(None),
        Value::String(raw) => {
            decoded = serde_json::from_str::<Value>(raw)
                .map_err(|e| MessageError::InvalidSticker(format!("extras is not JSON: {e}")))?;
            match &decoded {
                Value::Object(object) => object,
                _ => {
                    return Err(MessageError::InvalidSticker(
                        "extras is not a JSON object".to_string(),
                    ))
                }
            }
        }
        _ => {
            return Err(MessageError::InvalidSticker(
                "sticker info is not an object".to_string(),
            ))
        }
    };

    if !["stkType", "pkgId", "stkId"]
        .iter()
        .any(|key| object.contains_key(*key))
    {
        return Ok(None);
    }

    let raw_type = object
        .get("stkType")
        .and_then(Value::as_str)
        .ok_or_else(|| MessageError::InvalidSticker("missing stkType".to_string()))?;
    let sticker_type = StickerType::parse(raw_type)
        .ok_or_else(|| MessageError::InvalidSticker(format!("unknown stkType '{raw_type}'")))?;

    let package_id = object
        .get("pkgId")
        .and_then(as_text)
        .ok_or_else(|| MessageError::InvalidSticker("missing pkgId".to_string()))?;
    let sticker_id = object
        .get("stkId")
        .and_then(as_text)
        .ok_or_else(|| MessageError::InvalidSticker("missing stkId".to_string()))?;

    Ok(Some(StickerInfo {
        sticker_type,
        package_id,
        sticker_id,
        options: object.get("stkOpt").and_then(as_text),
    }))
}

/// String or number as text; empty strings count as absent
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(as_text)
}

/// Integer code from a number or numeric string
fn code_field(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<i64>, MessageError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| MessageError::InvalidField {
            field,
            message: format!("{n} is not an integer"),
        }),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| MessageError::InvalidField {
                field,
                message: format!("'{s}' is not an integer"),
            }),
        Some(other) => Err(MessageError::InvalidField {
            field,
            message: format!("unexpected value {other}"),
        }),
    }
}

/// Epoch milliseconds to UTC
fn timestamp_field(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, MessageError> {
    match code_field(object, field)? {
        None => Ok(None),
        Some(millis) => DateTime::from_timestamp_millis(millis)
            .map(Some)
            .ok_or_else(|| MessageError::InvalidField {
                field,
                message: format!("{millis} is out of range"),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<WorksMessage, MessageError> {
        MessageParser::parse(value.to_string().as_bytes())
    }

    #[test]
    fn test_text_notification() {
        let message = parse(json!({
            "nType": 1,
            "notification-id": "msg.AAA",
            "chType": 6,
            "chNo": 123456,
            "fromUserNo": "1001",
            "createTime": 1_700_000_000_000i64,
            "chTitle": "Alice",
            "loc-key": "PUSH_TEXT",
            "loc-args0": "Alice",
            "loc-args1": "hello there"
        }))
        .unwrap();

        assert_eq!(message.notification_id, "msg.AAA");
        assert_eq!(message.message_type, MessageType::Text);
        assert_eq!(message.channel_type, ChannelType::Personal);
        assert_eq!(message.channel_id, "123456");
        assert_eq!(message.sender_id.as_deref(), Some("1001"));
        assert_eq!(message.sender_name.as_deref(), Some("Alice"));
        assert_eq!(message.text.as_deref(), Some("hello there"));
        assert_eq!(message.channel_title.as_deref(), Some("Alice"));
        assert_eq!(message.loc_key.as_deref(), Some("PUSH_TEXT"));
        assert_eq!(message.source, MessageSource::Notification);
        assert_eq!(
            message.timestamp.unwrap().timestamp_millis(),
            1_700_000_000_000
        );
        assert!(message.sticker.is_none());
        assert_eq!(message.body["chTitle"], "Alice");
    }

    #[test]
    fn test_group_notification_uses_last_loc_arg() {
        let message = parse(json!({
            "nType": "1",
            "notification-id": "msg.B",
            "chType": "10",
            "loc-args0": "Bob",
            "loc-args1": "Team Room",
            "loc-args2": "see you"
        }))
        .unwrap();

        assert_eq!(message.channel_type, ChannelType::Group);
        assert_eq!(message.sender_name.as_deref(), Some("Bob"));
        assert_eq!(message.text.as_deref(), Some("see you"));
    }

    #[test]
    fn test_missing_channel_type_is_other_zero() {
        let message = parse(json!({"nType": 100, "notification-id": "n1"})).unwrap();
        assert_eq!(message.message_type, MessageType::Service);
        assert_eq!(message.channel_type, ChannelType::Other(0));
        assert_eq!(message.channel_id, "");
        assert!(message.timestamp.is_none());
    }

    #[test]
    fn test_unknown_channel_type_kept() {
        let message = parse(json!({"nType": 1, "notification-id": "n", "chType": 3})).unwrap();
        assert_eq!(message.channel_type, ChannelType::Other(3));
    }

    #[test]
    fn test_notification_requires_id() {
        assert_eq!(
            parse(json!({"nType": 1, "chNo": 5})),
            Err(MessageError::MissingField("notification-id"))
        );
    }

    #[test]
    fn test_unknown_message_type() {
        assert_eq!(
            parse(json!({"nType": 9999, "notification-id": "n"})),
            Err(MessageError::UnknownMessageType(9999))
        );
    }

    #[test]
    fn test_sticker_from_extras_string() {
        let message = parse(json!({
            "nType": 18,
            "notification-id": "stk.1",
            "chType": 6,
            "extras": "{\"stkType\":\"LINE\",\"pkgId\":11537,\"stkId\":52002734,\"stkOpt\":\"A\"}"
        }))
        .unwrap();

        let sticker = message.sticker.unwrap();
        assert_eq!(sticker.sticker_type, StickerType::Line);
        assert_eq!(sticker.package_id, "11537");
        assert_eq!(sticker.sticker_id, "52002734");
        assert_eq!(sticker.options.as_deref(), Some("A"));
    }

    #[test]
    fn test_sticker_from_stk_info() {
        let message = parse(json!({
            "nType": 18,
            "notification-id": "stk.2",
            "stkInfo": {"stkType": "works", "pkgId": "pkg", "stkId": "7"}
        }))
        .unwrap();

        let sticker = message.sticker.unwrap();
        assert_eq!(sticker.sticker_type, StickerType::Works);
        assert_eq!(sticker.options, None);
    }

    #[test]
    fn test_sticker_without_fields_is_none() {
        let message = parse(json!({"nType": 18, "notification-id": "stk.3"})).unwrap();
        assert!(message.is_sticker());
        assert!(message.sticker.is_none());

        let message = parse(json!({
            "nType": 18,
            "notification-id": "stk.4",
            "extras": "{\"other\":1}"
        }))
        .unwrap();
        assert!(message.sticker.is_none());
    }

    #[test]
    fn test_malformed_sticker_fails_parse() {
        let bad_type = parse(json!({
            "nType": 18,
            "notification-id": "stk.5",
            "stkInfo": {"stkType": "emoji", "pkgId": "1", "stkId": "2"}
        }));
        assert!(matches!(bad_type, Err(MessageError::InvalidSticker(_))));

        let missing_id = parse(json!({
            "nType": 18,
            "notification-id": "stk.6",
            "extras": "{\"stkType\":\"line\",\"pkgId\":1}"
        }));
        assert!(matches!(missing_id, Err(MessageError::InvalidSticker(_))));

        let bad_json = parse(json!({
            "nType": 18,
            "notification-id": "stk.7",
            "extras": "{not json"
        }));
        assert!(matches!(bad_json, Err(MessageError::InvalidSticker(_))));
    }

    #[test]
    fn test_extras_ignored_for_non_sticker() {
        let message = parse(json!({
            "nType": 1,
            "notification-id": "n",
            "extras": "{not json"
        }))
        .unwrap();
        assert!(message.sticker.is_none());
    }

    #[test]
    fn test_relay_message() {
        let message = parse(json!({
            "relayDataList": [{
                "cmd": 101,
                "cid": 777,
                "bdy": {
                    "msgTypeCode": 101,
                    "msgTid": "tid-1",
                    "msgSn": 42,
                    "msg": "relay text",
                    "ctime": 1_700_000_000_500i64,
                    "writerInfo": {"name": "Carol", "userNo": 55}
                }
            }]
        }))
        .unwrap();

        assert_eq!(message.source, MessageSource::Relay);
        assert_eq!(message.notification_id, "tid-1");
        assert_eq!(message.message_type, MessageType::Text);
        assert_eq!(message.channel_id, "777");
        assert_eq!(message.sender_name.as_deref(), Some("Carol"));
        assert_eq!(message.sender_id.as_deref(), Some("55"));
        assert_eq!(message.text.as_deref(), Some("relay text"));
        assert_eq!(
            message.timestamp.unwrap().timestamp_millis(),
            1_700_000_000_500
        );
    }

    #[test]
    fn test_relay_falls_back_to_cmd_and_serial() {
        let message = parse(json!({
            "relayDataList": [{
                "cmd": 93004,
                "cid": "c1",
                "bdy": {"msgSn": 9}
            }]
        }))
        .unwrap();

        assert_eq!(message.message_type, MessageType::Read);
        assert_eq!(message.notification_id, "c1:9");
    }

    #[test]
    fn test_read_receipts_keyed_per_reader() {
        let receipt = |reader: &str| {
            parse(json!({
                "relayDataList": [{
                    "cmd": 93004,
                    "cid": "c1",
                    "bdy": {"readerId": reader, "msgSn": 9}
                }]
            }))
            .unwrap()
        };

        assert_eq!(receipt("alice").notification_id, "c1:9:alice");
        assert_eq!(receipt("bob").notification_id, "c1:9:bob");
    }

    #[test]
    fn test_relay_sticker_extras_decoded() {
        let message = parse(json!({
            "relayDataList": [{
                "cmd": 101,
                "cid": "c2",
                "bdy": {
                    "msgTypeCode": 18,
                    "msgTid": "t2",
                    "extras": "{\"stkType\":\"works\",\"pkgId\":\"p\",\"stkId\":\"s\"}"
                }
            }]
        }))
        .unwrap();

        assert_eq!(message.sticker.unwrap().sticker_type, StickerType::Works);
        assert_eq!(message.body["extras"]["pkgId"], "p");
    }

    #[test]
    fn test_bare_relay_object() {
        let message = parse(json!({
            "cmd": 202,
            "cid": "c3",
            "bdy": {"msgTid": "t3"}
        }))
        .unwrap();
        assert_eq!(message.message_type, MessageType::Leave);
        assert_eq!(message.source, MessageSource::Relay);
    }

    #[test]
    fn test_relay_errors() {
        assert_eq!(
            parse(json!({"relayDataList": []})),
            Err(MessageError::EmptyRelayList)
        );
        assert_eq!(
            parse(json!({"relayDataList": [{"cmd": 101, "cid": "c"}]})),
            Err(MessageError::MissingField("bdy"))
        );
        assert_eq!(
            parse(json!({"relayDataList": [{"cmd": 101, "cid": "c", "bdy": {}}]})),
            Err(MessageError::MissingField("msgTid"))
        );
    }

    #[test]
    fn test_missing_discriminator() {
        assert_eq!(
            parse(json!({"hello": "world"})),
            Err(MessageError::MissingDiscriminator)
        );
        assert_eq!(parse(json!([1, 2])), Err(MessageError::MissingDiscriminator));
    }

    #[test]
    fn test_invalid_bytes() {
        assert_eq!(
            MessageParser::parse(&[0xFF, 0xFE]),
            Err(MessageError::InvalidUtf8)
        );
        assert!(matches!(
            MessageParser::parse(b"{not json"),
            Err(MessageError::InvalidJson(_))
        ));
    }
}
