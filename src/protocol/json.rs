use log::{debug, warn};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::HubError;

use super::hub_protocol::{
    CancelInvocationMessage, CloseMessage, CompletionMessage, HubMessage, HubProtocol, InvocationMessage, MessagePayload,
    MessageType, StreamInvocationMessage, StreamItemMessage, TransferFormat,
};
use super::messages::TextMessageFormat;

const JSON_HUB_PROTOCOL_NAME: &str = "json";

/// The JSON hub protocol, version 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonHubProtocol;

impl JsonHubProtocol {
    pub fn new() -> Self {
        JsonHubProtocol
    }

    fn parse_record(record: &str) -> Result<Option<HubMessage>, HubError> {
        let value: Value = serde_json::from_str(record).map_err(|e| HubError::Protocol(format!("Invalid payload: {}", e)))?;
        let object = value
            .as_object()
            .ok_or_else(|| HubError::Protocol("Invalid payload.".to_string()))?;
        let code = object
            .get("type")
            .and_then(Value::as_u64)
            .ok_or_else(|| HubError::Protocol("Invalid payload.".to_string()))?;

        let Some(message_type) = MessageType::from_code(code) else {
            debug!("Unknown message type '{}' ignored.", code);
            return Ok(None);
        };

        let message = match message_type {
            MessageType::Invocation => {
                require_non_empty(object, "target", "Invalid payload for Invocation message.")?;
                if object.contains_key("invocationId") {
                    require_non_empty(object, "invocationId", "Invalid payload for Invocation message.")?;
                }
                HubMessage::Invocation(decode::<InvocationMessage>(value)?)
            },
            MessageType::StreamInvocation => {
                require_non_empty(object, "target", "Invalid payload for StreamInvocation message.")?;
                require_non_empty(object, "invocationId", "Invalid payload for StreamInvocation message.")?;
                HubMessage::StreamInvocation(decode::<StreamInvocationMessage>(value)?)
            },
            MessageType::StreamItem => {
                require_non_empty(object, "invocationId", "Invalid payload for StreamItem message.")?;
                if !object.contains_key("item") {
                    return Err(HubError::Protocol("Invalid payload for StreamItem message.".to_string()));
                }
                HubMessage::StreamItem(decode::<StreamItemMessage>(value)?)
            },
            MessageType::Completion => {
                require_non_empty(object, "invocationId", "Invalid payload for Completion message.")?;
                let has_result = object.get("result").is_some_and(|r| !r.is_null());
                let has_error = object.get("error").is_some_and(|e| !e.is_null());

                if has_result && has_error {
                    return Err(HubError::Protocol("Invalid payload for Completion message.".to_string()));
                }
                if has_error {
                    require_non_empty(object, "error", "Invalid payload for Completion message.")?;
                }
                HubMessage::Completion(decode::<CompletionMessage>(value)?)
            },
            MessageType::CancelInvocation => {
                require_non_empty(object, "invocationId", "Invalid payload for CancelInvocation message.")?;
                HubMessage::CancelInvocation(decode::<CancelInvocationMessage>(value)?)
            },
            MessageType::Ping => HubMessage::Ping,
            MessageType::Close => HubMessage::Close(decode::<CloseMessage>(value)?),
        };

        Ok(Some(message))
    }
}

fn require_non_empty(object: &Map<String, Value>, key: &str, error: &str) -> Result<(), HubError> {
    match object.get(key).and_then(Value::as_str) {
        Some(text) if !text.is_empty() => Ok(()),
        _ => Err(HubError::Protocol(error.to_string())),
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, HubError> {
    serde_json::from_value(value).map_err(|e| HubError::Protocol(format!("Invalid payload: {}", e)))
}

fn encode<T: Serialize>(message_type: MessageType, body: &T) -> Result<String, HubError> {
    let mut value = serde_json::to_value(body)?;

    if let Value::Object(map) = &mut value {
        map.insert("type".to_string(), serde_json::to_value(message_type)?);
    }

    Ok(serde_json::to_string(&value)?)
}

impl HubProtocol for JsonHubProtocol {
    fn name(&self) -> &str {
        JSON_HUB_PROTOCOL_NAME
    }

    fn version(&self) -> u32 {
        1
    }

    fn transfer_format(&self) -> TransferFormat {
        TransferFormat::Text
    }

    fn parse_messages(&self, input: &MessagePayload) -> Result<Vec<HubMessage>, HubError> {
        let text = match input {
            MessagePayload::Text(text) => text.as_str(),
            MessagePayload::Binary(_) => {
                return Err(HubError::Protocol("Invalid input for JSON hub protocol. Expected a string.".to_string()));
            },
        };

        if text.is_empty() {
            return Ok(Vec::new());
        }

        let mut messages = Vec::new();

        for record in TextMessageFormat::parse(text)? {
            if record.is_empty() {
                warn!("Empty record skipped.");
                continue;
            }

            if let Some(message) = JsonHubProtocol::parse_record(&record)? {
                messages.push(message);
            }
        }

        Ok(messages)
    }

    fn write_message(&self, message: &HubMessage) -> Result<MessagePayload, HubError> {
        let message_type = message.message_type();
        let json = match message {
            HubMessage::Invocation(m) => encode(message_type, m)?,
            HubMessage::StreamInvocation(m) => encode(message_type, m)?,
            HubMessage::StreamItem(m) => encode(message_type, m)?,
            HubMessage::Completion(m) => encode(message_type, m)?,
            HubMessage::CancelInvocation(m) => encode(message_type, m)?,
            HubMessage::Ping => encode(message_type, &Map::new())?,
            HubMessage::Close(m) => encode(message_type, m)?,
        };

        Ok(MessagePayload::Text(TextMessageFormat::write(&json)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse(text: &str) -> Result<Vec<HubMessage>, HubError> {
        JsonHubProtocol::new().parse_messages(&MessagePayload::Text(text.to_string()))
    }

    #[test]
    fn test_write_invocation() {
        let message = HubMessage::Invocation(InvocationMessage {
            invocation_id: Some("1".to_string()),
            target: "Add".to_string(),
            arguments: vec![json!(1), json!(2)],
        });

        let MessagePayload::Text(text) = JsonHubProtocol::new().write_message(&message).unwrap() else {
            panic!("JSON protocol must write text");
        };
        let record = text.strip_suffix('\u{1e}').unwrap();
        let value: Value = serde_json::from_str(record).unwrap();
        assert_eq!(value, json!({"type": 1, "invocationId": "1", "target": "Add", "arguments": [1, 2]}));
    }

    #[test]
    fn test_write_send_omits_invocation_id() {
        let message = HubMessage::Invocation(InvocationMessage {
            invocation_id: None,
            target: "Broadcast".to_string(),
            arguments: vec![],
        });

        let payload = JsonHubProtocol::new().write_message(&message).unwrap();
        let text = std::str::from_utf8(payload.as_bytes()).unwrap();
        assert!(!text.contains("invocationId"));
    }

    #[test]
    fn test_written_messages_parse_back() {
        let protocol = JsonHubProtocol::new();
        let messages = vec![
            HubMessage::StreamItem(StreamItemMessage { invocation_id: "2".to_string(), item: json!({"a": 1}) }),
            HubMessage::Completion(CompletionMessage {
                invocation_id: "3".to_string(),
                result: None,
                error: Some("boom".to_string()),
            }),
            HubMessage::Ping,
            HubMessage::Close(CloseMessage::default()),
        ];

        for message in messages {
            let payload = protocol.write_message(&message).unwrap();
            assert_eq!(protocol.parse_messages(&payload).unwrap(), vec![message]);
        }
    }

    #[test]
    fn test_parse_batch() {
        let messages = parse("{\"type\":6}\u{1e}{\"type\":3,\"invocationId\":\"1\",\"result\":42}\u{1e}").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], HubMessage::Ping);
        assert!(matches!(&messages[1], HubMessage::Completion(c) if c.result == Some(json!(42))));
    }

    #[test]
    fn test_unknown_message_type_is_skipped() {
        let messages = parse("{\"type\":99}\u{1e}{\"type\":6}\u{1e}").unwrap();
        assert_eq!(messages, vec![HubMessage::Ping]);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(parse("").unwrap(), Vec::new());
    }

    #[test]
    fn test_binary_input_rejected() {
        let result = JsonHubProtocol::new().parse_messages(&MessagePayload::Binary(vec![1, 2]));
        assert!(matches!(result, Err(HubError::Protocol(_))));
    }

    #[test]
    fn test_invalid_payloads() {
        let invalid = [
            "{\"type\":1,\"arguments\":[]}",
            "{\"type\":1,\"target\":\"\",\"arguments\":[]}",
            "{\"type\":1,\"target\":\"A\",\"invocationId\":\"\",\"arguments\":[]}",
            "{\"type\":2,\"invocationId\":\"1\"}",
            "{\"type\":2,\"item\":1}",
            "{\"type\":3,\"invocationId\":\"1\",\"result\":1,\"error\":\"e\"}",
            "{\"type\":3,\"invocationId\":\"1\",\"error\":\"\"}",
            "{\"type\":3}",
            "[1,2]",
            "{\"target\":\"A\"}",
        ];

        for record in invalid {
            let result = parse(&TextMessageFormat::write(record));
            assert!(matches!(result, Err(HubError::Protocol(_))), "{} should be rejected", record);
        }
    }

    #[test]
    fn test_stream_item_with_null_item() {
        let messages = parse("{\"type\":2,\"invocationId\":\"1\",\"item\":null}\u{1e}").unwrap();
        assert!(matches!(&messages[0], HubMessage::StreamItem(s) if s.item.is_null()));
    }

    #[test]
    fn test_incomplete_input() {
        assert_eq!(parse("{\"type\":6}"), Err(HubError::IncompleteMessage));
    }
}
