use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HubError;

use super::hub_protocol::MessagePayload;
use super::messages::{TextMessageFormat, RECORD_SEPARATOR_BYTE};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl HandshakeRequest {
    pub fn new(protocol: impl Into<String>, version: u32) -> Self {
        HandshakeRequest { protocol: protocol.into(), version }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor_version: Option<u32>,
}

/// Builds the capability request and peels the server's answer off a buffer.
pub struct HandshakeProtocol;

impl HandshakeProtocol {
    pub fn write_request(request: &HandshakeRequest) -> Result<String, HubError> {
        Ok(TextMessageFormat::write(&serde_json::to_string(request)?))
    }

    /// Strips exactly one record from the front of `data`.
    ///
    /// Anything after that record is returned in the payload's original shape, since a
    /// single read may carry the handshake answer and the first hub message together.
    pub fn parse_response(data: &MessagePayload) -> Result<(Option<MessagePayload>, HandshakeResponse), HubError> {
        let bytes = data.as_bytes();
        let separator = bytes
            .iter()
            .position(|b| *b == RECORD_SEPARATOR_BYTE)
            .ok_or(HubError::IncompleteMessage)?;
        let response_length = separator + 1;

        let record = std::str::from_utf8(&bytes[..response_length])
            .map_err(|e| HubError::Handshake(format!("handshake response is not valid UTF-8: {}", e)))?;

        let remainder = if bytes.len() > response_length {
            Some(match data {
                MessagePayload::Text(text) => MessagePayload::Text(text[response_length..].to_string()),
                MessagePayload::Binary(raw) => MessagePayload::Binary(raw[response_length..].to_vec()),
            })
        } else {
            None
        };

        let records = TextMessageFormat::parse(record)?;
        let first = records.first().ok_or(HubError::IncompleteMessage)?;
        let value: Value = serde_json::from_str(first)
            .map_err(|e| HubError::Handshake(format!("error parsing handshake response: {}", e)))?;

        if value.get("type").is_some() {
            return Err(HubError::Handshake("Expected a handshake response from the server.".to_string()));
        }

        let response: HandshakeResponse = serde_json::from_value(value)
            .map_err(|e| HubError::Handshake(format!("error parsing handshake response: {}", e)))?;

        Ok((remainder, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_request() {
        let request = HandshakeProtocol::write_request(&HandshakeRequest::new("json", 1)).unwrap();
        assert_eq!(request, "{\"protocol\":\"json\",\"version\":1}\u{1e}");
    }

    #[test]
    fn test_parse_response_without_remainder() {
        let (remainder, response) = HandshakeProtocol::parse_response(&MessagePayload::Text("{}\u{1e}".to_string())).unwrap();
        assert!(remainder.is_none());
        assert_eq!(response, HandshakeResponse::default());
    }

    #[test]
    fn test_parse_response_keeps_remainder() {
        let data = MessagePayload::Text("{}\u{1e}{\"type\":6}\u{1e}".to_string());
        let (remainder, _) = HandshakeProtocol::parse_response(&data).unwrap();
        assert_eq!(remainder, Some(MessagePayload::Text("{\"type\":6}\u{1e}".to_string())));

        let mut raw = b"{}\x1e".to_vec();
        raw.extend_from_slice(&[0x02, 0x91, 0x06]);
        let (remainder, _) = HandshakeProtocol::parse_response(&MessagePayload::Binary(raw)).unwrap();
        assert_eq!(remainder, Some(MessagePayload::Binary(vec![0x02, 0x91, 0x06])));
    }

    #[test]
    fn test_parse_response_error_field() {
        let data = MessagePayload::Text("{\"error\":\"Requested protocol 'foo' is not available.\"}\u{1e}".to_string());
        let (_, response) = HandshakeProtocol::parse_response(&data).unwrap();
        assert_eq!(response.error.as_deref(), Some("Requested protocol 'foo' is not available."));
    }

    #[test]
    fn test_parse_response_rejects_hub_message() {
        let data = MessagePayload::Text("{\"type\":6}\u{1e}".to_string());
        assert!(matches!(HandshakeProtocol::parse_response(&data), Err(HubError::Handshake(_))));
    }

    #[test]
    fn test_parse_response_incomplete() {
        let data = MessagePayload::Text("{}".to_string());
        assert_eq!(HandshakeProtocol::parse_response(&data), Err(HubError::IncompleteMessage));
    }
}
