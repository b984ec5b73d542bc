use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::error::HubError;

/// Represents the raw bytes of a serialized SignalR message,
/// whether it travels as UTF-8 text or as binary frames.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    /// Text payload
    Text(String),
    /// Binary payload
    Binary(Vec<u8>),
}

impl MessagePayload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            MessagePayload::Text(text) => text.as_bytes(),
            MessagePayload::Binary(data) => data,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }
}

/// Whether wire frames are UTF-8 text or raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferFormat {
    Text,
    Binary,
}

impl TransferFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferFormat::Text => "Text",
            TransferFormat::Binary => "Binary",
        }
    }
}

/// Message kinds as numbered on the wire.
#[derive(Serialize_repr, Deserialize_repr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Invocation = 1,
    StreamItem = 2,
    Completion = 3,
    StreamInvocation = 4,
    CancelInvocation = 5,
    Ping = 6,
    Close = 7,
}

impl MessageType {
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(MessageType::Invocation),
            2 => Some(MessageType::StreamItem),
            3 => Some(MessageType::Completion),
            4 => Some(MessageType::StreamInvocation),
            5 => Some(MessageType::CancelInvocation),
            6 => Some(MessageType::Ping),
            7 => Some(MessageType::Close),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvocationMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamInvocationMessage {
    pub invocation_id: String,
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamItemMessage {
    pub invocation_id: String,
    pub item: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMessage {
    pub invocation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CancelInvocationMessage {
    pub invocation_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CloseMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A decoded hub message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation(InvocationMessage),
    StreamInvocation(StreamInvocationMessage),
    StreamItem(StreamItemMessage),
    Completion(CompletionMessage),
    CancelInvocation(CancelInvocationMessage),
    Ping,
    Close(CloseMessage),
}

impl HubMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            HubMessage::Invocation(_) => MessageType::Invocation,
            HubMessage::StreamInvocation(_) => MessageType::StreamInvocation,
            HubMessage::StreamItem(_) => MessageType::StreamItem,
            HubMessage::Completion(_) => MessageType::Completion,
            HubMessage::CancelInvocation(_) => MessageType::CancelInvocation,
            HubMessage::Ping => MessageType::Ping,
            HubMessage::Close(_) => MessageType::Close,
        }
    }

    /// The correlation id, for the message kinds that carry one.
    pub fn invocation_id(&self) -> Option<&str> {
        match self {
            HubMessage::Invocation(m) => m.invocation_id.as_deref(),
            HubMessage::StreamInvocation(m) => Some(&m.invocation_id),
            HubMessage::StreamItem(m) => Some(&m.invocation_id),
            HubMessage::Completion(m) => Some(&m.invocation_id),
            HubMessage::CancelInvocation(m) => Some(&m.invocation_id),
            HubMessage::Ping | HubMessage::Close(_) => None,
        }
    }
}

/// A wire encoding for hub messages.
///
/// JSON ships with the crate; any other encoding plugs in by implementing this trait.
pub trait HubProtocol: Send + Sync {
    /// Protocol name sent in the handshake.
    fn name(&self) -> &str;
    fn version(&self) -> u32;
    /// Transfer format the transport has to carry for this encoding.
    fn transfer_format(&self) -> TransferFormat;
    fn parse_messages(&self, input: &MessagePayload) -> Result<Vec<HubMessage>, HubError>;
    fn write_message(&self, message: &HubMessage) -> Result<MessagePayload, HubError>;
}
