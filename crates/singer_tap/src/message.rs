use std::{collections::BTreeMap, fmt};

use line_ingest::LineParser;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DecodeError, EncodeError};

/// Discriminator of a Singer protocol message (the `type` key).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Schema,
    Record,
    State,
    ActivateVersion,
}

impl MessageType {
    pub const ALL: [MessageType; 4] = [
        MessageType::Schema,
        MessageType::Record,
        MessageType::State,
        MessageType::ActivateVersion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Schema => "SCHEMA",
            MessageType::Record => "RECORD",
            MessageType::State => "STATE",
            MessageType::ActivateVersion => "ACTIVATE_VERSION",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of tap stdout.
///
/// Unknown keys on `RECORD` lines are kept in [`RecordMessage::extra`] so a message can be
/// re-serialized without loss; the protocol adds fields over time.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolMessage {
    Schema(SchemaMessage),
    Record(RecordMessage),
    State(StateMessage),
    ActivateVersion(ActivateVersionMessage),
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SchemaMessage {
    pub stream: String,
    pub schema: Value,
    #[serde(default)]
    pub key_properties: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bookmark_properties: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RecordMessage {
    pub stream: String,
    pub record: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_extracted: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct StateMessage {
    pub value: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ActivateVersionMessage {
    pub stream: String,
    pub version: u64,
}

impl ProtocolMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ProtocolMessage::Schema(_) => MessageType::Schema,
            ProtocolMessage::Record(_) => MessageType::Record,
            ProtocolMessage::State(_) => MessageType::State,
            ProtocolMessage::ActivateVersion(_) => MessageType::ActivateVersion,
        }
    }

    /// Stream name; `None` only for `STATE`.
    pub fn stream(&self) -> Option<&str> {
        match self {
            ProtocolMessage::Schema(msg) => Some(&msg.stream),
            ProtocolMessage::Record(msg) => Some(&msg.stream),
            ProtocolMessage::State(_) => None,
            ProtocolMessage::ActivateVersion(msg) => Some(&msg.stream),
        }
    }
}

/// Decodes one stdout line.
///
/// The JSON is parsed untyped first so that a bad discriminator and a bad payload are
/// reported as different failures.
pub fn decode(line: &str) -> Result<ProtocolMessage, DecodeError> {
    let value: Value =
        serde_json::from_str(line).map_err(|source| DecodeError::MalformedJson { source })?;
    if !value.is_object() {
        return Err(DecodeError::MalformedJson {
            source: <serde_json::Error as serde::de::Error>::custom("expected a JSON object"),
        });
    }

    let tag = value.get("type");
    let message_type = tag
        .and_then(Value::as_str)
        .and_then(MessageType::from_tag)
        .ok_or_else(|| DecodeError::UnknownType {
            found: tag.map(|found| match found {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            }),
        })?;

    let message: ProtocolMessage = serde_json::from_value(value).map_err(|source| {
        DecodeError::InvalidMessage {
            message_type,
            source,
        }
    })?;

    if matches!(message.stream(), Some(stream) if stream.is_empty()) {
        return Err(DecodeError::MissingStream { message_type });
    }
    Ok(message)
}

pub fn encode(message: &ProtocolMessage) -> Result<String, EncodeError> {
    serde_json::to_string(message).map_err(|source| EncodeError {
        message_type: message.message_type(),
        source,
    })
}

/// [`LineParser`] adapter so the codec can drive a line ingestor over tap stdout.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageCodec;

impl LineParser for MessageCodec {
    type Event = ProtocolMessage;
    type Error = DecodeError;

    fn parse_line(&mut self, line: &str) -> Result<Option<Self::Event>, Self::Error> {
        decode(line).map(Some)
    }
}
