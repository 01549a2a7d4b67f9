//! Application message types and their JSON wire representation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};

/// Kind of application message, carried as the `type` field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Question,
    Answer,
    Text,
    ParticipantJoined,
    ParticipantLeft,
    ConnectionEstablished,
    Disconnect,
    RoomCreated,
    RoomJoined,
    RoomFull,
}

impl MessageKind {
    /// Every kind, in wire-table order.
    pub const ALL: [MessageKind; 10] = [
        Self::Question,
        Self::Answer,
        Self::Text,
        Self::ParticipantJoined,
        Self::ParticipantLeft,
        Self::ConnectionEstablished,
        Self::Disconnect,
        Self::RoomCreated,
        Self::RoomJoined,
        Self::RoomFull,
    ];

    /// Name used in the `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Answer => "answer",
            Self::Text => "message",
            Self::ParticipantJoined => "participant_joined",
            Self::ParticipantLeft => "participant_left",
            Self::ConnectionEstablished => "connection_established",
            Self::Disconnect => "disconnect",
            Self::RoomCreated => "room_created",
            Self::RoomJoined => "room_joined",
            Self::RoomFull => "room_full",
        }
    }

    /// Looks up a kind by its wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A yes/no question asked by the questioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    /// Name of the animation the answerer's screen plays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation: Option<String>,
}

/// Answer categories. `Text` is a free-form reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    Yes,
    No,
    Maybe,
    Refuse,
    Text,
}

impl AnswerKind {
    /// Default text shown for a canned answer.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Yes => "Yes",
            Self::No => "No",
            Self::Maybe => "Maybe",
            Self::Refuse => "I'd rather not answer",
            Self::Text => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: AnswerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
}

/// Free text chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub text: String,
}

/// Role a participant plays in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Questioner,
    Answerer,
}

/// Payload of `participant_joined` and `participant_left`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub room_id: String,
    pub role: ParticipantRole,
}

/// Sent by each side once the channel opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEstablished {
    pub device_id: String,
    pub is_host: bool,
}

/// Announces an intentional disconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disconnect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCreated {
    pub room_id: String,
    pub creator_role: ParticipantRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoined {
    pub room_id: String,
    pub joiner_role: ParticipantRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomFull {
    pub room_id: String,
}

/// Typed message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Question(Question),
    Answer(Answer),
    Text(TextMessage),
    ParticipantJoined(Participant),
    ParticipantLeft(Participant),
    ConnectionEstablished(ConnectionEstablished),
    Disconnect(Disconnect),
    RoomCreated(RoomCreated),
    RoomJoined(RoomJoined),
    RoomFull(RoomFull),
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Question(_) => MessageKind::Question,
            Self::Answer(_) => MessageKind::Answer,
            Self::Text(_) => MessageKind::Text,
            Self::ParticipantJoined(_) => MessageKind::ParticipantJoined,
            Self::ParticipantLeft(_) => MessageKind::ParticipantLeft,
            Self::ConnectionEstablished(_) => MessageKind::ConnectionEstablished,
            Self::Disconnect(_) => MessageKind::Disconnect,
            Self::RoomCreated(_) => MessageKind::RoomCreated,
            Self::RoomJoined(_) => MessageKind::RoomJoined,
            Self::RoomFull(_) => MessageKind::RoomFull,
        }
    }

    fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            Self::Question(data) => serde_json::to_value(data),
            Self::Answer(data) => serde_json::to_value(data),
            Self::Text(data) => serde_json::to_value(data),
            Self::ParticipantJoined(data) | Self::ParticipantLeft(data) => {
                serde_json::to_value(data)
            }
            Self::ConnectionEstablished(data) => serde_json::to_value(data),
            Self::Disconnect(data) => serde_json::to_value(data),
            Self::RoomCreated(data) => serde_json::to_value(data),
            Self::RoomJoined(data) => serde_json::to_value(data),
            Self::RoomFull(data) => serde_json::to_value(data),
        }
    }

    fn from_value(kind: MessageKind, data: Value) -> serde_json::Result<Self> {
        // Peers may omit `data` for body-less kinds.
        let data = if data.is_null() {
            Value::Object(Default::default())
        } else {
            data
        };
        Ok(match kind {
            MessageKind::Question => Self::Question(serde_json::from_value(data)?),
            MessageKind::Answer => Self::Answer(serde_json::from_value(data)?),
            MessageKind::Text => Self::Text(serde_json::from_value(data)?),
            MessageKind::ParticipantJoined => Self::ParticipantJoined(serde_json::from_value(data)?),
            MessageKind::ParticipantLeft => Self::ParticipantLeft(serde_json::from_value(data)?),
            MessageKind::ConnectionEstablished => {
                Self::ConnectionEstablished(serde_json::from_value(data)?)
            }
            MessageKind::Disconnect => Self::Disconnect(serde_json::from_value(data)?),
            MessageKind::RoomCreated => Self::RoomCreated(serde_json::from_value(data)?),
            MessageKind::RoomJoined => Self::RoomJoined(serde_json::from_value(data)?),
            MessageKind::RoomFull => Self::RoomFull(serde_json::from_value(data)?),
        })
    }
}

/// An application message with its send timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn new(payload: Payload) -> Self {
        Self::with_timestamp(payload, Utc::now())
    }

    pub fn with_timestamp(payload: Payload, timestamp: DateTime<Utc>) -> Self {
        Self { payload, timestamp }
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    pub fn question(text: impl Into<String>) -> Self {
        Self::new(Payload::Question(Question {
            text: text.into(),
            animation: None,
        }))
    }

    /// Canned answer using the kind's default label.
    pub fn answer(kind: AnswerKind) -> Self {
        Self::answer_with_text(kind, kind.label())
    }

    pub fn answer_with_text(kind: AnswerKind, text: impl Into<String>) -> Self {
        Self::new(Payload::Answer(Answer {
            text: text.into(),
            kind,
            sound: None,
        }))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Payload::Text(TextMessage { text: text.into() }))
    }

    pub fn connection_established(device_id: impl Into<String>, is_host: bool) -> Self {
        Self::new(Payload::ConnectionEstablished(ConnectionEstablished {
            device_id: device_id.into(),
            is_host,
        }))
    }

    pub fn disconnect(reason: Option<String>) -> Self {
        Self::new(Payload::Disconnect(Disconnect { reason }))
    }

    /// Encodes the message as `{"type", "data", "timestamp"}` JSON.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        let wire = WireMessage {
            kind: self.kind().as_str().to_string(),
            data: self.payload.to_value()?,
            timestamp: self.timestamp,
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Decodes a JSON message.
    ///
    /// Returns [`ProtocolError::UnknownKind`] for a well-formed message whose
    /// `type` is not recognized.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        let wire: WireMessage = serde_json::from_slice(bytes)?;
        let kind = MessageKind::from_wire(&wire.kind)
            .ok_or_else(|| ProtocolError::UnknownKind(wire.kind.clone()))?;
        let payload = Payload::from_value(kind, wire.data)?;
        Ok(Self::with_timestamp(payload, wire.timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn kind_names_are_unique_and_resolvable() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::from_wire("message"), Some(MessageKind::Text));
        assert_eq!(MessageKind::from_wire("ping"), None);
    }

    #[test]
    fn question_wire_shape() {
        let msg = Message::with_timestamp(
            Payload::Question(Question {
                text: "Tea?".to_string(),
                animation: None,
            }),
            fixed_time(),
        );
        let value: Value = serde_json::from_slice(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "question");
        assert_eq!(value["data"]["text"], "Tea?");
        assert!(value["data"].get("animation").is_none());
        assert_eq!(value["timestamp"], "2025-03-14T09:26:53Z");
    }

    #[test]
    fn answer_uses_type_field() {
        let msg = Message::answer(AnswerKind::Maybe);
        let value: Value = serde_json::from_slice(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["data"]["type"], "maybe");
        assert_eq!(value["data"]["text"], "Maybe");
    }

    #[test]
    fn decode_camel_case_fields() {
        let json = br#"{"type":"participant_joined","data":{"roomId":"ABC123","role":"answerer"},"timestamp":"2025-03-14T09:26:53Z"}"#;
        let msg = Message::from_json(json).unwrap();
        assert_eq!(
            msg.payload,
            Payload::ParticipantJoined(Participant {
                room_id: "ABC123".to_string(),
                role: ParticipantRole::Answerer,
            })
        );
        assert_eq!(msg.timestamp, fixed_time());
    }

    #[test]
    fn decode_without_data_or_timestamp() {
        let msg = Message::from_json(br#"{"type":"disconnect"}"#).unwrap();
        assert_eq!(msg.payload, Payload::Disconnect(Disconnect::default()));
    }

    #[test]
    fn decode_unknown_kind() {
        let err = Message::from_json(br#"{"type":"typing","data":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownKind(ref k) if k == "typing"));
        assert!(!err.is_decode_error());
    }

    #[test]
    fn decode_malformed() {
        let err = Message::from_json(b"{not json").unwrap_err();
        assert!(err.is_decode_error());

        // Right type, wrong body.
        let err = Message::from_json(br#"{"type":"question","data":{"txt":"x"}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Serialization(_)));

        let err = Message::from_json(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn unicode_text_survives() {
        let msg = Message::text("Ça va? 🙂");
        let decoded = Message::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }
}
