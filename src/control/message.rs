use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::SessionError;

pub(crate) const SESSION_UPDATE: &str = "session.update";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseOptions {
    pub modalities: Vec<Modality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnDetection {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

/// 客户端下行指令，按 `type` 标签编码。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseOptions },
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionPatch },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "response.cancel")]
    ResponseCancel,
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,
}

impl ClientEvent {
    pub fn response_create(modalities: Vec<Modality>, instructions: Option<String>) -> Self {
        ClientEvent::ResponseCreate {
            response: ResponseOptions {
                modalities,
                instructions,
            },
        }
    }

    pub fn disable_turn_detection() -> Self {
        ClientEvent::SessionUpdate {
            session: SessionPatch {
                turn_detection: Some(TurnDetection { enabled: false }),
                ..SessionPatch::default()
            },
        }
    }

    pub fn user_text<S: Into<String>>(text: S) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem {
                kind: "message".into(),
                role: "user".into(),
                content: vec![ContentPart {
                    kind: "input_text".into(),
                    text: text.into(),
                }],
            },
        }
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            ClientEvent::ResponseCreate { .. } => "response.create",
            ClientEvent::SessionUpdate { .. } => SESSION_UPDATE,
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCancel => "response.cancel",
            ClientEvent::InputAudioBufferClear => "input_audio_buffer.clear",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    kind: String,
    body: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Event(ClientEvent),
    Raw(RawMessage),
}

impl From<ClientEvent> for ControlMessage {
    fn from(event: ClientEvent) -> Self {
        ControlMessage::Event(event)
    }
}

impl ControlMessage {
    /// 透传任意 JSON 指令；必须是带字符串 `type` 的对象。
    pub fn raw(value: Value) -> Result<Self, SessionError> {
        let Value::Object(body) = value else {
            return Err(SessionError::control("outbound message must be a JSON object"));
        };

        let kind = match body.get("type") {
            Some(Value::String(kind)) if !kind.is_empty() => kind.clone(),
            _ => {
                return Err(SessionError::control(
                    "outbound message requires a non-empty string `type`",
                ))
            }
        };

        Ok(ControlMessage::Raw(RawMessage { kind, body }))
    }

    pub fn message_type(&self) -> &str {
        match self {
            ControlMessage::Event(event) => event.message_type(),
            ControlMessage::Raw(raw) => &raw.kind,
        }
    }

    /// 只有 `session.update` 属于控制指令，暂停期间仍可下发。
    pub fn is_control_directive(&self) -> bool {
        self.message_type() == SESSION_UPDATE
    }

    pub fn to_wire(&self) -> Result<String, SessionError> {
        let encoded = match self {
            ControlMessage::Event(event) => serde_json::to_string(event),
            ControlMessage::Raw(raw) => serde_json::to_string(&raw.body),
        };
        encoded.map_err(|err| SessionError::control(format!("failed to encode message: {err}")))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlParseError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("control message is not a JSON object")]
    NotAnObject,
    #[error("control message missing string `type`")]
    MissingType,
    #[error("`{kind}` missing field `{field}`")]
    MissingField { kind: String, field: &'static str },
}

/// 服务端上行事件。
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    TextDelta {
        response_id: Option<String>,
        delta: String,
    },
    TextDone {
        response_id: Option<String>,
        text: Option<String>,
    },
    ResponseDone {
        response_id: Option<String>,
    },
    InputTranscript {
        item_id: Option<String>,
        transcript: String,
    },
    SpeechStarted,
    SpeechStopped,
    SessionNotice {
        kind: String,
    },
    Error {
        code: Option<String>,
        message: String,
    },
    Other {
        kind: String,
        payload: Value,
    },
}

impl ServerEvent {
    pub fn parse(raw: &str) -> Result<Self, ControlParseError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| ControlParseError::InvalidJson(err.to_string()))?;
        let Value::Object(object) = value else {
            return Err(ControlParseError::NotAnObject);
        };
        let kind = match object.get("type") {
            Some(Value::String(kind)) if !kind.is_empty() => kind.clone(),
            _ => return Err(ControlParseError::MissingType),
        };

        let event = match kind.as_str() {
            "response.text.delta" | "response.audio_transcript.delta" => ServerEvent::TextDelta {
                response_id: string_field(&object, "response_id"),
                delta: required_string(&object, &kind, "delta")?,
            },
            "text" => ServerEvent::TextDelta {
                response_id: None,
                delta: required_string(&object, &kind, "text")?,
            },
            "response.text.done" => ServerEvent::TextDone {
                response_id: string_field(&object, "response_id"),
                text: string_field(&object, "text"),
            },
            "response.audio_transcript.done" => ServerEvent::TextDone {
                response_id: string_field(&object, "response_id"),
                text: string_field(&object, "transcript"),
            },
            "response.done" => ServerEvent::ResponseDone {
                response_id: object
                    .get("response")
                    .and_then(|response| response.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            "conversation.item.input_audio_transcription.completed" => {
                ServerEvent::InputTranscript {
                    item_id: string_field(&object, "item_id"),
                    transcript: required_string(&object, &kind, "transcript")?,
                }
            }
            "input_audio_buffer.speech_started" => ServerEvent::SpeechStarted,
            "input_audio_buffer.speech_stopped" => ServerEvent::SpeechStopped,
            "session.created" | "session.updated" => ServerEvent::SessionNotice {
                kind: kind.clone(),
            },
            "error" => {
                let nested = object.get("error");
                let message = nested
                    .and_then(|error| error.get("message"))
                    .and_then(Value::as_str)
                    .or_else(|| object.get("message").and_then(Value::as_str))
                    .unwrap_or("realtime service reported an error")
                    .to_string();
                let code = nested
                    .and_then(|error| error.get("code"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                ServerEvent::Error { code, message }
            }
            _ => ServerEvent::Other {
                kind: kind.clone(),
                payload: Value::Object(object),
            },
        };

        Ok(event)
    }

    pub fn kind(&self) -> &str {
        match self {
            ServerEvent::TextDelta { .. } => "text_delta",
            ServerEvent::TextDone { .. } => "text_done",
            ServerEvent::ResponseDone { .. } => "response_done",
            ServerEvent::InputTranscript { .. } => "input_transcript",
            ServerEvent::SpeechStarted => "speech_started",
            ServerEvent::SpeechStopped => "speech_stopped",
            ServerEvent::SessionNotice { kind } => kind,
            ServerEvent::Error { .. } => "error",
            ServerEvent::Other { kind, .. } => kind,
        }
    }
}

fn string_field(object: &Map<String, Value>, field: &str) -> Option<String> {
    object.get(field).and_then(Value::as_str).map(str::to_string)
}

fn required_string(
    object: &Map<String, Value>,
    kind: &str,
    field: &'static str,
) -> Result<String, ControlParseError> {
    string_field(object, field).ok_or_else(|| ControlParseError::MissingField {
        kind: kind.to_string(),
        field,
    })
}
