//! 控制通道：结构化指令下发与服务端事件解析。

pub mod channel;
pub mod message;

pub use channel::{ControlChannel, SendGate, SendOutcome, SuppressReason};
pub use message::{
    ClientEvent, ControlMessage, ControlParseError, ConversationItem, Modality, ResponseOptions,
    ServerEvent, SessionPatch, TurnDetection,
};
