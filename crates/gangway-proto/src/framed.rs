//! Digit-framed control protocol for character-stream sessions.
//!
//! A frame is `<digit><content>`: the first character carries the message
//! type, everything after it is the payload, with no escaping and no length
//! limit. The digit-to-type mapping is fixed by the gateway wire format and
//! must not be reordered.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Error = 0,
    Data = 1,
    Resize = 2,
    Join = 3,
    Exit = 4,
    DirChanged = 5,
    KeepAlive = 6,
    AuthPrompt = 7,
    AuthReply = 8,
    Ping = 9,
}

impl MessageType {
    pub const fn digit(self) -> char {
        (b'0' + self as u8) as char
    }

    pub fn from_digit(ch: char) -> Option<Self> {
        Some(match ch {
            '0' => MessageType::Error,
            '1' => MessageType::Data,
            '2' => MessageType::Resize,
            '3' => MessageType::Join,
            '4' => MessageType::Exit,
            '5' => MessageType::DirChanged,
            '6' => MessageType::KeepAlive,
            '7' => MessageType::AuthPrompt,
            '8' => MessageType::AuthReply,
            '9' => MessageType::Ping,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageType,
    pub content: String,
}

impl Message {
    pub fn new(kind: MessageType, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }

    pub fn data(content: impl Into<String>) -> Self {
        Self::new(MessageType::Data, content)
    }

    pub fn resize(cols: u16, rows: u16) -> Self {
        Self::new(MessageType::Resize, format!("{cols},{rows}"))
    }

    pub fn keep_alive() -> Self {
        Self::new(MessageType::KeepAlive, "")
    }

    pub fn encode(&self) -> String {
        let mut raw = String::with_capacity(1 + self.content.len());
        raw.push(self.kind.digit());
        raw.push_str(&self.content);
        raw
    }

    /// Decode a raw frame. This codec has no error path: an empty frame and a
    /// frame whose first character is not a known digit both map to a `Data`
    /// message carrying whatever content remains. Deployed gateways rely on
    /// the empty-frame mapping, so it is pinned by test rather than rejected.
    pub fn decode(raw: &str) -> Self {
        let mut chars = raw.chars();
        match chars.next().and_then(MessageType::from_digit) {
            Some(kind) => Self::new(kind, chars.as_str()),
            None => Self::data(raw),
        }
    }
}
