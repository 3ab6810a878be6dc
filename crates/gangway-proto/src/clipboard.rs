//! Clipboard stream codec.
//!
//! Clipboard transfers ride on the instruction protocol's stream abstraction:
//! a `clipboard` instruction announces a numbered stream and its mime type,
//! `blob` instructions carry base64 chunks, and a single `end` instruction
//! finalizes the stream. Text payloads split into multiple chunks; binary
//! payloads travel as one chunk, separately finalized.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::instruction::Instruction;

/// Maximum chars of clipboard text carried per chunk before encoding.
pub const CLIPBOARD_CHUNK_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardMime {
    Text,
    Binary,
}

impl ClipboardMime {
    pub const fn as_str(self) -> &'static str {
        match self {
            ClipboardMime::Text => "text/plain",
            ClipboardMime::Binary => "application/octet-stream",
        }
    }

    /// Best-effort classification: anything that is not `text/*` is treated
    /// as binary and decoded lossily on completion.
    pub fn classify(mime: &str) -> Self {
        if mime.starts_with("text/") {
            ClipboardMime::Text
        } else {
            ClipboardMime::Binary
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardChunk {
    pub mime: ClipboardMime,
    pub payload: Vec<u8>,
    pub last: bool,
}

impl ClipboardChunk {
    pub fn end_marker(mime: ClipboardMime) -> Self {
        Self {
            mime,
            payload: Vec::new(),
            last: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardPayload {
    Text(String),
    Binary(Vec<u8>),
}

impl ClipboardPayload {
    /// Text view of the payload; binary decodes best-effort.
    pub fn into_text(self) -> String {
        match self {
            ClipboardPayload::Text(text) => text,
            ClipboardPayload::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

/// Split clipboard text into data chunks plus exactly one end marker.
pub fn split_text(text: &str) -> Vec<ClipboardChunk> {
    let mut chunks = Vec::new();
    let mut remaining = text;
    loop {
        let take = remaining
            .char_indices()
            .nth(CLIPBOARD_CHUNK_LEN)
            .map(|(pos, _)| pos)
            .unwrap_or(remaining.len());
        let (head, tail) = remaining.split_at(take);
        chunks.push(ClipboardChunk {
            mime: ClipboardMime::Text,
            payload: head.as_bytes().to_vec(),
            last: false,
        });
        remaining = tail;
        if remaining.is_empty() {
            break;
        }
    }
    chunks.push(ClipboardChunk::end_marker(ClipboardMime::Text));
    chunks
}

/// Binary clipboard content travels as a single write, separately finalized.
pub fn split_binary(data: &[u8]) -> Vec<ClipboardChunk> {
    vec![
        ClipboardChunk {
            mime: ClipboardMime::Binary,
            payload: data.to_vec(),
            last: false,
        },
        ClipboardChunk::end_marker(ClipboardMime::Binary),
    ]
}

/// Map a chunk onto the wire: data chunks become `blob`, the end marker
/// becomes `end`. The stream must already have been announced with
/// [`announce`].
pub fn chunk_instruction(stream: u32, chunk: &ClipboardChunk) -> Instruction {
    if chunk.last {
        Instruction::end(stream)
    } else {
        Instruction::blob(stream, &BASE64.encode(&chunk.payload))
    }
}

pub fn announce(stream: u32, mime: ClipboardMime) -> Instruction {
    Instruction::clipboard(stream, mime.as_str())
}

/// Reassembles one inbound clipboard stream. `push` returns the completed
/// payload once the end marker arrives; blobs with undecodable base64 are
/// dropped rather than aborting the stream.
#[derive(Debug)]
pub struct ClipboardAssembler {
    mime: ClipboardMime,
    buffer: Vec<u8>,
}

impl ClipboardAssembler {
    pub fn new(mime: ClipboardMime) -> Self {
        Self {
            mime,
            buffer: Vec::new(),
        }
    }

    pub fn mime(&self) -> ClipboardMime {
        self.mime
    }

    pub fn push_blob(&mut self, base64_data: &str) {
        if let Ok(bytes) = BASE64.decode(base64_data) {
            self.buffer.extend_from_slice(&bytes);
        }
    }

    pub fn finish(self) -> ClipboardPayload {
        match self.mime {
            ClipboardMime::Text => {
                ClipboardPayload::Text(String::from_utf8_lossy(&self.buffer).into_owned())
            }
            ClipboardMime::Binary => ClipboardPayload::Binary(self.buffer),
        }
    }
}
