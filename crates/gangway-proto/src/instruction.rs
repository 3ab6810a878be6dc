//! Length-prefixed instruction protocol for structured-instruction sessions.
//!
//! An instruction is a sequence of elements, each encoded as
//! `<length>.<value>` where `length` counts Unicode scalar values. Elements
//! are joined by `,` and the instruction is terminated by `;`. The first
//! element is the opcode, the rest are arguments. Because every value is
//! length-prefixed, no escaping is needed and payloads may contain the
//! delimiter characters freely.

use thiserror::Error;

/// Opcodes exchanged with the gateway. Clients emit the input, geometry and
/// stream opcodes; servers emit display, stream and negotiation opcodes.
pub mod opcodes {
    pub const KEY: &str = "key";
    pub const MOUSE: &str = "mouse";
    pub const SIZE: &str = "size";
    pub const CLIPBOARD: &str = "clipboard";
    pub const BLOB: &str = "blob";
    pub const END: &str = "end";
    pub const ARGV: &str = "argv";
    pub const REQUIRED: &str = "required";
    pub const CURSOR: &str = "cursor";
    pub const SYNC: &str = "sync";
    pub const NOP: &str = "nop";
    pub const ERROR: &str = "error";
    pub const DISCONNECT: &str = "disconnect";
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InstructionError {
    #[error("invalid element length at byte {0}")]
    BadLength(usize),
    #[error("instruction ends before its terminator")]
    Incomplete,
    #[error("expected ',' or ';' after element, found {0:?}")]
    BadTerminator(char),
    #[error("trailing data after instruction terminator")]
    TrailingData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: String,
    pub args: Vec<String>,
}

impl Instruction {
    pub fn new(opcode: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            opcode: opcode.into(),
            args,
        }
    }

    pub fn key(keysym: u32, pressed: bool) -> Self {
        Self::new(
            opcodes::KEY,
            vec![keysym.to_string(), u8::from(pressed).to_string()],
        )
    }

    pub fn mouse(x: i32, y: i32, button_mask: u8) -> Self {
        Self::new(
            opcodes::MOUSE,
            vec![x.to_string(), y.to_string(), button_mask.to_string()],
        )
    }

    pub fn size(width: u32, height: u32) -> Self {
        Self::new(opcodes::SIZE, vec![width.to_string(), height.to_string()])
    }

    pub fn clipboard(stream: u32, mime: &str) -> Self {
        Self::new(opcodes::CLIPBOARD, vec![stream.to_string(), mime.into()])
    }

    pub fn blob(stream: u32, base64_data: &str) -> Self {
        Self::new(opcodes::BLOB, vec![stream.to_string(), base64_data.into()])
    }

    pub fn end(stream: u32) -> Self {
        Self::new(opcodes::END, vec![stream.to_string()])
    }

    pub fn argv(stream: u32, mime: &str, name: &str) -> Self {
        Self::new(
            opcodes::ARGV,
            vec![stream.to_string(), mime.into(), name.into()],
        )
    }

    pub fn sync(timestamp: &str) -> Self {
        Self::new(opcodes::SYNC, vec![timestamp.into()])
    }

    pub fn nop() -> Self {
        Self::new(opcodes::NOP, vec![])
    }

    pub fn disconnect() -> Self {
        Self::new(opcodes::DISCONNECT, vec![])
    }

    /// Argument accessor; missing arguments read as the empty string, which
    /// matches how the gateway pads optional trailing arguments.
    pub fn arg(&self, index: usize) -> &str {
        self.args.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        push_element(&mut out, &self.opcode);
        for arg in &self.args {
            out.push(',');
            push_element(&mut out, arg);
        }
        out.push(';');
        out
    }

    /// Parse exactly one instruction; trailing bytes are an error.
    pub fn parse(raw: &str) -> Result<Self, InstructionError> {
        match parse_prefix(raw)? {
            Some((instruction, rest)) if rest.is_empty() => Ok(instruction),
            Some(_) => Err(InstructionError::TrailingData),
            None => Err(InstructionError::Incomplete),
        }
    }
}

fn push_element(out: &mut String, value: &str) {
    let len = value.chars().count();
    out.push_str(&len.to_string());
    out.push('.');
    out.push_str(value);
}

/// Parse one instruction from the front of `raw`. Returns `Ok(None)` when the
/// buffer holds only an incomplete prefix and more input is needed.
fn parse_prefix(raw: &str) -> Result<Option<(Instruction, &str)>, InstructionError> {
    let mut rest = raw;
    let mut elements: Vec<String> = Vec::new();
    loop {
        let dot = match rest.find('.') {
            Some(pos) => pos,
            None => {
                // Nothing but (possibly partial) digits so far: wait for more.
                if rest.chars().all(|c| c.is_ascii_digit()) {
                    return Ok(None);
                }
                return Err(InstructionError::BadLength(raw.len() - rest.len()));
            }
        };
        let (len_str, tail) = rest.split_at(dot);
        let declared: usize = len_str
            .parse()
            .map_err(|_| InstructionError::BadLength(raw.len() - rest.len()))?;
        let value_start = &tail[1..];

        // The element value spans `declared` chars and must be followed by a
        // one-char terminator.
        let mut indices = value_start.char_indices();
        let terminator_at = match indices.nth(declared) {
            Some((pos, _)) => pos,
            None => return Ok(None),
        };
        let value = &value_start[..terminator_at];
        let terminator = value_start[terminator_at..]
            .chars()
            .next()
            .unwrap_or(';');
        rest = &value_start[terminator_at + terminator.len_utf8()..];
        elements.push(value.to_string());
        match terminator {
            ',' => continue,
            ';' => break,
            other => return Err(InstructionError::BadTerminator(other)),
        }
    }
    let mut elements = elements.into_iter();
    let opcode = elements.next().unwrap_or_default();
    Ok(Some((Instruction::new(opcode, elements.collect()), rest)))
}

/// Incremental decoder: feed transport frames in, pop complete instructions
/// out. Instructions may span frame boundaries and a frame may carry several.
#[derive(Debug, Default)]
pub struct InstructionReader {
    buffer: String,
}

impl InstructionReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: &str) {
        self.buffer.push_str(frame);
    }

    pub fn next(&mut self) -> Result<Option<Instruction>, InstructionError> {
        let (instruction, consumed) = match parse_prefix(&self.buffer)? {
            Some((instruction, rest)) => (instruction, self.buffer.len() - rest.len()),
            None => return Ok(None),
        };
        self.buffer.drain(..consumed);
        Ok(Some(instruction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_key_instruction() {
        assert_eq!(Instruction::key(0xff08, true).encode(), "3.key,5.65288,1.1;");
    }

    #[test]
    fn round_trips_arbitrary_args() {
        let cases = [
            Instruction::mouse(104, 56, 1),
            Instruction::size(1920, 1080),
            Instruction::new("blob", vec!["1".into(), "aGk=".into()]),
            Instruction::new("argv", vec!["2".into(), "text/plain".into(), "passwd;tricky,".into()]),
            Instruction::nop(),
        ];
        for instruction in cases {
            assert_eq!(Instruction::parse(&instruction.encode()), Ok(instruction));
        }
    }

    #[test]
    fn lengths_count_chars_not_bytes() {
        let instruction = Instruction::new("blob", vec!["1".into(), "héllo…".into()]);
        let raw = instruction.encode();
        assert!(raw.contains("6.héllo…"));
        assert_eq!(Instruction::parse(&raw), Ok(instruction));
    }

    #[test]
    fn value_may_contain_delimiters() {
        let instruction = Instruction::new("error", vec!["a;b,c.d".into()]);
        assert_eq!(Instruction::parse(&instruction.encode()), Ok(instruction));
    }

    #[test]
    fn rejects_trailing_data() {
        assert_eq!(
            Instruction::parse("3.nop;3.nop;"),
            Err(InstructionError::TrailingData)
        );
    }

    #[test]
    fn rejects_bad_length() {
        assert!(matches!(
            Instruction::parse("x.nop;"),
            Err(InstructionError::BadLength(_))
        ));
    }

    #[test]
    fn reader_reassembles_split_frames() {
        let mut reader = InstructionReader::new();
        reader.push("4.size,4.1");
        assert_eq!(reader.next(), Ok(None));
        reader.push("920,4.1080;3.nop;4.si");
        assert_eq!(reader.next(), Ok(Some(Instruction::size(1920, 1080))));
        assert_eq!(reader.next(), Ok(Some(Instruction::nop())));
        assert_eq!(reader.next(), Ok(None));
        reader.push("ze,3.800,3.600;");
        assert_eq!(reader.next(), Ok(Some(Instruction::size(800, 600))));
        assert_eq!(reader.next(), Ok(None));
    }

    #[test]
    fn missing_args_read_as_empty() {
        let instruction = Instruction::parse("8.required,8.username;").unwrap();
        assert_eq!(instruction.arg(0), "username");
        assert_eq!(instruction.arg(5), "");
    }
}
