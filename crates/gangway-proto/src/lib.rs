//! Wire codecs for gangway sessions.
//!
//! Character-stream sessions speak the digit-framed message protocol
//! ([`framed`]); structured-instruction sessions speak the length-prefixed
//! instruction protocol ([`instruction`]). Clipboard transfers ride on the
//! instruction protocol's stream abstraction ([`clipboard`]).

pub mod clipboard;
pub mod framed;
pub mod instruction;

pub use clipboard::{ClipboardAssembler, ClipboardChunk, ClipboardMime, ClipboardPayload};
pub use framed::{Message, MessageType};
pub use instruction::{Instruction, InstructionError, InstructionReader};
