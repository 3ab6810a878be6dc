//! Bridge to the host OS clipboard behind a small trait so controllers can
//! be driven headless in tests.

use std::sync::{Arc, Mutex};

use copypasta::{ClipboardContext, ClipboardProvider};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("clipboard error: {0}")]
pub struct ClipboardError(pub String);

pub trait ClipboardSink: Send {
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError>;
    fn read_text(&mut self) -> Result<String, ClipboardError>;
}

pub struct SystemClipboard {
    context: ClipboardContext,
}

impl SystemClipboard {
    pub fn new() -> Result<Self, ClipboardError> {
        let context = ClipboardContext::new().map_err(|err| ClipboardError(err.to_string()))?;
        Ok(Self { context })
    }
}

impl ClipboardSink for SystemClipboard {
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.context
            .set_contents(text.to_string())
            .map_err(|err| ClipboardError(err.to_string()))
    }

    fn read_text(&mut self) -> Result<String, ClipboardError> {
        self.context
            .get_contents()
            .map_err(|err| ClipboardError(err.to_string()))
    }
}

/// In-memory sink for headless embedders and tests; clones share contents.
#[derive(Clone, Default)]
pub struct MemoryClipboard {
    contents: Arc<Mutex<String>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> String {
        self.contents.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn set(&self, text: &str) {
        if let Ok(mut guard) = self.contents.lock() {
            *guard = text.to_string();
        }
    }
}

impl ClipboardSink for MemoryClipboard {
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.set(text);
        Ok(())
    }

    fn read_text(&mut self) -> Result<String, ClipboardError> {
        Ok(self.snapshot())
    }
}
