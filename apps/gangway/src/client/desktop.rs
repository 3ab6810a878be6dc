//! Structured-instruction session controller: drives a graphical desktop
//! session. Translates keyboard/pointer/touch input into remote
//! instructions, negotiates display geometry through a debounced resize
//! window, relays clipboard both ways, and answers dynamic parameter
//! requests from the remote side.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use gangway_proto::clipboard::{
    ClipboardAssembler, ClipboardMime, announce, chunk_instruction, split_binary, split_text,
};
use gangway_proto::instruction::{Instruction, InstructionReader, opcodes};
use tokio::sync::mpsc;
use tokio::time::{Sleep, sleep};
use tracing::{debug, warn};

use crate::client::ClientError;
use crate::client::clipboard::ClipboardSink;
use crate::client::keymap::{self, HostKey};
use crate::client::supervisor::IdleSupervisor;
use crate::session::Session;
use crate::transport::{
    CLOSE_CODE_IDLE_TIMEOUT, CLOSE_CODE_NORMAL, Dialer, Transport, TransportEvent,
    recv_or_pending,
};

/// Viewport-resize events are coalesced through this fixed window; a burst
/// produces a single resize instruction carrying only the final geometry.
pub const RESIZE_DEBOUNCE: Duration = Duration::from_millis(500);

pub const CLIPBOARD_DISABLED_NOTICE: &str = "clipboard relay is disabled for this session";
pub const CLIPBOARD_RECEIVED_NOTICE: &str = "clipboard received from remote session";

/// Concurrent inbound clipboard streams tolerated before streams that were
/// announced but never finalized are discarded.
const MAX_CLIPBOARD_STREAMS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Left,
    Middle,
    Right,
}

impl PointerButton {
    const fn mask(self) -> u8 {
        match self {
            PointerButton::Left => 0x01,
            PointerButton::Middle => 0x02,
            PointerButton::Right => 0x04,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DesktopInput {
    KeyDown(HostKey),
    KeyUp(HostKey),
    /// Pointer coordinates are raw viewport pixels; the controller divides by
    /// the current scale so remote coordinates are in buffer space.
    PointerMove { x: f64, y: f64 },
    PointerDown(PointerButton),
    PointerUp(PointerButton),
    PointerLeft,
    TouchStart { x: f64, y: f64 },
    TouchMove { x: f64, y: f64 },
    TouchEnd,
    ViewportResized { width: u32, height: u32 },
    FocusGained,
    SendClipboardText(String),
    SendClipboardBinary(Vec<u8>),
    /// Name of a canned combination from the keymap catalog.
    Combination(String),
    /// Values aligned with the names of the pending parameter prompt.
    SubmitParameters(Vec<String>),
    CancelParameters,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DesktopEvent {
    Connected,
    Notice(String),
    /// Text written to the local OS clipboard.
    ClipboardWritten(String),
    /// The remote side requests these named parameters; the embedder shows a
    /// generic multi-field prompt.
    ParameterPrompt(Vec<String>),
    CursorImage {
        hotspot_x: u32,
        hotspot_y: u32,
        data: Vec<u8>,
    },
    CursorHidden,
    Scale(f64),
    Closed { idle_timeout: bool },
}

/// Display scale so the rendered buffer fits the viewport undistorted.
pub fn display_scale(viewport: (u32, u32), buffer: (u32, u32)) -> f64 {
    if buffer.0 == 0 || buffer.1 == 0 {
        return 1.0;
    }
    let horizontal = f64::from(viewport.0) / f64::from(buffer.0);
    let vertical = f64::from(viewport.1) / f64::from(buffer.1);
    horizontal.min(vertical)
}

pub struct DesktopHandle {
    input: mpsc::UnboundedSender<DesktopInput>,
}

impl DesktopHandle {
    pub fn send(&self, input: DesktopInput) {
        let _ = self.input.send(input);
    }
}

pub struct DesktopController {
    session: Session,
    dialer: Arc<dyn Dialer>,
    viewport: (u32, u32),
    clipboard: Box<dyn ClipboardSink>,
    input: mpsc::UnboundedReceiver<DesktopInput>,
    events: mpsc::UnboundedSender<DesktopEvent>,
}

impl DesktopController {
    pub fn new(
        session: Session,
        dialer: Arc<dyn Dialer>,
        viewport: (u32, u32),
        clipboard: Box<dyn ClipboardSink>,
        events: mpsc::UnboundedSender<DesktopEvent>,
    ) -> (Self, DesktopHandle) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        (
            Self {
                session,
                dialer,
                viewport,
                clipboard,
                input: input_rx,
                events,
            },
            DesktopHandle { input: input_tx },
        )
    }

    pub async fn run(self) -> Result<(), ClientError> {
        let DesktopController {
            session,
            dialer,
            mut viewport,
            mut clipboard,
            mut input,
            events,
        } = self;
        let pinned = session.fixed_geometry.is_some();

        let mut transport: Option<Arc<dyn Transport>> = Some(dialer.dial().await?);
        let mut supervisor = transport.as_ref().map(|t| {
            IdleSupervisor::spawn(
                t.clone(),
                Instruction::nop().encode().into_bytes(),
                session.idle_budget(),
            )
        });
        let mut open = true;

        let mut reader = InstructionReader::new();
        let mut buffer = session.fixed_geometry.unwrap_or(viewport);
        let mut scale = display_scale(viewport, buffer);
        let mut pointer = PointerState::default();
        let mut assemblers: HashMap<u32, ClipboardAssembler> = HashMap::new();
        let mut pending_resize: Option<(u32, u32)> = None;
        let mut debounce: Option<Pin<Box<Sleep>>> = None;
        let mut pending_params: Option<Vec<String>> = None;
        let mut next_stream: u32 = 1;
        let mut last_sent_clipboard: Option<String> = None;

        let _ = events.send(DesktopEvent::Connected);
        let _ = events.send(DesktopEvent::Scale(scale));

        loop {
            tokio::select! {
                maybe = input.recv() => match maybe {
                    None => {
                        close_quietly(&transport).await;
                        break;
                    }
                    Some(DesktopInput::Disconnect) => {
                        send_instruction(&transport, Instruction::disconnect()).await;
                        close_quietly(&transport).await;
                        break;
                    }
                    Some(event) if !open => {
                        // Reconnection is an explicit control action for
                        // desktop sessions; stray input after close is noise.
                        debug!(target: "gangway::desktop", ?event, "input ignored while closed");
                    }
                    Some(DesktopInput::KeyDown(key)) => {
                        if let Some(sup) = &supervisor {
                            sup.record_activity();
                        }
                        let dispatch = keymap::translate(key);
                        send_instruction(&transport, Instruction::key(dispatch.keysym, true)).await;
                    }
                    Some(DesktopInput::KeyUp(key)) => {
                        let dispatch = keymap::translate(key);
                        send_instruction(&transport, Instruction::key(dispatch.keysym, false)).await;
                    }
                    Some(DesktopInput::PointerMove { x, y }) => {
                        pointer.move_to(x, y);
                        send_instruction(&transport, pointer.snapshot(scale)).await;
                    }
                    Some(DesktopInput::PointerDown(button)) => {
                        if let Some(sup) = &supervisor {
                            sup.record_activity();
                        }
                        pointer.press(button);
                        send_instruction(&transport, pointer.snapshot(scale)).await;
                    }
                    Some(DesktopInput::PointerUp(button)) => {
                        pointer.release(button);
                        send_instruction(&transport, pointer.snapshot(scale)).await;
                    }
                    Some(DesktopInput::PointerLeft) => {
                        let _ = events.send(DesktopEvent::CursorHidden);
                    }
                    Some(DesktopInput::TouchStart { x, y }) => {
                        if let Some(sup) = &supervisor {
                            sup.record_activity();
                        }
                        pointer.move_to(x, y);
                        pointer.press(PointerButton::Left);
                        send_instruction(&transport, pointer.snapshot(scale)).await;
                    }
                    Some(DesktopInput::TouchMove { x, y }) => {
                        pointer.move_to(x, y);
                        send_instruction(&transport, pointer.snapshot(scale)).await;
                    }
                    Some(DesktopInput::TouchEnd) => {
                        pointer.release(PointerButton::Left);
                        send_instruction(&transport, pointer.snapshot(scale)).await;
                    }
                    Some(DesktopInput::ViewportResized { width, height }) => {
                        viewport = (width, height);
                        pending_resize = Some((width, height));
                        // Single pending timer, last write wins.
                        debounce = Some(Box::pin(sleep(RESIZE_DEBOUNCE)));
                    }
                    Some(DesktopInput::FocusGained) => {
                        match clipboard.read_text() {
                            Ok(text)
                                if !text.is_empty()
                                    && last_sent_clipboard.as_deref() != Some(text.as_str()) =>
                            {
                                send_clipboard_text(&transport, &mut next_stream, &text).await;
                                last_sent_clipboard = Some(text);
                            }
                            Ok(_) => {}
                            Err(err) => {
                                debug!(target: "gangway::desktop", error = %err, "local clipboard unreadable");
                            }
                        }
                    }
                    Some(DesktopInput::SendClipboardText(text)) => {
                        send_clipboard_text(&transport, &mut next_stream, &text).await;
                        last_sent_clipboard = Some(text);
                    }
                    Some(DesktopInput::SendClipboardBinary(data)) => {
                        let stream = allocate_stream(&mut next_stream);
                        send_instruction(&transport, announce(stream, ClipboardMime::Binary)).await;
                        for chunk in split_binary(&data) {
                            send_instruction(&transport, chunk_instruction(stream, &chunk)).await;
                        }
                    }
                    Some(DesktopInput::Combination(name)) => {
                        match keymap::combination(&name) {
                            Some(combo) => {
                                if let Some(sup) = &supervisor {
                                    sup.record_activity();
                                }
                                // Every key-down before any key-up, listed order.
                                for &keysym in combo.keys {
                                    send_instruction(&transport, Instruction::key(keysym, true)).await;
                                }
                                for &keysym in combo.keys {
                                    send_instruction(&transport, Instruction::key(keysym, false)).await;
                                }
                            }
                            None => {
                                let _ = events.send(DesktopEvent::Notice(format!(
                                    "unknown key combination: {name}"
                                )));
                            }
                        }
                    }
                    Some(DesktopInput::SubmitParameters(values)) => {
                        if let Some(names) = pending_params.take() {
                            for (index, name) in names.iter().enumerate() {
                                let value = values.get(index).cloned().unwrap_or_default();
                                let stream = allocate_stream(&mut next_stream);
                                send_instruction(
                                    &transport,
                                    Instruction::argv(stream, "text/plain", name),
                                )
                                .await;
                                send_instruction(
                                    &transport,
                                    Instruction::blob(stream, &BASE64.encode(value.as_bytes())),
                                )
                                .await;
                                send_instruction(&transport, Instruction::end(stream)).await;
                            }
                        }
                    }
                    Some(DesktopInput::CancelParameters) => {
                        pending_params = None;
                        let _ = events.send(DesktopEvent::Notice(
                            "parameter prompt cancelled, closing session".to_string(),
                        ));
                        if let Some(t) = &transport {
                            t.close(CLOSE_CODE_NORMAL, "parameter negotiation cancelled").await;
                        }
                    }
                },
                _ = wait_debounce(&mut debounce) => {
                    debounce = None;
                    if let Some((width, height)) = pending_resize.take() {
                        if !pinned {
                            send_instruction(&transport, Instruction::size(width, height)).await;
                        }
                        scale = display_scale(viewport, buffer);
                        let _ = events.send(DesktopEvent::Scale(scale));
                        debug!(
                            target: "gangway::desktop",
                            width, height, scale, pinned, "viewport geometry settled"
                        );
                    }
                },
                event = recv_or_pending(&transport) => match event {
                    TransportEvent::Frame(bytes) => {
                        reader.push(&String::from_utf8_lossy(&bytes));
                        loop {
                            match reader.next() {
                                Ok(Some(instruction)) => {
                                    handle_instruction(
                                        instruction,
                                        &transport,
                                        &events,
                                        &mut clipboard,
                                        &mut assemblers,
                                        &mut pending_params,
                                        &mut buffer,
                                        viewport,
                                        &mut scale,
                                        session.clipboard_enabled,
                                    )
                                    .await;
                                }
                                Ok(None) => break,
                                Err(err) => {
                                    warn!(target: "gangway::desktop", error = %err, "malformed instruction, resyncing");
                                    reader = InstructionReader::new();
                                    break;
                                }
                            }
                        }
                    }
                    TransportEvent::Closed { code, reason } => {
                        debug!(target: "gangway::desktop", ?code, %reason, "transport closed");
                        supervisor = None;
                        transport = None;
                        open = false;
                        let idle_timeout = code == Some(CLOSE_CODE_IDLE_TIMEOUT);
                        let notice = if idle_timeout {
                            super::terminal::IDLE_CLOSED_NOTICE
                        } else {
                            super::terminal::CLOSED_NOTICE
                        };
                        let _ = events.send(DesktopEvent::Notice(notice.to_string()));
                        let _ = events.send(DesktopEvent::Closed { idle_timeout });
                    }
                },
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PointerState {
    x: f64,
    y: f64,
    mask: u8,
}

impl PointerState {
    fn move_to(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }

    fn press(&mut self, button: PointerButton) {
        self.mask |= button.mask();
    }

    fn release(&mut self, button: PointerButton) {
        self.mask &= !button.mask();
    }

    /// Remote pointer snapshot in buffer coordinates.
    fn snapshot(&self, scale: f64) -> Instruction {
        let scale = if scale > 0.0 { scale } else { 1.0 };
        Instruction::mouse(
            (self.x / scale).round() as i32,
            (self.y / scale).round() as i32,
            self.mask,
        )
    }
}

fn allocate_stream(next_stream: &mut u32) -> u32 {
    let stream = *next_stream;
    *next_stream += 1;
    stream
}

async fn wait_debounce(debounce: &mut Option<Pin<Box<Sleep>>>) {
    match debounce.as_mut() {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn send_instruction(transport: &Option<Arc<dyn Transport>>, instruction: Instruction) {
    if let Some(transport) = transport {
        let _ = transport.send(instruction.encode().into_bytes()).await;
    }
}

async fn close_quietly(transport: &Option<Arc<dyn Transport>>) {
    if let Some(transport) = transport {
        transport.close(CLOSE_CODE_NORMAL, "detached").await;
    }
}

async fn send_clipboard_text(
    transport: &Option<Arc<dyn Transport>>,
    next_stream: &mut u32,
    text: &str,
) {
    let stream = allocate_stream(next_stream);
    send_instruction(transport, announce(stream, ClipboardMime::Text)).await;
    for chunk in split_text(text) {
        send_instruction(transport, chunk_instruction(stream, &chunk)).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_instruction(
    instruction: Instruction,
    transport: &Option<Arc<dyn Transport>>,
    events: &mpsc::UnboundedSender<DesktopEvent>,
    clipboard: &mut Box<dyn ClipboardSink>,
    assemblers: &mut HashMap<u32, ClipboardAssembler>,
    pending_params: &mut Option<Vec<String>>,
    buffer: &mut (u32, u32),
    viewport: (u32, u32),
    scale: &mut f64,
    clipboard_enabled: bool,
) {
    match instruction.opcode.as_str() {
        opcodes::SIZE => {
            let width = instruction.arg(0).parse().unwrap_or(buffer.0);
            let height = instruction.arg(1).parse().unwrap_or(buffer.1);
            *buffer = (width, height);
            *scale = display_scale(viewport, *buffer);
            let _ = events.send(DesktopEvent::Scale(*scale));
        }
        opcodes::CLIPBOARD => {
            let Ok(stream) = instruction.arg(0).parse::<u32>() else {
                return;
            };
            if clipboard_enabled {
                // Streams left unfinalized by the server would otherwise pile
                // up; past the cap they are abandoned in favor of the new one.
                if assemblers.len() >= MAX_CLIPBOARD_STREAMS && !assemblers.contains_key(&stream) {
                    warn!(
                        target: "gangway::desktop",
                        stale = assemblers.len(),
                        "discarding unfinalized clipboard streams"
                    );
                    assemblers.clear();
                }
                let mime = ClipboardMime::classify(instruction.arg(1));
                assemblers.insert(stream, ClipboardAssembler::new(mime));
            } else {
                // Exactly one informational notice per inbound announcement;
                // the chunks that follow find no assembler and are dropped.
                let _ = events.send(DesktopEvent::Notice(CLIPBOARD_DISABLED_NOTICE.to_string()));
            }
        }
        opcodes::BLOB => {
            if let Ok(stream) = instruction.arg(0).parse::<u32>() {
                if let Some(assembler) = assemblers.get_mut(&stream) {
                    assembler.push_blob(instruction.arg(1));
                }
            }
        }
        opcodes::END => {
            if let Ok(stream) = instruction.arg(0).parse::<u32>() {
                if let Some(assembler) = assemblers.remove(&stream) {
                    let text = assembler.finish().into_text();
                    match clipboard.write_text(&text) {
                        Ok(()) => {
                            let _ = events
                                .send(DesktopEvent::Notice(CLIPBOARD_RECEIVED_NOTICE.to_string()));
                            let _ = events.send(DesktopEvent::ClipboardWritten(text));
                        }
                        Err(err) => {
                            let _ = events.send(DesktopEvent::Notice(format!(
                                "failed to write local clipboard: {err}"
                            )));
                        }
                    }
                }
            }
        }
        opcodes::REQUIRED => {
            *pending_params = Some(instruction.args.clone());
            let _ = events.send(DesktopEvent::ParameterPrompt(instruction.args));
        }
        opcodes::CURSOR => {
            let hotspot_x = instruction.arg(0).parse().unwrap_or(0);
            let hotspot_y = instruction.arg(1).parse().unwrap_or(0);
            let data = BASE64.decode(instruction.arg(3)).unwrap_or_default();
            let _ = events.send(DesktopEvent::CursorImage {
                hotspot_x,
                hotspot_y,
                data,
            });
        }
        opcodes::SYNC => {
            // Server-initiated liveness probe; answered with the same stamp.
            let timestamp = instruction.arg(0).to_string();
            send_instruction(transport, Instruction::sync(&timestamp)).await;
        }
        opcodes::ERROR => {
            let _ = events.send(DesktopEvent::Notice(format!(
                "remote error: {}",
                instruction.arg(0)
            )));
            // A remote error ends the session; the closed event follows.
            if let Some(t) = transport {
                t.close(CLOSE_CODE_NORMAL, "remote error").await;
            }
        }
        opcodes::DISCONNECT => {
            if let Some(t) = transport {
                t.close(CLOSE_CODE_NORMAL, "remote disconnect").await;
            }
        }
        _ => {}
    }
}
