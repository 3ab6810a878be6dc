//! Character-stream session controller.
//!
//! Lifecycle: INIT -> CONNECTING -> OPEN -> CLOSED(reason). A keystroke
//! arriving while CLOSED starts a fresh cycle; the triggering keystroke is
//! dropped, never buffered for replay, and so are keystrokes queued while the
//! new connection is still being dialed.

use std::sync::Arc;

use gangway_proto::{Message, MessageType};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::ClientError;
use crate::client::supervisor::IdleSupervisor;
use crate::session::Session;
use crate::transport::{
    CLOSE_CODE_IDLE_TIMEOUT, CLOSE_CODE_NORMAL, Dialer, Transport, TransportEvent,
    recv_or_pending,
};

pub const CLOSED_NOTICE: &str = "session closed";
pub const IDLE_CLOSED_NOTICE: &str = "session closed after idle timeout";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalInput {
    /// Raw key data as the terminal produced it (a char, or an escape
    /// sequence for special keys).
    Key(String),
    Resize { cols: u16, rows: u16 },
    Detach,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    /// Transport is open. The embedder discards any provisional output it
    /// rendered before this point.
    Connected,
    Output(String),
    /// Transient presence / status line; does not alter controller state.
    Notice(String),
    /// The remote working directory changed; forwarded to the file-browser
    /// collaborator.
    DirChanged(String),
    Closed { idle_timeout: bool },
}

pub struct TerminalHandle {
    input: mpsc::UnboundedSender<TerminalInput>,
}

impl TerminalHandle {
    pub fn key(&self, data: impl Into<String>) {
        let _ = self.input.send(TerminalInput::Key(data.into()));
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        let _ = self.input.send(TerminalInput::Resize { cols, rows });
    }

    pub fn detach(&self) {
        let _ = self.input.send(TerminalInput::Detach);
    }
}

pub struct TerminalController {
    session: Session,
    dialer: Arc<dyn Dialer>,
    input: mpsc::UnboundedReceiver<TerminalInput>,
    events: mpsc::UnboundedSender<TerminalEvent>,
}

impl TerminalController {
    pub fn new(
        session: Session,
        dialer: Arc<dyn Dialer>,
        events: mpsc::UnboundedSender<TerminalEvent>,
    ) -> (Self, TerminalHandle) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        (
            Self {
                session,
                dialer,
                input: input_rx,
                events,
            },
            TerminalHandle { input: input_tx },
        )
    }

    /// Drive the session until the embedder detaches or drops its handle.
    /// The first dial failure is returned; everything after that is surfaced
    /// through the event channel.
    pub async fn run(self) -> Result<(), ClientError> {
        let TerminalController {
            session,
            dialer,
            mut input,
            events,
        } = self;

        let mut transport: Option<Arc<dyn Transport>> = Some(dialer.dial().await?);
        let mut supervisor = transport.as_ref().map(|t| spawn_supervisor(t, &session));
        let mut open = true;
        let _ = events.send(TerminalEvent::Connected);

        loop {
            tokio::select! {
                maybe = input.recv() => match maybe {
                    None => {
                        close_quietly(&transport).await;
                        break;
                    }
                    Some(TerminalInput::Detach) => {
                        close_quietly(&transport).await;
                        break;
                    }
                    Some(TerminalInput::Key(data)) => {
                        if open {
                            if let Some(sup) = &supervisor {
                                sup.record_activity();
                            }
                            send_message(&transport, Message::data(data)).await;
                        } else {
                            // Fresh INIT cycle; this keystroke is dropped.
                            supervisor = None;
                            transport = None;
                            match dialer.dial().await {
                                Ok(fresh) => {
                                    supervisor = Some(spawn_supervisor(&fresh, &session));
                                    transport = Some(fresh);
                                    open = true;
                                    let _ = events.send(TerminalEvent::Connected);
                                    if drain_stale_input(&mut input) {
                                        close_quietly(&transport).await;
                                        break;
                                    }
                                }
                                Err(err) => {
                                    warn!(target: "gangway::terminal", error = %err, "reconnect failed");
                                    let _ = events.send(TerminalEvent::Notice(format!(
                                        "reconnect failed: {err}"
                                    )));
                                }
                            }
                        }
                    }
                    Some(TerminalInput::Resize { cols, rows }) => {
                        if open {
                            send_message(&transport, Message::resize(cols, rows)).await;
                        }
                    }
                },
                event = recv_or_pending(&transport) => match event {
                    TransportEvent::Frame(bytes) => {
                        handle_frame(&events, &transport, &bytes).await;
                    }
                    TransportEvent::Closed { code, reason } => {
                        debug!(target: "gangway::terminal", ?code, %reason, "transport closed");
                        supervisor = None;
                        transport = None;
                        open = false;
                        let idle_timeout = code == Some(CLOSE_CODE_IDLE_TIMEOUT);
                        let notice = if idle_timeout {
                            IDLE_CLOSED_NOTICE
                        } else {
                            CLOSED_NOTICE
                        };
                        let _ = events.send(TerminalEvent::Notice(notice.to_string()));
                        let _ = events.send(TerminalEvent::Closed { idle_timeout });
                    }
                },
            }
        }
        Ok(())
    }
}

fn spawn_supervisor(transport: &Arc<dyn Transport>, session: &Session) -> IdleSupervisor {
    IdleSupervisor::spawn(
        transport.clone(),
        Message::keep_alive().encode().into_bytes(),
        session.idle_budget(),
    )
}

async fn send_message(transport: &Option<Arc<dyn Transport>>, message: Message) {
    if let Some(transport) = transport {
        // A send failure means the transport already closed underneath us;
        // the closed event arrives through recv and is handled there.
        let _ = transport.send(message.encode().into_bytes()).await;
    }
}

async fn close_quietly(transport: &Option<Arc<dyn Transport>>) {
    if let Some(transport) = transport {
        transport.close(CLOSE_CODE_NORMAL, "detached").await;
    }
}

/// Drop input queued while a reconnect was in flight. Returns true when a
/// detach request was among it.
fn drain_stale_input(input: &mut mpsc::UnboundedReceiver<TerminalInput>) -> bool {
    let mut detach = false;
    while let Ok(event) = input.try_recv() {
        if matches!(event, TerminalInput::Detach) {
            detach = true;
        }
    }
    detach
}

async fn handle_frame(
    events: &mpsc::UnboundedSender<TerminalEvent>,
    transport: &Option<Arc<dyn Transport>>,
    bytes: &[u8],
) {
    let raw = String::from_utf8_lossy(bytes);
    let message = Message::decode(&raw);
    match message.kind {
        MessageType::Data => {
            let _ = events.send(TerminalEvent::Output(message.content));
        }
        MessageType::Error => {
            let _ = events.send(TerminalEvent::Notice(format!("error: {}", message.content)));
        }
        MessageType::Join => {
            let _ = events.send(TerminalEvent::Notice(format!(
                "{} joined the session",
                participant(&message.content)
            )));
        }
        MessageType::Exit => {
            let _ = events.send(TerminalEvent::Notice(format!(
                "{} left the session",
                participant(&message.content)
            )));
        }
        MessageType::DirChanged => {
            let _ = events.send(TerminalEvent::DirChanged(message.content));
        }
        MessageType::Ping => {
            // Server-initiated round-trip probe; echoed verbatim.
            send_message(transport, Message::new(MessageType::Ping, message.content)).await;
        }
        // Inert placeholders for future protocol use.
        MessageType::Resize
        | MessageType::KeepAlive
        | MessageType::AuthPrompt
        | MessageType::AuthReply => {}
    }
}

fn participant(content: &str) -> &str {
    if content.is_empty() {
        "a participant"
    } else {
        content
    }
}
