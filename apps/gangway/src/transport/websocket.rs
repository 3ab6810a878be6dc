use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use url::Url;

use super::{Dialer, Transport, TransportError, TransportEvent};

enum Outgoing {
    Frame(Vec<u8>),
    Close(u16, String),
}

/// WebSocket implementation of [`Transport`]. One pump task bridges the
/// socket and a pair of mpsc channels; the task is aborted when the transport
/// is dropped so no connection outlives its owning controller.
pub struct WebSocketTransport {
    out_tx: mpsc::UnboundedSender<Outgoing>,
    events: AsyncMutex<mpsc::UnboundedReceiver<TransportEvent>>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    open: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    pub async fn connect(url: &Url) -> Result<Self, TransportError> {
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| TransportError::WebSocket(err.to_string()))?;
        debug!(target: "gangway::transport", %url, "websocket connected");

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let pump = tokio::spawn(pump_websocket(
            stream,
            out_rx,
            event_tx.clone(),
            open.clone(),
        ));

        Ok(Self {
            out_tx,
            events: AsyncMutex::new(event_rx),
            event_tx,
            open,
            pump: Mutex::new(Some(pump)),
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.out_tx
            .send(Outgoing::Frame(frame))
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Option<TransportEvent> {
        self.events.lock().await.recv().await
    }

    async fn close(&self, code: u16, reason: &str) {
        // First closer wins; the pump suppresses the server's close echo.
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.out_tx.send(Outgoing::Close(code, reason.to_string()));
            let _ = self.event_tx.send(TransportEvent::Closed {
                code: Some(code),
                reason: reason.to_string(),
            });
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        if let Ok(mut guard) = self.pump.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }
}

async fn pump_websocket(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut out_rx: mpsc::UnboundedReceiver<Outgoing>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    open: Arc<AtomicBool>,
) {
    let (mut sink, mut source) = stream.split();

    let send_task = tokio::spawn(async move {
        while let Some(outgoing) = out_rx.recv().await {
            match outgoing {
                Outgoing::Frame(data) => {
                    if sink.send(Message::Binary(data)).await.is_err() {
                        break;
                    }
                }
                Outgoing::Close(code, reason) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Binary(data)) => {
                if event_tx.send(TransportEvent::Frame(data)).is_err() {
                    break;
                }
            }
            Ok(Message::Text(text)) => {
                if event_tx
                    .send(TransportEvent::Frame(text.into_bytes()))
                    .is_err()
                {
                    break;
                }
            }
            Ok(Message::Close(frame)) => {
                if open.swap(false, Ordering::SeqCst) {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    let _ = event_tx.send(TransportEvent::Closed { code, reason });
                }
                break;
            }
            Ok(_) => {}
            Err(err) => {
                if open.swap(false, Ordering::SeqCst) {
                    let _ = event_tx.send(TransportEvent::Closed {
                        code: None,
                        reason: err.to_string(),
                    });
                }
                break;
            }
        }
    }

    // Peer vanished without a close frame.
    if open.swap(false, Ordering::SeqCst) {
        let _ = event_tx.send(TransportEvent::Closed {
            code: None,
            reason: "connection lost".into(),
        });
    }

    send_task.abort();
    let _ = send_task.await;
}

/// Dials the session WebSocket endpoint. Every dial opens a brand-new
/// connection; connect URLs are never reused across reconnects.
pub struct WebSocketDialer {
    url: Url,
}

impl WebSocketDialer {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait]
impl Dialer for WebSocketDialer {
    async fn dial(&self) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = WebSocketTransport::connect(&self.url).await?;
        Ok(Arc::new(transport))
    }
}
