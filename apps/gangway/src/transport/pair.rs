//! In-memory transport pair used by the test suites. The client half
//! implements [`Transport`]; the peer half lets a test play the gateway:
//! inject frames, observe everything the client sent, and inspect close
//! codes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use super::{Dialer, Transport, TransportError, TransportEvent};

pub struct TransportPair {
    pub transport: Arc<dyn Transport>,
    pub peer: PairPeer,
}

pub fn pair() -> TransportPair {
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let open = Arc::new(AtomicBool::new(true));
    let client_close = Arc::new(Mutex::new(None));

    let transport = Arc::new(PairTransport {
        frames_out: frame_tx,
        events: AsyncMutex::new(event_rx),
        event_tx: event_tx.clone(),
        open: open.clone(),
        client_close: client_close.clone(),
    });
    let peer = PairPeer {
        frames_in: AsyncMutex::new(frame_rx),
        event_tx,
        open,
        client_close,
    };
    TransportPair { transport, peer }
}

struct PairTransport {
    frames_out: mpsc::UnboundedSender<Vec<u8>>,
    events: AsyncMutex<mpsc::UnboundedReceiver<TransportEvent>>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    open: Arc<AtomicBool>,
    client_close: Arc<Mutex<Option<(u16, String)>>>,
}

#[async_trait]
impl Transport for PairTransport {
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.frames_out
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Option<TransportEvent> {
        self.events.lock().await.recv().await
    }

    async fn close(&self, code: u16, reason: &str) {
        if self.open.swap(false, Ordering::SeqCst) {
            if let Ok(mut guard) = self.client_close.lock() {
                *guard = Some((code, reason.to_string()));
            }
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

pub struct PairPeer {
    frames_in: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    open: Arc<AtomicBool>,
    client_close: Arc<Mutex<Option<(u16, String)>>>,
}

impl PairPeer {
    /// Inject a frame as if the gateway sent it.
    pub fn send_frame(&self, frame: impl Into<Vec<u8>>) {
        let _ = self.event_tx.send(TransportEvent::Frame(frame.into()));
    }

    pub fn send_text(&self, frame: &str) {
        self.send_frame(frame.as_bytes().to_vec());
    }

    /// Close the channel from the gateway side.
    pub fn close(&self, code: Option<u16>, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.event_tx.send(TransportEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    /// Next frame the client sent, in FIFO order.
    pub async fn recv_frame(&self) -> Option<Vec<u8>> {
        self.frames_in.lock().await.recv().await
    }

    pub async fn recv_text(&self) -> Option<String> {
        self.recv_frame()
            .await
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Frames already sent by the client, without waiting for more.
    pub fn drain_frames(&self) -> Vec<String> {
        let mut frames = Vec::new();
        if let Ok(mut rx) = self.frames_in.try_lock() {
            while let Ok(bytes) = rx.try_recv() {
                frames.push(String::from_utf8_lossy(&bytes).into_owned());
            }
        }
        frames
    }

    /// Close code and reason of a client-initiated closure, if any.
    pub fn client_close(&self) -> Option<(u16, String)> {
        self.client_close.lock().ok().and_then(|guard| guard.clone())
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Dialer producing in-memory pairs; each dial hands the peer half to the
/// test through a channel so reconnects can be observed.
pub struct PairDialer {
    peers: mpsc::UnboundedSender<PairPeer>,
}

impl PairDialer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PairPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { peers: tx }, rx)
    }
}

#[async_trait]
impl Dialer for PairDialer {
    async fn dial(&self) -> Result<Arc<dyn Transport>, TransportError> {
        let TransportPair { transport, peer } = pair();
        self.peers.send(peer).map_err(|_| TransportError::Closed)?;
        Ok(transport)
    }
}
