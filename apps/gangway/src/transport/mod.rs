use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub mod pair;
pub mod websocket;

/// Reserved non-standard WebSocket close code meaning "closed by local
/// idle-timeout enforcement". Distinguishable from every other closure.
pub const CLOSE_CODE_IDLE_TIMEOUT: u16 = 4010;

/// Ordinary close code used when the client tears a session down on purpose.
pub const CLOSE_CODE_NORMAL: u16 = 1000;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("invalid transport url: {0}")]
    InvalidUrl(String),
    #[error("websocket error: {0}")]
    WebSocket(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(Vec<u8>),
    Closed { code: Option<u16>, reason: String },
}

/// One bidirectional channel to the gateway. A handle is exclusively owned by
/// one controller instance; reconnect closes and discards the old handle
/// before a new one is dialed, so two live handles for the same session slot
/// never coexist.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Next inbound event. Returns `None` once the closed event has been
    /// delivered and the channel is drained.
    async fn recv(&self) -> Option<TransportEvent>;

    async fn close(&self, code: u16, reason: &str);

    fn is_open(&self) -> bool;
}

/// Opens a fresh transport for a connect or reconnect attempt.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Receive from an optional transport handle; pends forever when there is no
/// live handle so it can sit in a `select!` arm.
pub async fn recv_or_pending(transport: &Option<Arc<dyn Transport>>) -> TransportEvent {
    match transport {
        Some(transport) => match transport.recv().await {
            Some(event) => event,
            None => TransportEvent::Closed {
                code: None,
                reason: "transport channel drained".into(),
            },
        },
        None => std::future::pending().await,
    }
}
