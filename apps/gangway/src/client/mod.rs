//! Session controllers and the supporting pieces they share: the
//! idle/keepalive supervisor, the keysym catalog and the OS clipboard bridge.

pub mod clipboard;
pub mod desktop;
pub mod keymap;
pub mod supervisor;
pub mod terminal;

use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The initial dial failed. Later transport failures are surfaced as
    /// session notices instead; a controller object survives them.
    #[error("failed to open transport: {0}")]
    Connect(#[from] TransportError),
}
