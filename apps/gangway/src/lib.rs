//! Client-side session runtime for the gangway remote-access gateway.
//!
//! The runtime allocates a session from the gateway control API, opens one
//! WebSocket per connect attempt, and drives it with one of two controllers:
//! [`client::terminal`] for character-stream sessions and [`client::desktop`]
//! for structured-instruction (graphical) sessions. Both are wrapped by the
//! idle/keepalive supervisor in [`client::supervisor`].

pub mod client;
pub mod config;
pub mod logging;
pub mod session;
pub mod transport;
