//! Realtime WebSocket layer.
//!
//! `session` owns the handshake and socket lifecycle, `relay` drives the
//! duplex pump between the client and the upstream realtime API,
//! `upstream` holds the upstream connection, and `protocol`/`events`
//! define the two wire formats (client-facing and upstream-facing).

pub mod events;
pub mod protocol;
mod relay;
pub mod session;
mod upstream;

pub use session::ws_handler;
