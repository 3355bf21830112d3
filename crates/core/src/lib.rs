//! Aula Core
//!
//! Domain logic for the aula voice-tutoring backend, kept free of any
//! HTTP/WebSocket wiring:
//!
//! - `session`: per-connection student context (`SessionState`).
//! - `repository`: the persistence capability consumed by tools.
//! - `tools`: the tool registry the realtime model can call into.
//! - `speech`: transcription/generation/synthesis capability.
//! - `pipeline`: the non-realtime fallback turn (audio or text in,
//!   transcript + reply audio out).
//! - `instructions`: builds the tutor system instructions.

pub mod instructions;
pub mod pipeline;
pub mod repository;
pub mod session;
pub mod speech;
pub mod tools;
