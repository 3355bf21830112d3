//! Aula API Library Crate
//!
//! This library contains the core logic for the aula voice-tutoring
//! service: configuration, authentication, database access, the HTTP
//! routes, and the realtime WebSocket relay. The `bin/api.rs` binary is a
//! thin wrapper around this library.

pub mod auth;
pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
