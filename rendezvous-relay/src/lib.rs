//! Rendezvous relay server library.
//!
//! Exposes the relay server for use in tests and embedding.
//! The relay accepts WebSocket connections, groups peers into named rooms,
//! and forwards opaque signaling payloads between them.

pub mod config;
pub mod fanout;
pub mod registry;
pub mod relay;
