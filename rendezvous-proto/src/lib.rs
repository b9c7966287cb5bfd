//! Shared wire definitions for the rendezvous relay.
//!
//! Envelopes are JSON objects tagged by a `type` field and carried in
//! WebSocket text frames.

pub mod codec;
pub mod envelope;
