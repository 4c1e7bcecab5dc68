//! # courier-server
//!
//! Real-time message relay: authenticated WebSocket clients send messages
//! that are persisted, routed to the receiver's live connection, and
//! acknowledged back to the sender. A small REST surface covers sending,
//! history, and presence.

pub mod api;
pub mod auth;
pub mod batch;
pub mod config;
pub mod connection;
pub mod delivery;
pub mod error;
pub mod hub;
pub mod presence;
pub mod store;

#[cfg(test)]
mod testing;
