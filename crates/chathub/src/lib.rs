//! Chathub Backend Library
//!
//! Real-time chat backend: a single hub task owns the set of live WebSocket
//! connections and fans persisted messages out to the participants of each
//! conversation.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod ids;
pub mod store;
pub mod ws;
