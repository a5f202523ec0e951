//! Watchparty Server
//!
//! Server-side coordination core for synchronous watch parties: rooms with
//! host privileges, a shared media timeline, chat, and peer-to-peer
//! signaling, all behind one WebSocket event bus.

pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod playback;
pub mod resolve;
pub mod rooms;
pub mod signaling;
pub mod store;
pub mod tasks;
pub mod util;
