//! Realtime gateway: socket protocol, rooms, per-delivery authorization and fan-out.

pub mod broker;
pub mod events;
pub mod fanout;
pub mod filter;
pub mod handler;
pub mod publisher;
pub mod reauth;
pub mod rooms;
pub mod scope;
pub mod server;
pub mod session;
