//! WebSocket session gateway

pub mod handler;
pub mod protocol;
