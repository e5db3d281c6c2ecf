//! Rock-paper-scissors tournament server
//!
//! Players connect over WebSockets, register for the next tournament and are
//! paired through a single-elimination bracket until one champion remains.

pub mod app;
pub mod client;
pub mod config;
pub mod http;
pub mod tournament;
pub mod util;
pub mod ws;
