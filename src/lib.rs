//! Rocket.Chat connector.
//!
//! Logs in to a Rocket.Chat server over its REST API, polls a room for new
//! messages, normalizes them into [`types::Message`] events for a dispatch
//! core, and sends replies back with `chat.postMessage`.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod dispatch;
pub mod logging;
pub mod rocketchat;
pub mod types;
